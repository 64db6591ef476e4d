use std::time::Duration;

use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{AuthError, AuthResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches a JSON Web Key set and renders it as kid-addressed RS256
/// decoding keys.
#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>, insecure_tls: bool) -> AuthResult<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::JwksFetch(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::JwksFetch(format!(
                "HTTP {status} from {}",
                self.url
            )));
        }

        let document: KeySetDocument = response
            .json()
            .await
            .map_err(|err| AuthError::JwksDecode(err.to_string()))?;

        document
            .keys
            .into_iter()
            .map(PublishedKey::into_decoding_key)
            .collect()
    }
}

/// Wire shape of the key-set document. Entries the verifier cannot use
/// surface as errors on conversion rather than silently shrinking the
/// key set.
#[derive(Debug, Deserialize)]
struct KeySetDocument {
    #[serde(default)]
    keys: Vec<PublishedKey>,
}

#[derive(Debug, Deserialize)]
struct PublishedKey {
    #[serde(rename = "kid")]
    key_id: Option<String>,
    #[serde(rename = "kty")]
    key_type: Option<String>,
    #[serde(rename = "alg")]
    algorithm: Option<String>,
    #[serde(rename = "n")]
    modulus: Option<String>,
    #[serde(rename = "e")]
    exponent: Option<String>,
}

impl PublishedKey {
    /// An entry must carry a kid and RSA components; an absent key type
    /// or algorithm is taken as RSA/RS256.
    fn into_decoding_key(self) -> AuthResult<(String, DecodingKey)> {
        let kid = self.key_id.ok_or(AuthError::JwksMissingKid)?;

        match self.key_type.as_deref() {
            Some("RSA") | None => {}
            Some(other) => {
                return Err(AuthError::JwksUnsupportedKey {
                    kid,
                    kty: other.to_string(),
                })
            }
        }
        match self.algorithm.as_deref() {
            Some("RS256") | None => {}
            Some(other) => {
                return Err(AuthError::JwksUnsupportedAlg {
                    kid,
                    alg: other.to_string(),
                })
            }
        }

        let (Some(modulus), Some(exponent)) = (&self.modulus, &self.exponent) else {
            return Err(AuthError::JwksMissingComponents(kid));
        };
        let key = DecodingKey::from_rsa_components(modulus, exponent)
            .map_err(|err| AuthError::KeyParse(kid.clone(), err.to_string()))?;
        Ok((kid, key))
    }
}
