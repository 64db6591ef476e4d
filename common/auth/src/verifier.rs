use std::time::Instant;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::claims::{claim_string, Identity};
use crate::config::AuthOptions;
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksFetcher;

const TENANT_HEADER: &str = "x-tenant";
const USER_HEADER: &str = "x-user";

#[derive(Default)]
struct KeySet {
    keys: Vec<(String, DecodingKey)>,
    fetched_at: Option<Instant>,
}

/// Verifies bearer tokens against a lazily refreshed JWKS key set and
/// resolves the caller's tenant/user identity.
///
/// Disabled mode trusts the `X-Tenant` / `X-User` headers verbatim, which
/// is also the fallback for claims the token does not carry.
pub struct Authenticator {
    options: AuthOptions,
    jwks: Option<JwksFetcher>,
    keys: RwLock<KeySet>,
}

impl Authenticator {
    /// Header-trusting authenticator for deployments without an IdP.
    pub fn disabled() -> Self {
        Self {
            options: AuthOptions::default(),
            jwks: None,
            keys: RwLock::default(),
        }
    }

    /// Builds the authenticator and performs the initial key-set fetch.
    /// A failed fetch is fatal here; later refresh failures surface per
    /// request.
    pub async fn connect(options: AuthOptions) -> AuthResult<Self> {
        if !options.enabled {
            return Ok(Self {
                options,
                jwks: None,
                keys: RwLock::default(),
            });
        }
        if options.jwks_url.is_empty() {
            return Err(AuthError::MissingJwksUrl);
        }

        let fetcher = JwksFetcher::new(options.jwks_url.clone(), options.insecure_tls)?;
        let authenticator = Self {
            options,
            jwks: Some(fetcher),
            keys: RwLock::default(),
        };
        authenticator.refresh().await?;
        Ok(authenticator)
    }

    pub fn enabled(&self) -> bool {
        self.options.enabled
    }

    /// Resolves `(tenant, user)` for the request.
    pub async fn verify(&self, headers: &HeaderMap) -> AuthResult<Identity> {
        let fallback = Identity {
            tenant: header_value(headers, TENANT_HEADER),
            user: header_value(headers, USER_HEADER),
        };
        if !self.options.enabled {
            return Ok(fallback);
        }

        let header = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AuthError::MissingAuthorization)?;
        let (scheme, token) = header.split_once(' ').ok_or(AuthError::InvalidScheme)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(AuthError::InvalidScheme);
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let claims = self.decode_token(token).await?;
        let tenant = claim_string(&claims, &self.options.tenant_claim)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback.tenant);
        let user = claim_string(&claims, &self.options.user_claim)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback.user);

        Ok(Identity { tenant, user })
    }

    async fn decode_token(&self, token: &str) -> AuthResult<Value> {
        let header =
            decode_header(token).map_err(|err| AuthError::InvalidHeader(err.to_string()))?;
        let keys = self.current_keys().await?;
        let key = match header.kid {
            Some(ref kid) => keys
                .iter()
                .find(|(id, _)| id == kid)
                .map(|(_, key)| key.clone())
                .ok_or_else(|| AuthError::UnknownKeyId(kid.clone()))?,
            None if keys.len() == 1 => keys[0].1.clone(),
            None => return Err(AuthError::MissingKeyId),
        };

        let mut validation = Validation::new(Algorithm::RS256);
        if self.options.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.options.audience);
        }
        if let Some(issuer) = &self.options.issuer {
            validation.set_issuer(std::slice::from_ref(issuer));
        }

        let data = decode::<Value>(token, &key, &validation)?;
        debug!(kid = ?header.kid, "verified bearer token");
        Ok(data.claims)
    }

    /// Serves the cached key set while it is within TTL; otherwise a
    /// refresh runs under the exclusive lock and readers wait for it.
    async fn current_keys(&self) -> AuthResult<Vec<(String, DecodingKey)>> {
        {
            let guard = self.keys.read().await;
            if let Some(fetched_at) = guard.fetched_at {
                if fetched_at.elapsed() < self.options.keyset_ttl {
                    return Ok(guard.keys.clone());
                }
            }
        }

        self.refresh().await?;

        let guard = self.keys.read().await;
        Ok(guard.keys.clone())
    }

    /// Replaces the key set from the JWKS endpoint.
    pub async fn refresh(&self) -> AuthResult<usize> {
        let Some(fetcher) = &self.jwks else {
            return Ok(0);
        };

        let mut guard = self.keys.write().await;
        if let Some(fetched_at) = guard.fetched_at {
            // Another task refreshed while we waited for the lock.
            if fetched_at.elapsed() < self.options.keyset_ttl {
                return Ok(guard.keys.len());
            }
        }

        let keys = fetcher.fetch().await?;
        let count = keys.len();
        guard.keys = keys;
        guard.fetched_at = Some(Instant::now());
        debug!(count, jwks_url = fetcher.url(), "refreshed JWKS key set");
        Ok(count)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}
