use std::time::Duration;

/// Runtime settings for bearer-token verification.
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// When false, verification degrades to trusting the identity headers.
    pub enabled: bool,
    /// URL the JSON Web Key set is fetched from.
    pub jwks_url: String,
    /// Accepted audiences; any-of match. Empty disables the audience check.
    pub audience: Vec<String>,
    /// Expected issuer claim. `None` disables the issuer check.
    pub issuer: Option<String>,
    /// Claim carrying the tenant identifier.
    pub tenant_claim: String,
    /// Claim carrying the user identifier.
    pub user_claim: String,
    /// How long a fetched key set is served before a refresh.
    pub keyset_ttl: Duration,
    /// Skip TLS certificate verification on the JWKS fetch.
    pub insecure_tls: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            jwks_url: String::new(),
            audience: Vec::new(),
            issuer: None,
            tenant_claim: "tenant".to_string(),
            user_claim: "sub".to_string(),
            keyset_ttl: Duration::from_secs(3600),
            insecure_tls: false,
        }
    }
}
