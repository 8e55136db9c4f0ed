//! oidc-auth — OpenID Connect token verification adapter (claims + JWKS signature).
//!
//! Purpose
//! - Verify bearer tokens issued by the configured OIDC provider before the
//!   server runs its role checks.
//! - By default, verifies the RS256 signature against the issuer's JWKS and
//!   validates core claims (issuer, audience = client id, expiry).
//! - For development, signature verification can be disabled; only claims
//!   are checked then.
//!
//! API
//! - `OidcVerifier::new(settings)` then `verifier.verify(token).await`
//!   → `Result<VerifiedToken, AuthError>`
//!
//! Notes
//! - The JWKS location comes from `jwks_uri` when set, otherwise from the
//!   provider's `/.well-known/openid-configuration` document.
//! - Keys are cached per verifier for a short TTL to handle key rotation.
//!   Fetches use the configured read timeout.

use base64::Engine;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Read timeout for discovery and JWKS requests unless configured otherwise.
pub const DEFAULT_JWKS_READ_TIMEOUT: Duration = Duration::from_millis(5000);
const JWKS_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcSettings {
    /// Expected `iss`, e.g. `https://tenant.auth0.com/`.
    pub issuer_uri: String,
    /// Expected audience.
    pub client_id: String,
    /// Explicit JWKS location; discovered from the issuer when `None`.
    pub jwks_uri: Option<String>,
    pub jwks_read_timeout: Duration,
    /// Dev only: check claims without verifying the signature.
    pub insecure_skip_signature: bool,
}

impl OidcSettings {
    pub fn new<I: Into<String>, C: Into<String>>(issuer_uri: I, client_id: C) -> Self {
        Self {
            issuer_uri: issuer_uri.into(),
            client_id: client_id.into(),
            jwks_uri: None,
            jwks_read_timeout: DEFAULT_JWKS_READ_TIMEOUT,
            insecure_skip_signature: false,
        }
    }

    fn discovery_url(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.issuer_uri.trim_end_matches('/')
        )
    }

    // Providers differ on the trailing slash of `iss`; accept both spellings.
    fn accepted_issuers(&self) -> [String; 2] {
        let bare = self.issuer_uri.trim_end_matches('/').to_string();
        let slashed = format!("{bare}/");
        [bare, slashed]
    }
}

/// A token that passed verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub subject: String,
    /// Name used for authorization lookups: `preferred_username`, then
    /// `email`, then `sub`.
    pub caller_name: String,
    pub expires_at: Option<u64>,
    /// Every claim of the token, as sent.
    pub claims: serde_json::Value,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed token")]
    Malformed,
    #[error("invalid token payload: {0}")]
    InvalidPayload(&'static str),
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    Expired,
    #[error("audience mismatch")]
    BadAudience,
    #[error("issuer mismatch")]
    BadIssuer,
    #[error("no key for kid {0}")]
    UnknownKey(String),
    #[error("network or jwks fetch error: {0}")]
    Network(String),
    #[error("invalid verifier configuration: {0}")]
    Config(String),
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    aud: serde_json::Value, // can be string or array
    exp: Option<u64>,
    iss: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
}

impl Claims {
    fn caller_name(&self) -> String {
        self.preferred_username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| self.sub.clone())
    }
}

// ---- JWKS cache & fetch ----

#[derive(Debug, Deserialize)]
struct Discovery {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[allow(dead_code)] // Part of JWKS structure, used for deserialization
    alg: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct JwksCache {
    fetched_at: Option<Instant>,
    jwks_uri: Option<String>,
    keys: HashMap<String, DecodingKey>,
    // Keys supplied up front are never refreshed.
    pinned: bool,
}

impl JwksCache {
    fn fresh_key(&self, kid: &str) -> Option<DecodingKey> {
        let fresh = self.pinned || self.fetched_at.is_some_and(|t| t.elapsed() < JWKS_TTL);
        if fresh {
            self.keys.get(kid).cloned()
        } else {
            None
        }
    }
}

/// Verifies tokens for one issuer/client pair.
pub struct OidcVerifier {
    settings: OidcSettings,
    http: reqwest::Client,
    cache: Mutex<JwksCache>,
}

impl OidcVerifier {
    pub fn new(settings: OidcSettings) -> Result<Self, AuthError> {
        if settings.issuer_uri.trim().is_empty() {
            return Err(AuthError::Config("issuer uri is empty".into()));
        }
        if settings.client_id.trim().is_empty() {
            return Err(AuthError::Config("client id is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(settings.jwks_read_timeout)
            .build()
            .map_err(|e| AuthError::Config(e.to_string()))?;
        let jwks_uri = settings.jwks_uri.clone();
        Ok(Self {
            settings,
            http,
            cache: Mutex::new(JwksCache {
                fetched_at: None,
                jwks_uri,
                keys: HashMap::new(),
                pinned: false,
            }),
        })
    }

    /// Use a fixed JWKS document instead of fetching one (offline setups and
    /// tests).
    pub fn with_static_jwks(settings: OidcSettings, jwks_json: &str) -> Result<Self, AuthError> {
        let jwks: Jwks = serde_json::from_str(jwks_json)
            .map_err(|e| AuthError::Config(format!("jwks json: {e}")))?;
        let verifier = Self::new(settings)?;
        {
            let mut cache = verifier.lock_cache();
            cache.keys = decoding_keys(jwks);
            cache.pinned = true;
        }
        Ok(verifier)
    }

    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    fn lock_cache(&self) -> MutexGuard<'_, JwksCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Verify a bearer token.
    /// - Default: RS256 signature against the JWKS, then iss/aud/exp.
    /// - Dev: with `insecure_skip_signature`, only the claims are checked.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        if self.settings.insecure_skip_signature {
            trace!("oidc-auth: insecure mode – skipping signature verification");
            return verify_claims_only(token, &self.settings);
        }

        let header = decode_header(token).map_err(|_| AuthError::Malformed)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::Malformed);
        }
        let kid = header.kid.ok_or(AuthError::Malformed)?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.settings.client_id.as_str()]);
        validation.set_issuer(&self.settings.accepted_issuers());

        let token_data =
            decode::<serde_json::Value>(token, &key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidToken
                | jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::BadAudience,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::BadIssuer,
                _ => AuthError::Malformed,
            })?;

        into_verified(token_data.claims)
    }

    async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        // Check the cache without holding the lock across the fetch.
        let (cached, pinned, jwks_uri) = {
            let cache = self.lock_cache();
            (cache.fresh_key(kid), cache.pinned, cache.jwks_uri.clone())
        };
        if let Some(key) = cached {
            return Ok(key);
        }
        if pinned {
            return Err(AuthError::UnknownKey(kid.to_string()));
        }

        let jwks_uri = match jwks_uri {
            Some(uri) => uri,
            None => self.discover_jwks_uri().await?,
        };
        debug!(%jwks_uri, "fetching jwks");
        let jwks: Jwks = self
            .http
            .get(&jwks_uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Network(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let mut cache = self.lock_cache();
        cache.keys = decoding_keys(jwks);
        cache.fetched_at = Some(Instant::now());
        cache.jwks_uri = Some(jwks_uri);
        cache
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| AuthError::UnknownKey(kid.to_string()))
    }

    async fn discover_jwks_uri(&self) -> Result<String, AuthError> {
        let url = self.settings.discovery_url();
        debug!(%url, "oidc discovery");
        let doc: Discovery = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AuthError::Network(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        Ok(doc.jwks_uri)
    }
}

fn decoding_keys(jwks: Jwks) -> HashMap<String, DecodingKey> {
    let mut map = HashMap::new();
    for k in jwks.keys.into_iter() {
        if k.kty != "RSA" {
            continue;
        }
        if let (Some(n), Some(e)) = (k.n.as_deref(), k.e.as_deref()) {
            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => {
                    map.insert(k.kid, key);
                }
                Err(err) => warn!(kid = %k.kid, err = %err, "skipping unusable jwk"),
            }
        }
    }
    map
}

fn into_verified(raw: serde_json::Value) -> Result<VerifiedToken, AuthError> {
    let claims: Claims =
        serde_json::from_value(raw.clone()).map_err(|_| AuthError::InvalidPayload("claims"))?;
    Ok(VerifiedToken {
        caller_name: claims.caller_name(),
        subject: claims.sub,
        expires_at: claims.exp,
        claims: raw,
    })
}

fn verify_claims_only(token: &str, settings: &OidcSettings) -> Result<VerifiedToken, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::Malformed);
    }
    let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].as_bytes())
        .map_err(|_| AuthError::Malformed)?;
    let raw: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::InvalidPayload("json"))?;
    let claims: Claims =
        serde_json::from_value(raw.clone()).map_err(|_| AuthError::InvalidPayload("claims"))?;

    // Audience check (string or array)
    let aud = settings.client_id.as_str();
    match &claims.aud {
        serde_json::Value::String(s) if s == aud => {}
        serde_json::Value::Array(arr) if arr.iter().any(|v| v.as_str() == Some(aud)) => {}
        _ => return Err(AuthError::BadAudience),
    }

    // Issuer check, when the token carries one
    if let Some(iss) = &claims.iss {
        if !settings.accepted_issuers().iter().any(|a| a == iss) {
            return Err(AuthError::BadIssuer);
        }
    }

    // Expiry check
    if let Some(exp) = claims.exp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if exp <= now {
            return Err(AuthError::Expired);
        }
    }

    into_verified(raw)
}
