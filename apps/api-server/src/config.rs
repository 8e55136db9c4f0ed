//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time. OIDC client settings come
//! from a properties file (`OIDC_PROPERTIES`) when `AUTH_PROVIDER=oidc`.

use axum::http::HeaderValue;
use concurrency::NotificationMode;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Authentication provider mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthProvider {
    /// Debug mode: accepts X-Debug-User header (DO NOT USE IN PRODUCTION)
    None,
    /// OpenID Connect: verifies bearer tokens from the configured issuer
    Oidc,
}

impl AuthProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("oidc") {
            Self::Oidc
        } else {
            Self::None
        }
    }
}

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("sqlite") {
            Self::Sqlite
        } else {
            Self::Memory
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// OIDC client settings read from the properties file.
#[derive(Clone, PartialEq, Eq)]
pub struct OidcConfig {
    pub domain: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub issuer_uri: String,
}

// Keeps the client secret out of logs.
impl fmt::Debug for OidcConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcConfig")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("issuer_uri", &self.issuer_uri)
            .finish()
    }
}

impl OidcConfig {
    /// Read `domain`, `clientId`, `clientSecret` and `issuerUri` from a
    /// properties file. `issuerUri` defaults to `https://{domain}/`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError {
            field: "OIDC_PROPERTIES",
            message: format!("cannot read '{}': {}", path.display(), e),
        })?;
        Self::from_properties(&parse_properties(&text))
    }

    fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |k: &str| props.get(k).filter(|v| !v.is_empty()).cloned();
        let domain = get("domain");
        let issuer_uri = get("issuerUri")
            .or_else(|| domain.as_ref().map(|d| format!("https://{d}/")))
            .ok_or_else(|| ConfigError {
                field: "issuerUri",
                message: "Required when AUTH_PROVIDER=oidc (or set domain)".into(),
            })?;
        let client_id = get("clientId").ok_or_else(|| ConfigError {
            field: "clientId",
            message: "Required when AUTH_PROVIDER=oidc".into(),
        })?;
        Ok(Self {
            domain,
            client_id,
            client_secret: get("clientSecret"),
            issuer_uri,
        })
    }
}

/// Minimal `.properties` reader: `key=value` or `key: value` lines, `#` and
/// `!` comments, surrounding whitespace trimmed.
fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('!'))
        .filter_map(|l| {
            let idx = l.find(['=', ':'])?;
            Some((l[..idx].trim().to_string(), l[idx + 1..].trim().to_string()))
        })
        .collect()
}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3001)
    pub port: u16,
    /// Authentication provider
    pub auth_provider: AuthProvider,
    /// OIDC client settings (present iff auth_provider is Oidc)
    pub oidc: Option<OidcConfig>,
    /// Whether to skip token signature verification (dev only)
    pub insecure_skip_signature: bool,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// SQLite database path (when using sqlite storage)
    pub db_path: PathBuf,
    /// Directory receiving multipart uploads
    pub upload_dir: PathBuf,
    /// Log format
    pub log_format: LogFormat,
    /// Concurrent submissions allowed on the managed executor
    pub max_async: usize,
    /// Bound on façade-backed endpoints
    pub async_timeout: Duration,
    /// Simulated work duration of `/api/async` and friends
    pub async_work_delay: Duration,
    /// Bound on one event notification
    pub notification_timeout: Duration,
    pub notification_mode: NotificationMode,
    /// Insert sample records at startup
    pub seed_samples: bool,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Port
        let port = parse_num(&var, "PORT", 3001u16)?;

        // Auth provider
        let auth_provider =
            AuthProvider::from_str(&var("AUTH_PROVIDER").unwrap_or_else(|| "none".into()));

        // OIDC properties are only required (and read) in oidc mode
        let oidc = if auth_provider == AuthProvider::Oidc {
            let path = var("OIDC_PROPERTIES").unwrap_or_else(|| "./oidc.properties".into());
            Some(OidcConfig::load(Path::new(&path))?)
        } else {
            None
        };

        let insecure_skip_signature = var("OIDC_INSECURE_SKIP_SIGNATURE")
            .map(|s| http_common::is_truthy(&s))
            .unwrap_or(false);

        // CORS allow origin
        let cors_origin_str = var("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage provider
        let storage_provider =
            StorageProvider::from_str(&var("STORAGE_PROVIDER").unwrap_or_else(|| "sqlite".into()));
        let db_path = PathBuf::from(var("DB_PATH").unwrap_or_else(|| "./data/demo.db".into()));
        let upload_dir = var("UPLOAD_DIR")
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("demo-uploads"));

        // Log format
        let log_format =
            LogFormat::from_str(&var("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        // Executor and timing
        let max_async = parse_num(&var, "MAX_ASYNC", concurrency::DEFAULT_MAX_ASYNC)?;
        if max_async == 0 {
            return Err(ConfigError {
                field: "MAX_ASYNC",
                message: "must be at least 1".into(),
            });
        }
        let async_timeout = Duration::from_millis(parse_num(&var, "ASYNC_TIMEOUT_MS", 1000u64)?);
        let async_work_delay =
            Duration::from_millis(parse_num(&var, "ASYNC_WORK_DELAY_MS", 500u64)?);
        let notification_timeout =
            Duration::from_millis(parse_num(&var, "NOTIFICATION_TIMEOUT_MS", 1000u64)?);
        let notification_mode =
            NotificationMode::from_str(&var("NOTIFICATION_MODE").unwrap_or_default());

        let seed_samples = var("SEED_SAMPLES")
            .map(|s| http_common::is_truthy(&s))
            .unwrap_or(true);

        Ok(Self {
            port,
            auth_provider,
            oidc,
            insecure_skip_signature,
            cors_allow_origin,
            storage_provider,
            db_path,
            upload_dir,
            log_format,
            max_async,
            async_timeout,
            async_work_delay,
            notification_timeout,
            notification_mode,
            seed_samples,
        })
    }

    /// Log warnings about insecure configuration.
    pub fn warn_if_insecure(&self) {
        if self.auth_provider == AuthProvider::None {
            tracing::warn!(
                "AUTH_PROVIDER=none: Using debug authentication via X-Debug-User header. \
                 DO NOT USE IN PRODUCTION."
            );
        }
        if self.insecure_skip_signature {
            tracing::warn!(
                "OIDC_INSECURE_SKIP_SIGNATURE is set: token signature verification \
                 is DISABLED. DO NOT USE IN PRODUCTION."
            );
        }
        if self.cors_allow_origin == HeaderValue::from_static("*") {
            tracing::warn!("CORS_ALLOW_ORIGIN=*: any origin may call the API.");
        }
    }
}

fn parse_num<F, T>(var: &F, field: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match var(field) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError {
            field,
            message: format!("Invalid number '{}': {}", raw, e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn auth_provider_parsing() {
        assert_eq!(AuthProvider::from_str("none"), AuthProvider::None);
        assert_eq!(AuthProvider::from_str("OIDC"), AuthProvider::Oidc);
        assert_eq!(AuthProvider::from_str("oidc"), AuthProvider::Oidc);
        assert_eq!(AuthProvider::from_str("anything"), AuthProvider::None);
    }

    #[test]
    fn storage_provider_parsing() {
        assert_eq!(StorageProvider::from_str("memory"), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("SQLITE"), StorageProvider::Sqlite);
        assert_eq!(StorageProvider::from_str("anything"), StorageProvider::Memory);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("anything"), LogFormat::Pretty);
    }

    #[test]
    fn defaults_apply_without_env() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.auth_provider, AuthProvider::None);
        assert!(cfg.oidc.is_none());
        assert_eq!(cfg.storage_provider, StorageProvider::Sqlite);
        assert_eq!(cfg.db_path, PathBuf::from("./data/demo.db"));
        assert_eq!(cfg.upload_dir, env::temp_dir().join("demo-uploads"));
        assert_eq!(cfg.max_async, 5);
        assert_eq!(cfg.async_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.async_work_delay, Duration::from_millis(500));
        assert_eq!(cfg.notification_timeout, Duration::from_millis(1000));
        assert_eq!(cfg.notification_mode, NotificationMode::Serial);
        assert!(cfg.seed_samples);
        assert!(!cfg.insecure_skip_signature);
    }

    #[test]
    fn upload_dir_from_env() {
        let cfg = Config::from_lookup(lookup(&[("UPLOAD_DIR", "/srv/uploads")])).unwrap();
        assert_eq!(cfg.upload_dir, PathBuf::from("/srv/uploads"));
    }

    #[test]
    fn invalid_numbers_fail_fast() {
        let err = Config::from_lookup(lookup(&[("ASYNC_TIMEOUT_MS", "soon")])).unwrap_err();
        assert_eq!(err.field, "ASYNC_TIMEOUT_MS");
        let err = Config::from_lookup(lookup(&[("MAX_ASYNC", "0")])).unwrap_err();
        assert_eq!(err.field, "MAX_ASYNC");
        let err = Config::from_lookup(lookup(&[("PORT", "99999")])).unwrap_err();
        assert_eq!(err.field, "PORT");
    }

    #[test]
    fn oidc_mode_requires_properties_file() {
        let err = Config::from_lookup(lookup(&[
            ("AUTH_PROVIDER", "oidc"),
            ("OIDC_PROPERTIES", "/definitely/missing/oidc.properties"),
        ]))
        .unwrap_err();
        assert_eq!(err.field, "OIDC_PROPERTIES");
    }

    #[test]
    fn oidc_properties_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oidc.properties");
        std::fs::write(
            &path,
            "# auth0 tenant\ndomain=dev-tenant.us.auth0.com\nclientId = abc123\nclientSecret=s3cret\n",
        )
        .unwrap();
        let cfg = Config::from_lookup(lookup(&[
            ("AUTH_PROVIDER", "oidc"),
            ("OIDC_PROPERTIES", path.to_str().unwrap()),
        ]))
        .unwrap();
        let oidc = cfg.oidc.unwrap();
        assert_eq!(oidc.issuer_uri, "https://dev-tenant.us.auth0.com/");
        assert_eq!(oidc.client_id, "abc123");
        assert_eq!(oidc.client_secret.as_deref(), Some("s3cret"));
        assert!(!format!("{oidc:?}").contains("s3cret"));
    }

    #[test]
    fn oidc_properties_need_client_id_and_issuer() {
        let props = parse_properties("domain=x.example\n");
        assert_eq!(OidcConfig::from_properties(&props).unwrap_err().field, "clientId");
        let props = parse_properties("clientId=abc\n");
        assert_eq!(OidcConfig::from_properties(&props).unwrap_err().field, "issuerUri");
        let props = parse_properties("clientId: abc\nissuerUri: https://idp.example/realms/demo\n");
        let oidc = OidcConfig::from_properties(&props).unwrap();
        assert_eq!(oidc.issuer_uri, "https://idp.example/realms/demo");
    }
}
