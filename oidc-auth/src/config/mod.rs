use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

pub const DEFAULT_INVITE_CODE_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    /// Public base URL of this gateway, used to build callback URLs.
    pub base_url: String,
    pub database: DatabaseConfig,
    pub state_carrier: StateCarrierConfig,
    pub invite: InviteCodeConfig,
    pub timeouts: TimeoutConfig,
    pub security: SecurityConfig,
    pub providers: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// `DATABASE_URL` value selecting the in-process store instead of PostgreSQL.
pub const MEMORY_DATABASE_URL: &str = "memory://";

impl DatabaseConfig {
    pub fn uses_memory_store(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }
}

#[derive(Debug, Clone)]
pub struct StateCarrierConfig {
    /// Base64 encoded 256-bit AES key.
    pub encryption_key: SecretString,
}

/// Invite code policy.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteCodeConfig {
    pub chars: String,
    pub length: usize,
    /// How long a code stays redeemable after creation.
    pub valid_days: i64,
    /// How long after registration a user may still redeem a code.
    pub register_valid_days: i64,
    pub max_generate_attempts: u32,
}

impl Default for InviteCodeConfig {
    fn default() -> Self {
        Self {
            chars: DEFAULT_INVITE_CODE_CHARS.to_string(),
            length: 8,
            valid_days: 30,
            register_valid_days: 7,
            max_generate_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    pub login_seconds: u64,
    pub lookup_seconds: u64,
}

impl TimeoutConfig {
    pub fn login(&self) -> Duration {
        Duration::from_secs(self.login_seconds)
    }

    pub fn lookup(&self) -> Duration {
        Duration::from_secs(self.lookup_seconds)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_seconds: 15,
            lookup_seconds: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

/// Upstream OAuth/OIDC client registration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    /// Browser-facing base URL the login success pages live under.
    pub endpoint: String,
    /// Cluster-internal base URL of the same provider.
    pub internal_endpoint: String,
    pub scopes: String,
    /// Provider hands out access/refresh tokens the plugin can use directly.
    pub issues_raw_tokens: bool,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_source(common_config, &|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_source(
        common: core_config::Config,
        source: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let env_str = source("ENVIRONMENT").unwrap_or_else(|| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let get = |key: &str, default: Option<&str>| get_env(source, key, default, is_prod);
        let defaults = InviteCodeConfig::default();
        let timeouts = TimeoutConfig::default();

        let providers = get("PROVIDERS", Some(""))?
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| load_provider(source, name, is_prod))
            .collect::<Result<Vec<_>, _>>()?;

        let config = GatewayConfig {
            common,
            environment: environment.clone(),
            service_name: get("SERVICE_NAME", Some("oidc-auth"))?,
            service_version: get("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")))?,
            log_level: get("LOG_LEVEL", Some("info"))?,
            base_url: get("BASE_URL", Some("http://localhost:8080"))?
                .trim_end_matches('/')
                .to_string(),
            database: DatabaseConfig {
                url: get("DATABASE_URL", None)?,
                max_connections: parse_num(&get("DATABASE_MAX_CONNECTIONS", Some("10"))?)?,
                min_connections: parse_num(&get("DATABASE_MIN_CONNECTIONS", Some("1"))?)?,
            },
            state_carrier: StateCarrierConfig {
                encryption_key: SecretString::new(get("STATE_ENCRYPTION_KEY", None)?),
            },
            invite: InviteCodeConfig {
                chars: get("INVITE_CODE_CHARS", Some(defaults.chars.as_str()))?,
                length: parse_num(&get("INVITE_CODE_LENGTH", Some(defaults.length.to_string().as_str()))?)?,
                valid_days: parse_num(&get(
                    "INVITE_CODE_VALID_DAYS",
                    Some(defaults.valid_days.to_string().as_str()),
                )?)?,
                register_valid_days: parse_num(&get(
                    "USER_REGISTER_VALID_DAYS",
                    Some(defaults.register_valid_days.to_string().as_str()),
                )?)?,
                max_generate_attempts: parse_num(&get(
                    "INVITE_CODE_MAX_ATTEMPTS",
                    Some(defaults.max_generate_attempts.to_string().as_str()),
                )?)?,
            },
            timeouts: TimeoutConfig {
                login_seconds: parse_num(&get(
                    "LOGIN_TIMEOUT_SECONDS",
                    Some(timeouts.login_seconds.to_string().as_str()),
                )?)?,
                lookup_seconds: parse_num(&get(
                    "LOOKUP_TIMEOUT_SECONDS",
                    Some(timeouts.lookup_seconds.to_string().as_str()),
                )?)?,
            },
            security: SecurityConfig {
                allowed_origins: get("ALLOWED_ORIGINS", Some("http://localhost:3000"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            providers,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.invite.chars.is_empty() || !self.invite.chars.is_ascii() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_CODE_CHARS must be a non-empty ASCII string"
            )));
        }

        if self.invite.chars.len() > 256 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_CODE_CHARS must not exceed 256 characters"
            )));
        }

        if self.invite.length == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_CODE_LENGTH must be greater than 0"
            )));
        }

        if self.invite.valid_days <= 0 || self.invite.register_valid_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Invite code validity windows must be positive"
            )));
        }

        if self.invite.max_generate_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_CODE_MAX_ATTEMPTS must be greater than 0"
            )));
        }

        if self.timeouts.login_seconds == 0 || self.timeouts.lookup_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Timeouts must be greater than 0"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.database.uses_memory_store() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "In-memory store is not allowed in production"
                )));
            }

            if self.providers.is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "At least one provider must be configured in production"
                )));
            }
        }

        Ok(())
    }
}

fn load_provider(
    source: &dyn Fn(&str) -> Option<String>,
    name: &str,
    is_prod: bool,
) -> Result<ProviderConfig, AppError> {
    let prefix = format!("PROVIDER_{}_", name.to_uppercase().replace('-', "_"));
    let get = |key: &str, default: Option<&str>| {
        get_env(source, &format!("{}{}", prefix, key), default, is_prod)
    };

    let endpoint = get("ENDPOINT", None)?.trim_end_matches('/').to_string();

    Ok(ProviderConfig {
        name: name.to_string(),
        client_id: get("CLIENT_ID", None)?,
        client_secret: SecretString::new(get("CLIENT_SECRET", None)?),
        auth_url: get("AUTH_URL", None)?,
        token_url: get("TOKEN_URL", None)?,
        userinfo_url: get("USERINFO_URL", None)?,
        internal_endpoint: get("INTERNAL_ENDPOINT", Some(endpoint.as_str()))?
            .trim_end_matches('/')
            .to_string(),
        endpoint,
        scopes: get("SCOPES", Some("openid profile email"))?,
        issues_raw_tokens: parse_flag(
            &format!("{}ISSUES_RAW_TOKENS", prefix),
            &get("ISSUES_RAW_TOKENS", Some("false"))?,
        )?,
    })
}

fn get_env(
    source: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: Option<&str>,
    is_prod: bool,
) -> Result<String, AppError> {
    match source(key) {
        Some(val) => Ok(val),
        None => {
            if let Some(def) = default {
                Ok(def.to_string())
            } else if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

/// `true` or `false`, any case. Anything else is a configuration error.
fn parse_flag(key: &str, value: &str) -> Result<bool, AppError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be true or false, got {:?}",
            key,
            other
        ))),
    }
}

fn parse_num<T>(value: &str) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!(e.to_string())))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
