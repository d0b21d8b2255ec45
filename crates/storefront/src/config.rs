//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag
//! - `PAYMENT_GATEWAY_URL` - Endpoint that issues payment redirect URLs
//! - `PAYMENT_CALLBACK_SECRET` - Shared secret for payment callback signatures
//!   (high entropy, no placeholders)
//! - `PAYMENT_CALLBACK_TOLERANCE_SECS` - Max callback timestamp age (default: 300)
//! - `REFUND_WINDOW_DAYS` - Days after order creation a refund may be requested (default: 30)
//! - `TAX_RATE_PERCENT` - Tax rate applied to the discounted subtotal (default: 0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Checkout and refund tuning
    pub checkout: CheckoutSettings,
    /// Payment gateway configuration
    pub payment: PaymentConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
}

/// Checkout and refund tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    /// Tax applied to `subtotal - discount`, in percent.
    pub tax_rate_percent: Decimal,
    /// Days after order creation during which a refund may be requested.
    pub refund_window_days: i64,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            tax_rate_percent: Decimal::ZERO,
            refund_window_days: 30,
        }
    }
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact the callback secret.
#[derive(Clone)]
pub struct PaymentConfig {
    /// Endpoint that issues redirect URLs; `None` disables online payment URLs
    pub gateway_url: Option<Url>,
    /// Shared secret for callback signatures; `None` rejects every callback
    pub callback_secret: Option<SecretString>,
    /// Max accepted age of a callback timestamp
    pub callback_tolerance_secs: i64,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("gateway_url", &self.gateway_url.as_ref().map(Url::as_str))
            .field(
                "callback_secret",
                &self.callback_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("callback_tolerance_secs", &self.callback_tolerance_secs)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("STOREFRONT_PORT", "3000")?;

        Ok(Self {
            database_url,
            host,
            port,
            checkout: CheckoutSettings::from_env()?,
            payment: PaymentConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Defaults with no payment gateway and no callback secret.
    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            database_url: SecretString::from("postgres://localhost/stockroom_test"),
            host: IpAddr::from([127, 0, 0, 1]),
            port: 3000,
            checkout: CheckoutSettings::default(),
            payment: PaymentConfig {
                gateway_url: None,
                callback_secret: None,
                callback_tolerance_secs: 300,
            },
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl CheckoutSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let tax_rate_percent = parse_env_or_default::<Decimal>("TAX_RATE_PERCENT", "0")?;
        if tax_rate_percent.is_sign_negative() || tax_rate_percent > Decimal::ONE_HUNDRED {
            return Err(ConfigError::InvalidEnvVar(
                "TAX_RATE_PERCENT".to_string(),
                format!("must be between 0 and 100 (got {tax_rate_percent})"),
            ));
        }

        let refund_window_days = parse_env_or_default::<i64>("REFUND_WINDOW_DAYS", "30")?;
        if refund_window_days < 0 {
            return Err(ConfigError::InvalidEnvVar(
                "REFUND_WINDOW_DAYS".to_string(),
                "must not be negative".to_string(),
            ));
        }

        Ok(Self {
            tax_rate_percent,
            refund_window_days,
        })
    }
}

impl PaymentConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let gateway_url = get_optional_env("PAYMENT_GATEWAY_URL")
            .map(|raw| {
                Url::parse(&raw).map_err(|e| {
                    ConfigError::InvalidEnvVar("PAYMENT_GATEWAY_URL".to_string(), e.to_string())
                })
            })
            .transpose()?;

        let callback_secret = get_optional_env("PAYMENT_CALLBACK_SECRET")
            .map(|value| {
                validate_secret_strength(&value, "PAYMENT_CALLBACK_SECRET")?;
                Ok::<_, ConfigError>(SecretString::from(value))
            })
            .transpose()?;

        Ok(Self {
            gateway_url,
            callback_secret,
            callback_tolerance_secs: parse_env_or_default::<i64>(
                "PAYMENT_CALLBACK_TOLERANCE_SECS",
                "300",
            )?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable, treating empty as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default`.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-callback-key", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_checkout_settings_default() {
        let settings = CheckoutSettings::default();
        assert_eq!(settings.refund_window_days, 30);
        assert_eq!(settings.tax_rate_percent, Decimal::ZERO);
    }

    #[test]
    fn test_socket_addr() {
        let config = StorefrontConfig {
            database_url: SecretString::from("postgres://localhost/test"),
            host: "127.0.0.1".parse().unwrap(),
            port: 3000,
            checkout: CheckoutSettings::default(),
            payment: PaymentConfig {
                gateway_url: None,
                callback_secret: None,
                callback_tolerance_secs: 300,
            },
            sentry_dsn: None,
            sentry_environment: None,
        };

        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
    }

    #[test]
    fn test_payment_config_debug_redacts_secret() {
        let config = PaymentConfig {
            gateway_url: Some(Url::parse("https://pay.test/sessions").unwrap()),
            callback_secret: Some(SecretString::from("k8#Lq2!vZ9@wR4$t")),
            callback_tolerance_secs: 300,
        };

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("https://pay.test/sessions"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("k8#Lq2!vZ9@wR4$t"));
    }
}
