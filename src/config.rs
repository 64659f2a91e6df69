use anyhow::{bail, Context, Result};
use lettre::message::Mailbox;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::access::AllowlistGate;
use crate::mail::compose::{MailSettings, SubjectPolicy};
use crate::mail::smtp::{SmtpSecurity, SmtpSettings};
use crate::relay::RelayTimeouts;

/// Fully validated runtime configuration, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub smtp: SmtpConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: SecretString,
    pub security: SmtpSecurity,
    pub from_address: Mailbox,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub recipient: Mailbox,
    pub subject: SubjectPolicy,
    pub max_file_bytes: u64,
    pub fetch_timeout: Duration,
    pub send_timeout: Duration,
    pub temp_dir: PathBuf,
}

// ── Raw TOML structs (every field optional so env vars can fill the gaps) ─────

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    telegram: RawTelegram,
    #[serde(default)]
    smtp: RawSmtp,
    #[serde(default)]
    delivery: RawDelivery,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawTelegram {
    bot_token: Option<String>,
    allowed_user_ids: Option<Vec<u64>>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawSmtp {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    security: Option<SmtpSecurity>,
    from_address: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawDelivery {
    recipient: Option<String>,
    subject: Option<String>,
    max_file_bytes: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    send_timeout_secs: Option<u64>,
    temp_dir: Option<PathBuf>,
}

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 60;
/// The Bot API will not serve files above 20 MiB
const DEFAULT_MAX_FILE_BYTES: u64 = 20 * 1024 * 1024;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 180;

impl Config {
    /// Read `path` (if present) and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?,
            )
        } else {
            info!(
                "Config file {} not found, using environment only",
                path.display()
            );
            None
        };

        let config = Self::from_sources(content.as_deref(), |name| std::env::var(name).ok())
            .with_context(|| format!("Invalid configuration ({})", path.display()))?;

        if !config.delivery.temp_dir.exists() {
            std::fs::create_dir_all(&config.delivery.temp_dir).with_context(|| {
                format!(
                    "Failed to create temp directory: {}",
                    config.delivery.temp_dir.display()
                )
            })?;
        }

        Ok(config)
    }

    /// Build a config from optional TOML text and an environment lookup
    pub fn from_sources(content: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut raw: RawConfig = match content {
            Some(text) => toml::from_str(text).context("Failed to parse config file")?,
            None => RawConfig::default(),
        };
        apply_env(&mut raw, &env)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self> {
        let RawConfig {
            telegram,
            smtp,
            delivery,
        } = raw;

        let allowed_user_ids = telegram.allowed_user_ids.unwrap_or_default();

        let telegram = TelegramConfig {
            bot_token: SecretString::from(require(
                telegram.bot_token,
                "telegram.bot_token",
                "TELEGRAM_BOT_TOKEN",
            )?),
            allowed_user_ids,
        };

        let from_address = require(smtp.from_address, "smtp.from_address", "SMTP_FROM_EMAIL")?;
        let smtp = SmtpConfig {
            host: require(smtp.host, "smtp.host", "SMTP_HOST")?,
            port: smtp.port.unwrap_or(DEFAULT_SMTP_PORT),
            username: smtp.username.filter(|u| !u.trim().is_empty()),
            password: SecretString::from(smtp.password.unwrap_or_default()),
            security: smtp.security.unwrap_or_default(),
            from_address: parse_mailbox(&from_address, "smtp.from_address")?,
            timeout: seconds(
                smtp.timeout_secs.unwrap_or(DEFAULT_SMTP_TIMEOUT_SECS),
                "smtp.timeout_secs",
            )?,
        };

        let recipient = require(delivery.recipient, "delivery.recipient", "KINDLE_RECIPIENT_EMAIL")?;
        let max_file_bytes = delivery.max_file_bytes.unwrap_or(DEFAULT_MAX_FILE_BYTES);
        if max_file_bytes == 0 {
            bail!("delivery.max_file_bytes must be greater than zero");
        }
        let delivery = DeliveryConfig {
            recipient: parse_mailbox(&recipient, "delivery.recipient")?,
            subject: SubjectPolicy::parse(
                delivery
                    .subject
                    .as_deref()
                    .unwrap_or(SubjectPolicy::CONVERT_KEYWORD),
            ),
            max_file_bytes,
            fetch_timeout: seconds(
                delivery
                    .fetch_timeout_secs
                    .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
                "delivery.fetch_timeout_secs",
            )?,
            send_timeout: seconds(
                delivery.send_timeout_secs.unwrap_or(DEFAULT_SEND_TIMEOUT_SECS),
                "delivery.send_timeout_secs",
            )?,
            temp_dir: delivery.temp_dir.unwrap_or_else(std::env::temp_dir),
        };

        Ok(Self {
            telegram,
            smtp,
            delivery,
        })
    }

    pub fn gate(&self) -> AllowlistGate {
        AllowlistGate::new(self.telegram.allowed_user_ids.iter().copied())
    }

    pub fn mail_settings(&self) -> MailSettings {
        MailSettings {
            from: self.smtp.from_address.clone(),
            recipient: self.delivery.recipient.clone(),
            subject: self.delivery.subject.clone(),
        }
    }

    pub fn smtp_settings(&self) -> SmtpSettings {
        SmtpSettings {
            host: self.smtp.host.clone(),
            port: self.smtp.port,
            username: self.smtp.username.clone(),
            password: self.smtp.password.clone(),
            security: self.smtp.security,
            timeout: self.smtp.timeout,
        }
    }

    pub fn relay_timeouts(&self) -> RelayTimeouts {
        RelayTimeouts {
            fetch: self.delivery.fetch_timeout,
            send: self.delivery.send_timeout,
        }
    }
}

/// Load `KEY=value` lines from a dotenv file into the process environment.
///
/// Variables that are already set keep their value. Returns `false` when
/// the file does not exist.
pub fn load_env_file(path: &Path) -> Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(e) if e.not_found() => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

/// Overlay the deployment's environment variables on top of the file values
fn apply_env(raw: &mut RawConfig, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
    let var = |name: &str| {
        env(name)
            .map(|v| strip_quotes(v.trim()).to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(v) = var("TELEGRAM_BOT_TOKEN") {
        raw.telegram.bot_token = Some(v);
    }
    if let Some(v) = var("ALLOWED_TELEGRAM_IDS") {
        raw.telegram.allowed_user_ids = Some(parse_allowed_users(&v)?);
    }
    if let Some(v) = var("SMTP_HOST") {
        raw.smtp.host = Some(v);
    }
    if let Some(v) = var("SMTP_PORT") {
        let port = v
            .parse::<u16>()
            .with_context(|| format!("Invalid SMTP_PORT '{}'", v))?;
        raw.smtp.port = Some(port);
    }
    if let Some(v) = var("SMTP_USERNAME") {
        raw.smtp.username = Some(v);
    }
    if let Some(v) = var("SMTP_PASSWORD") {
        raw.smtp.password = Some(v);
    }
    if let Some(v) = var("SMTP_STARTTLS") {
        raw.smtp.security = Some(if parse_bool(&v) {
            SmtpSecurity::Starttls
        } else {
            SmtpSecurity::None
        });
    }
    if let Some(v) = var("SMTP_FROM_EMAIL") {
        raw.smtp.from_address = Some(v);
    }
    if let Some(v) = var("KINDLE_RECIPIENT_EMAIL") {
        raw.delivery.recipient = Some(v);
    }
    if let Some(v) = var("EMAIL_SUBJECT") {
        raw.delivery.subject = Some(v);
    }

    Ok(())
}

fn require(value: Option<String>, key: &str, env_name: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => bail!("Missing required setting {} (or env {})", key, env_name),
    }
}

fn parse_mailbox(value: &str, key: &str) -> Result<Mailbox> {
    value
        .parse::<Mailbox>()
        .with_context(|| format!("Invalid email address in {}: '{}'", key, value))
}

fn seconds(value: u64, key: &str) -> Result<Duration> {
    if value == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(Duration::from_secs(value))
}

fn parse_allowed_users(value: &str) -> Result<Vec<u64>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            chunk.parse::<u64>().with_context(|| {
                format!("Invalid Telegram user id '{}' in ALLOWED_TELEGRAM_IDS", chunk)
            })
        })
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == bytes[bytes.len() - 1]
        && (bytes[0] == b'"' || bytes[0] == b'\'')
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    const FULL: &str = r#"
[telegram]
bot_token = "123:ABC"
allowed_user_ids = [111, 222]

[smtp]
host = "smtp.example.com"
username = "me@example.com"
password = "app-password"
from_address = "me@example.com"

[delivery]
recipient = "reader@kindle.com"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_file_with_defaults() {
        let config = Config::from_sources(Some(FULL), no_env).unwrap();

        assert_eq!(config.telegram.bot_token.expose_secret(), "123:ABC");
        assert_eq!(config.telegram.allowed_user_ids, vec![111, 222]);
        assert_eq!(config.smtp.port, 587);
        assert_eq!(config.smtp.security, SmtpSecurity::Starttls);
        assert_eq!(config.smtp.username.as_deref(), Some("me@example.com"));
        assert_eq!(config.smtp.timeout, Duration::from_secs(60));
        assert_eq!(config.delivery.subject, SubjectPolicy::Convert);
        assert_eq!(config.delivery.max_file_bytes, 20 * 1024 * 1024);
        assert_eq!(config.delivery.fetch_timeout, Duration::from_secs(120));
        assert_eq!(config.delivery.recipient.email.to_string(), "reader@kindle.com");
    }

    #[test]
    fn test_env_overrides_file() {
        let env = env_of(&[
            ("ALLOWED_TELEGRAM_IDS", " 5, 6 ,, 7 "),
            ("SMTP_PORT", "2525"),
            ("SMTP_STARTTLS", "false"),
            ("EMAIL_SUBJECT", "\"Book delivery\""),
            ("SMTP_HOST", "   "),
        ]);
        let config = Config::from_sources(Some(FULL), env).unwrap();

        assert_eq!(config.telegram.allowed_user_ids, vec![5, 6, 7]);
        assert_eq!(config.smtp.port, 2525);
        assert_eq!(config.smtp.security, SmtpSecurity::None);
        assert_eq!(
            config.delivery.subject,
            SubjectPolicy::Literal("Book delivery".into())
        );
        // Blank values are ignored
        assert_eq!(config.smtp.host, "smtp.example.com");
    }

    #[test]
    fn test_environment_only() {
        let env = env_of(&[
            ("TELEGRAM_BOT_TOKEN", "tok"),
            ("ALLOWED_TELEGRAM_IDS", "42"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_FROM_EMAIL", "me@example.com"),
            ("KINDLE_RECIPIENT_EMAIL", "reader@kindle.com"),
        ]);
        let config = Config::from_sources(None, env).unwrap();

        assert_eq!(config.smtp.port, 465);
        assert!(config.smtp.username.is_none());
        assert!(config.gate().is_authorized(crate::platform::Identity(42)));
    }

    #[test]
    fn test_missing_required_setting_is_named() {
        let err = Config::from_sources(Some("[telegram]\nbot_token = \"t\"\n"), no_env)
            .unwrap_err()
            .to_string();
        assert!(err.contains("SMTP_FROM_EMAIL") || err.contains("smtp"), "{}", err);
    }

    #[test]
    fn test_empty_allowlist_is_valid() {
        let content = FULL.replace("allowed_user_ids = [111, 222]", "allowed_user_ids = []");
        let config = Config::from_sources(Some(&content), no_env).unwrap();
        assert!(config.gate().is_empty());
    }

    #[test]
    fn test_invalid_user_id_is_rejected() {
        let err = Config::from_sources(Some(FULL), env_of(&[("ALLOWED_TELEGRAM_IDS", "1,abc")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("'abc'"));
    }

    #[test]
    fn test_invalid_recipient_is_rejected() {
        let err = Config::from_sources(
            Some(FULL),
            env_of(&[("KINDLE_RECIPIENT_EMAIL", "not an address")]),
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("delivery.recipient"));
    }

    #[test]
    fn test_security_and_limits_from_file() {
        let content = FULL
            .replace(
                "from_address = \"me@example.com\"",
                "from_address = \"me@example.com\"\nsecurity = \"tls\"\nport = 465",
            )
            .replace(
                "recipient = \"reader@kindle.com\"",
                "recipient = \"reader@kindle.com\"\nsubject = \"convert\"\nmax_file_bytes = 1024",
            );
        let config = Config::from_sources(Some(&content), no_env).unwrap();
        assert_eq!(config.smtp.security, SmtpSecurity::Tls);
        assert_eq!(config.smtp.port, 465);
        assert_eq!(config.delivery.max_file_bytes, 1024);
    }

    #[test]
    fn test_zero_limits_are_rejected() {
        let content = FULL.replace(
            "recipient = \"reader@kindle.com\"",
            "recipient = \"reader@kindle.com\"\nfetch_timeout_secs = 0",
        );
        assert!(Config::from_sources(Some(&content), no_env).is_err());
    }

    #[test]
    fn test_unknown_keys_in_sections_are_rejected() {
        let smtp_typo = FULL.replace(
            "host = \"smtp.example.com\"",
            "host = \"smtp.example.com\"\nstarttls = true",
        );
        let err = Config::from_sources(Some(&smtp_typo), no_env).unwrap_err();
        assert!(format!("{:#}", err).contains("starttls"), "{:#}", err);

        let delivery_typo = FULL.replace(
            "recipient = \"reader@kindle.com\"",
            "recipient = \"reader@kindle.com\"\nmax_file_size = 10",
        );
        assert!(Config::from_sources(Some(&delivery_typo), no_env).is_err());

        let telegram_typo = FULL.replace(
            "allowed_user_ids = [111, 222]",
            "allowed_user_ids = [111, 222]\nallowed_users = [333]",
        );
        let err = Config::from_sources(Some(&telegram_typo), no_env).unwrap_err();
        assert!(format!("{:#}", err).contains("allowed_users"), "{:#}", err);
    }

    #[test]
    fn test_env_file_fills_unset_variables_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# deployment secrets\n\
             KINDLE_RELAY_TEST_FROM_FILE=\"from file\"\n\
             KINDLE_RELAY_TEST_PRESET='from file'\n",
        )
        .unwrap();
        std::env::set_var("KINDLE_RELAY_TEST_PRESET", "from process");

        assert!(load_env_file(&path).unwrap());
        assert_eq!(
            std::env::var("KINDLE_RELAY_TEST_FROM_FILE").unwrap(),
            "from file"
        );
        assert_eq!(
            std::env::var("KINDLE_RELAY_TEST_PRESET").unwrap(),
            "from process"
        );
    }

    #[test]
    fn test_missing_env_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!load_env_file(&dir.path().join(".env")).unwrap());
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("\"abc"), "\"abc");
        assert_eq!(strip_quotes("\""), "\"");
    }
}
