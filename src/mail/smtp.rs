use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::SendError;

/// Transport security for the SMTP session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Plaintext connect, upgraded with STARTTLS
    #[default]
    Starttls,
    /// Implicit TLS (SMTPS)
    Tls,
    None,
}

impl std::fmt::Display for SmtpSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmtpSecurity::Starttls => write!(f, "starttls"),
            SmtpSecurity::Tls => write!(f, "tls"),
            SmtpSecurity::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// AUTH is skipped when no username is configured
    pub username: Option<String>,
    pub password: SecretString,
    pub security: SmtpSecurity,
    pub timeout: Duration,
}

/// Hands a finished message to the mail server
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, email: Message) -> Result<(), SendError>;
}

/// One SMTP session per delivery: connect, authenticate, send, quit.
///
/// The transport is built without connection pooling, so the session is
/// closed when `send` returns, whether it succeeded or not.
pub struct SmtpTransport {
    settings: SmtpSettings,
}

impl SmtpTransport {
    pub fn new(settings: SmtpSettings) -> Self {
        Self { settings }
    }

    fn session(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let host = self.settings.host.as_str();
        let builder = match self.settings.security {
            SmtpSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| SendError::Transport(format!("SMTP relay error: {}", e)))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| SendError::Transport(format!("SMTP relay error: {}", e)))?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let mut builder = builder
            .port(self.settings.port)
            .timeout(Some(self.settings.timeout));

        if let Some(username) = &self.settings.username {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                self.settings.password.expose_secret().to_string(),
            ));
        }

        Ok(builder.build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn deliver(&self, email: Message) -> Result<(), SendError> {
        let transport = self.session()?;
        let response = transport
            .send(email)
            .await
            .map_err(|e| classify_smtp_error(&e))?;

        debug!(
            "SMTP {}:{} accepted message: {}",
            self.settings.host,
            self.settings.port,
            response.first_line().unwrap_or_default()
        );
        Ok(())
    }
}

fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> SendError {
    let detail = err.to_string();
    if let Some(code) = err.status() {
        return classify_reply_code(&code.to_string(), detail);
    }
    // Errors raised before the server replied: mechanism negotiation, TLS, I/O
    if err.is_client() && detail.to_lowercase().contains("authentication") {
        SendError::Auth(detail)
    } else {
        SendError::Transport(detail)
    }
}

/// Map an SMTP reply code onto the send taxonomy
fn classify_reply_code(code: &str, detail: String) -> SendError {
    match code {
        "454" | "530" | "534" | "535" | "538" => SendError::Auth(detail),
        // Service not available, the server is closing the channel
        "421" => SendError::Transport(detail),
        _ => SendError::Rejected(detail),
    }
}
