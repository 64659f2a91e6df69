pub mod compose;
pub mod smtp;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::fetcher::FetchedFile;
use crate::mail::compose::{MailSettings, OutboundMessage};
use crate::mail::smtp::MailTransport;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("SMTP authentication failed: {0}")]
    Auth(String),
    #[error("SMTP transport error: {0}")]
    Transport(String),
    #[error("message rejected: {0}")]
    Rejected(String),
}

impl SendError {
    /// Short cause shown to the sender; transport detail stays in the logs
    pub fn label(&self) -> &'static str {
        match self {
            SendError::Auth(_) => "mail server authentication failed",
            SendError::Transport(_) => "the mail server could not be reached",
            SendError::Rejected(_) => "the mail server rejected the message",
        }
    }
}

/// Emails a fetched document to the configured recipient
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, file: &FetchedFile) -> Result<(), SendError>;
}

/// Composes the attachment mail and hands it to a [`MailTransport`]
pub struct RelayMailer<T> {
    settings: MailSettings,
    transport: T,
}

impl<T: MailTransport> RelayMailer<T> {
    pub fn new(settings: MailSettings, transport: T) -> Self {
        Self {
            settings,
            transport,
        }
    }
}

#[async_trait]
impl<T: MailTransport> Mailer for RelayMailer<T> {
    async fn send(&self, file: &FetchedFile) -> Result<(), SendError> {
        let bytes = tokio::fs::read(file.path()).await.map_err(|e| {
            SendError::Transport(format!("reading {}: {}", file.path().display(), e))
        })?;

        let message = OutboundMessage::compose(&self.settings, file.file_name(), bytes);
        info!(
            "Emailing {} ({}, {} bytes) to {}",
            message.attachment_name,
            message.content_type(),
            file.size(),
            message.to
        );

        self.transport.deliver(message.into_email()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{create_temp_file, FetchedFile};
    use crate::mail::compose::SubjectPolicy;
    use lettre::Message;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct RecordingTransport {
        sent: Arc<Mutex<Vec<String>>>,
        fail_with: Option<fn(String) -> SendError>,
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn deliver(&self, email: Message) -> Result<(), SendError> {
            if let Some(fail) = self.fail_with {
                return Err(fail("535 5.7.8 bad credentials".into()));
            }
            let raw = String::from_utf8_lossy(&email.formatted()).to_string();
            self.sent.lock().unwrap().push(raw);
            Ok(())
        }
    }

    fn settings() -> MailSettings {
        MailSettings {
            from: "relay@example.com".parse().unwrap(),
            recipient: "reader@kindle.com".parse().unwrap(),
            subject: SubjectPolicy::Convert,
        }
    }

    fn fetched(dir: &std::path::Path, name: &str, contents: &[u8]) -> FetchedFile {
        let (mut file, path) = create_temp_file(dir, name).unwrap();
        file.write_all(contents).unwrap();
        FetchedFile::new(path, name, contents.len() as u64)
    }

    #[tokio::test]
    async fn test_send_delivers_composed_message() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::default();
        let mailer = RelayMailer::new(settings(), transport.clone());

        mailer
            .send(&fetched(dir.path(), "book.epub", b"PK epub"))
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("Subject: convert"));
        assert!(sent[0].contains("To: reader@kindle.com"));
        assert!(sent[0].contains("book.epub"));
        assert!(sent[0].contains("application/epub+zip"));
    }

    #[tokio::test]
    async fn test_send_surfaces_transport_failure() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport {
            fail_with: Some(SendError::Auth),
            ..Default::default()
        };
        let mailer = RelayMailer::new(settings(), transport.clone());

        let err = mailer
            .send(&fetched(dir.path(), "book.epub", b"PK epub"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Auth(_)));
        assert_eq!(err.label(), "mail server authentication failed");
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_fails_when_file_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let file = fetched(dir.path(), "book.epub", b"PK epub");
        std::fs::remove_file(file.path()).unwrap();

        let mailer = RelayMailer::new(settings(), RecordingTransport::default());
        let err = mailer.send(&file).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }
}
