pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Numeric sender id as reported by the chat platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(pub u64);

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a reply for a given update should go (the originating chat)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyTarget(pub i64);

impl std::fmt::Display for ReplyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single inbound event, consumed once by the relay
#[derive(Debug, Clone)]
pub struct InboundUpdate {
    /// `None` when the platform did not attach a sender (e.g. channel posts)
    pub sender: Option<Identity>,
    pub reply_to: ReplyTarget,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Command { name: String, args: String },
    Document(DocumentUpload),
    Unsupported,
}

/// File reference plus what the platform declared about it up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    pub file_id: String,
    pub file_name: String,
    pub declared_size: u64,
}

/// Name used when the platform omits one
pub const DEFAULT_FILE_NAME: &str = "document.bin";

impl DocumentUpload {
    pub fn new(file_id: impl Into<String>, file_name: Option<String>, declared_size: u64) -> Self {
        let file_name = file_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        Self {
            file_id: file_id.into(),
            file_name,
            declared_size,
        }
    }
}

impl Payload {
    /// Parse message text into a command payload.
    ///
    /// Accepts `/name`, `/name@botname` and trailing arguments. Plain text
    /// is not a command and yields `Unsupported`.
    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Payload::Unsupported;
        };

        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return Payload::Unsupported;
        }

        Payload::Command {
            name,
            args: args.to_string(),
        }
    }
}

/// Outbound side of the update source: the only thing the relay may send back
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, target: ReplyTarget, text: &str) -> Result<()>;

    /// Show an "uploading" hint while a document is processed. Best effort.
    async fn indicate_upload(&self, _target: ReplyTarget) -> Result<()> {
        Ok(())
    }
}
