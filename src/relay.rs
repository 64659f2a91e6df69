use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::access::AllowlistGate;
use crate::fetcher::{DocumentFetcher, FetchError};
use crate::mail::{Mailer, SendError};
use crate::platform::{DocumentUpload, InboundUpdate, Payload, ReplySink, ReplyTarget};

pub const WELCOME_MESSAGE: &str = "Send me the document you want on your Kindle.\n\
     I will forward most common formats via email to your Kindle inbox.";

pub const HELP_MESSAGE: &str = "This bot forwards any document you send to your Kindle email address.\n\
     Usage:\n\
     1. Send /start to confirm I am online.\n\
     2. Upload a supported document (PDF/EPUB/DOCX/etc.).\n\
     3. Wait a few minutes for Amazon to deliver it to your Kindle.";

pub const UNAUTHORIZED_MESSAGE: &str = "Sorry, you are not allowed to use this bot.";

pub const UNSUPPORTED_MESSAGE: &str =
    "Please send me a document (PDF, EPUB, DOCX, ...) and I will forward it to your Kindle.";

/// Upper bounds on the two network waits of a relay attempt
#[derive(Debug, Clone, Copy)]
pub struct RelayTimeouts {
    pub fetch: Duration,
    pub send: Duration,
}

/// Terminal state of one processed update
#[derive(Debug)]
pub enum Outcome {
    Rejected,
    Command { reply: &'static str },
    Unsupported,
    Sent { file_name: String },
    FetchFailed { file_name: String, error: FetchError },
    SendFailed { file_name: String, error: SendError },
}

impl Outcome {
    pub fn reply_text(&self) -> String {
        match self {
            Outcome::Rejected => UNAUTHORIZED_MESSAGE.to_string(),
            Outcome::Command { reply } => reply.to_string(),
            Outcome::Unsupported => UNSUPPORTED_MESSAGE.to_string(),
            Outcome::Sent { file_name } => {
                format!("Your file {} is on its way to your Kindle inbox.", file_name)
            }
            Outcome::FetchFailed {
                file_name,
                error: FetchError::TooLarge { limit },
            } => format!(
                "Could not download {}: the file is too large (limit is {}).",
                file_name,
                format_size(*limit)
            ),
            Outcome::FetchFailed { file_name, error } => {
                format!("Could not download {}: {}. Please try again.", file_name, error.label())
            }
            Outcome::SendFailed { file_name, error } => format!(
                "Could not email {}: {}. Please try again later.",
                file_name,
                error.label()
            ),
        }
    }
}

fn format_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Drives each inbound update through gate, fetch, mail and reply.
///
/// Holds no per-update state; one instance is shared by every in-flight update.
pub struct Relay<F, M, R> {
    gate: AllowlistGate,
    fetcher: F,
    mailer: M,
    replies: R,
    timeouts: RelayTimeouts,
}

impl<F, M, R> Relay<F, M, R>
where
    F: DocumentFetcher,
    M: Mailer,
    R: ReplySink,
{
    pub fn new(
        gate: AllowlistGate,
        fetcher: F,
        mailer: M,
        replies: R,
        timeouts: RelayTimeouts,
    ) -> Self {
        Self {
            gate,
            fetcher,
            mailer,
            replies,
            timeouts,
        }
    }

    /// Process one update and send exactly one reply to its chat.
    ///
    /// Never fails: errors become the reply text, and a failed reply is logged.
    pub async fn handle(&self, update: &InboundUpdate) -> Outcome {
        let outcome = self.process(update).await;

        let text = outcome.reply_text();
        if let Err(e) = self.replies.reply(update.reply_to, &text).await {
            error!("Failed to reply to chat {}: {:#}", update.reply_to, e);
        }

        outcome
    }

    async fn process(&self, update: &InboundUpdate) -> Outcome {
        if !self.gate.admits(update.sender) {
            warn!(
                "Rejected update from unauthorized sender {:?} in chat {}",
                update.sender.map(|id| id.0),
                update.reply_to
            );
            return Outcome::Rejected;
        }

        match &update.payload {
            Payload::Command { name, .. } => match name.as_str() {
                "start" => Outcome::Command {
                    reply: WELCOME_MESSAGE,
                },
                "help" => Outcome::Command {
                    reply: HELP_MESSAGE,
                },
                other => {
                    debug!("Unknown command /{} in chat {}", other, update.reply_to);
                    Outcome::Unsupported
                }
            },
            Payload::Document(document) => self.relay_document(update.reply_to, document).await,
            Payload::Unsupported => Outcome::Unsupported,
        }
    }

    async fn relay_document(&self, target: ReplyTarget, document: &DocumentUpload) -> Outcome {
        let attempt = Uuid::new_v4();
        let file_name = document.file_name.clone();
        info!(
            "[{}] Relaying {} ({} bytes declared) for chat {}",
            attempt, file_name, document.declared_size, target
        );

        if let Err(e) = self.replies.indicate_upload(target).await {
            debug!("[{}] Upload indicator failed: {:#}", attempt, e);
        }

        let fetch = tokio::time::timeout(self.timeouts.fetch, self.fetcher.fetch(document));
        let fetched = match fetch.await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(error)) => {
                warn!("[{}] Fetch of {} failed: {}", attempt, file_name, error);
                return Outcome::FetchFailed { file_name, error };
            }
            Err(_) => {
                let error = FetchError::Transport(format!(
                    "download timed out after {:?}",
                    self.timeouts.fetch
                ));
                warn!("[{}] Fetch of {} failed: {}", attempt, file_name, error);
                return Outcome::FetchFailed { file_name, error };
            }
        };

        let send = tokio::time::timeout(self.timeouts.send, self.mailer.send(&fetched));
        let sent = match send.await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transport(format!(
                "delivery timed out after {:?}",
                self.timeouts.send
            ))),
        };
        fetched.release();

        match sent {
            Ok(()) => {
                info!("[{}] Delivered {}", attempt, file_name);
                Outcome::Sent { file_name }
            }
            Err(error) => {
                error!("[{}] Delivery of {} failed: {}", attempt, file_name, error);
                Outcome::SendFailed { file_name, error }
            }
        }
    }
}
