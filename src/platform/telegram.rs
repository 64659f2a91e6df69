use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatAction;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::fetcher::TelegramFetcher;
use crate::mail::smtp::SmtpTransport;
use crate::mail::RelayMailer;
use crate::platform::{DocumentUpload, Identity, InboundUpdate, Payload, ReplySink, ReplyTarget};
use crate::relay::Relay;

/// The relay as wired for Telegram and SMTP
pub type TelegramRelay = Relay<TelegramFetcher, RelayMailer<SmtpTransport>, TelegramReplier>;

/// Commands shown in the Telegram menu
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum MenuCommand {
    #[command(description = "check that the bot is online")]
    Start,
    #[command(description = "how to send documents to your Kindle")]
    Help,
}

/// Sends replies back to the originating Telegram chat
pub struct TelegramReplier {
    bot: Bot,
}

impl TelegramReplier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ReplySink for TelegramReplier {
    async fn reply(&self, target: ReplyTarget, text: &str) -> Result<()> {
        self.bot.send_message(ChatId(target.0), text).await?;
        Ok(())
    }

    async fn indicate_upload(&self, target: ReplyTarget) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(target.0), ChatAction::UploadDocument)
            .await?;
        Ok(())
    }
}

/// Run the Telegram long-polling loop until interrupted
pub async fn run(bot: Bot, relay: Arc<TelegramRelay>) -> Result<()> {
    info!("Starting Telegram platform...");

    if let Err(e) = bot.set_my_commands(MenuCommand::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(msg: Message, relay: Arc<TelegramRelay>) -> ResponseResult<()> {
    let update = inbound_update(&msg);

    info!(
        "Telegram update from {:?} in chat {}: {}",
        update.sender.map(|id| id.0),
        update.reply_to,
        describe(&update.payload)
    );

    relay.handle(&update).await;
    Ok(())
}

/// Translate a Telegram message into the platform-agnostic update
pub fn inbound_update(msg: &Message) -> InboundUpdate {
    let sender = msg.from.as_ref().map(|user| Identity(user.id.0));

    let payload = if let Some(doc) = msg.document() {
        Payload::Document(DocumentUpload::new(
            doc.file.id.0.clone(),
            doc.file_name.clone(),
            u64::from(doc.file.size),
        ))
    } else if let Some(text) = msg.text() {
        Payload::from_text(text)
    } else {
        Payload::Unsupported
    };

    InboundUpdate {
        sender,
        reply_to: ReplyTarget(msg.chat.id.0),
        payload,
    }
}

fn describe(payload: &Payload) -> String {
    match payload {
        Payload::Command { name, args } if args.is_empty() => format!("command /{}", name),
        Payload::Command { name, args } => format!("command /{} {}", name, args),
        Payload::Document(doc) => format!("document {} ({} bytes)", doc.file_name, doc.declared_size),
        Payload::Unsupported => "unsupported message".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(extra: serde_json::Value) -> Message {
        let mut base = json!({
            "message_id": 1,
            "date": 1,
            "chat": { "id": 42, "type": "private", "first_name": "Alice" },
            "from": {
                "id": 1001,
                "is_bot": false,
                "first_name": "Alice",
                "username": "alice"
            }
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(base).expect("deserialize message")
    }

    #[test]
    fn test_document_message() {
        let msg = message(json!({
            "document": {
                "file_id": "doc-file-id",
                "file_unique_id": "doc-unique-id",
                "file_name": "book.epub",
                "mime_type": "application/epub+zip",
                "file_size": 2048
            }
        }));

        let update = inbound_update(&msg);
        assert_eq!(update.sender, Some(Identity(1001)));
        assert_eq!(update.reply_to, ReplyTarget(42));
        match update.payload {
            Payload::Document(doc) => {
                assert_eq!(doc.file_id, "doc-file-id");
                assert_eq!(doc.file_name, "book.epub");
                assert_eq!(doc.declared_size, 2048);
            }
            other => panic!("expected document, got {:?}", other),
        }
    }

    #[test]
    fn test_document_without_name() {
        let msg = message(json!({
            "document": {
                "file_id": "doc-file-id",
                "file_unique_id": "doc-unique-id",
                "file_size": 10
            }
        }));

        match inbound_update(&msg).payload {
            Payload::Document(doc) => assert_eq!(doc.file_name, "document.bin"),
            other => panic!("expected document, got {:?}", other),
        }
    }

    #[test]
    fn test_command_message() {
        let msg = message(json!({ "text": "/help" }));
        assert!(matches!(
            inbound_update(&msg).payload,
            Payload::Command { ref name, .. } if name == "help"
        ));
    }

    #[test]
    fn test_photo_is_unsupported() {
        let msg = message(json!({
            "photo": [{
                "file_id": "photo-id",
                "file_unique_id": "photo-unique",
                "width": 10,
                "height": 10,
                "file_size": 100
            }]
        }));
        assert!(matches!(inbound_update(&msg).payload, Payload::Unsupported));
    }

    #[test]
    fn test_menu_commands() {
        let names: Vec<String> = MenuCommand::bot_commands()
            .into_iter()
            .map(|c| c.command.trim_start_matches('/').to_string())
            .collect();
        assert_eq!(names, vec!["start", "help"]);
    }
}
