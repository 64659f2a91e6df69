use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::Message;

use super::SendError;

/// Body text that accompanies every forwarded attachment
pub const MAIL_BODY: &str = "Sent via the Telegram Send2Kindle bot.";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// How the subject line of outgoing mail is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectPolicy {
    /// Ask the reading-device inbox to convert the document
    Convert,
    Literal(String),
}

impl SubjectPolicy {
    pub const CONVERT_KEYWORD: &'static str = "convert";

    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case(Self::CONVERT_KEYWORD) {
            SubjectPolicy::Convert
        } else {
            SubjectPolicy::Literal(value.to_string())
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            SubjectPolicy::Convert => Self::CONVERT_KEYWORD,
            SubjectPolicy::Literal(s) => s,
        }
    }
}

/// Addressing shared by every message the relay sends
#[derive(Debug, Clone)]
pub struct MailSettings {
    pub from: Mailbox,
    pub recipient: Mailbox,
    pub subject: SubjectPolicy,
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub body: String,
    pub attachment_name: String,
    pub attachment: Vec<u8>,
}

impl OutboundMessage {
    pub fn compose(settings: &MailSettings, file_name: &str, bytes: Vec<u8>) -> Self {
        Self {
            from: settings.from.clone(),
            to: settings.recipient.clone(),
            subject: settings.subject.subject().to_string(),
            body: MAIL_BODY.to_string(),
            attachment_name: file_name.to_string(),
            attachment: bytes,
        }
    }

    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.attachment_name)
    }

    /// Build the MIME message: a short text part followed by the attachment
    pub fn into_email(self) -> Result<Message, SendError> {
        let content_type = ContentType::parse(self.content_type())
            .map_err(|e| SendError::Rejected(format!("invalid content type: {}", e)))?;

        let attachment = Attachment::new(self.attachment_name).body(self.attachment, content_type);

        Message::builder()
            .from(self.from)
            .to(self.to)
            .subject(self.subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.body))
                    .singlepart(attachment),
            )
            .map_err(|e| SendError::Rejected(format!("failed to build email: {}", e)))
    }
}

/// Infer a MIME type from the file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return FALLBACK_CONTENT_TYPE,
    };

    match ext.as_str() {
        "epub" => "application/epub+zip",
        "pdf" => "application/pdf",
        "mobi" | "prc" => "application/x-mobipocket-ebook",
        "azw" => "application/vnd.amazon.ebook",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "htm" | "html" => "text/html",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => FALLBACK_CONTENT_TYPE,
    }
}
