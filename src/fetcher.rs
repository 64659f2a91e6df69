use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tempfile::TempPath;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use teloxide::RequestError;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::platform::DocumentUpload;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("file not found on the chat platform")]
    NotFound,
    #[error("file exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("transfer failed: {0}")]
    Transport(String),
}

impl FetchError {
    /// Short cause shown to the sender
    pub fn label(&self) -> &'static str {
        match self {
            FetchError::NotFound => "the file could not be found",
            FetchError::TooLarge { .. } => "the file is too large",
            FetchError::Transport(_) => "a network error interrupted the download",
        }
    }
}

/// A downloaded document held in a uniquely named temporary file.
///
/// The file is removed when this value is released or dropped.
#[derive(Debug)]
pub struct FetchedFile {
    path: TempPath,
    file_name: String,
    size: u64,
}

impl FetchedFile {
    pub fn new(path: TempPath, file_name: impl Into<String>, size: u64) -> Self {
        Self {
            path,
            file_name: file_name.into(),
            size,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the temporary file now, logging instead of failing
    pub fn release(self) {
        let shown = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => debug!("Released temporary file {}", shown),
            Err(e) => warn!("Could not delete temporary file {}: {}", shown, e),
        }
    }
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, document: &DocumentUpload) -> Result<FetchedFile, FetchError>;
}

/// Fetches documents through the Telegram Bot API file endpoint
pub struct TelegramFetcher {
    bot: Bot,
    max_bytes: u64,
    temp_dir: PathBuf,
}

impl TelegramFetcher {
    pub fn new(bot: Bot, max_bytes: u64, temp_dir: PathBuf) -> Self {
        Self {
            bot,
            max_bytes,
            temp_dir,
        }
    }
}

#[async_trait]
impl DocumentFetcher for TelegramFetcher {
    async fn fetch(&self, document: &DocumentUpload) -> Result<FetchedFile, FetchError> {
        if document.declared_size > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let file = self
            .bot
            .get_file(FileId(document.file_id.clone()))
            .await
            .map_err(|e| classify_request_error(e, self.max_bytes))?;

        let (out, path) = create_temp_file(&self.temp_dir, &document.file_name)?;
        let mut out = tokio::fs::File::from_std(out);

        // `path` is dropped on every early return below, deleting the partial write
        let size = copy_limited(
            self.bot.download_file_stream(&file.path),
            &mut out,
            self.max_bytes,
        )
        .await?;
        out.sync_all().await.map_err(io_error)?;
        drop(out);

        debug!(
            "Fetched {} ({} bytes) into {}",
            document.file_name,
            size,
            path.display()
        );

        Ok(FetchedFile::new(path, document.file_name.clone(), size))
    }
}

/// Create an exclusively owned temp file that keeps the document's extension
pub fn create_temp_file(
    dir: &Path,
    file_name: &str,
) -> Result<(std::fs::File, TempPath), FetchError> {
    let suffix = format!(".{}", extension_of(file_name));
    let named = tempfile::Builder::new()
        .prefix("kindle-relay-")
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(io_error)?;
    Ok(named.into_parts())
}

fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "bin".to_string())
}

/// Copy a byte stream into `out`, aborting once more than `limit` bytes arrive
async fn copy_limited<S, B, E, W>(stream: S, out: &mut W, limit: u64) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Transport(e.to_string()))?;
        let bytes = chunk.as_ref();
        written += bytes.len() as u64;
        if written > limit {
            return Err(FetchError::TooLarge { limit });
        }
        out.write_all(bytes).await.map_err(io_error)?;
    }

    out.flush().await.map_err(io_error)?;
    Ok(written)
}

fn classify_request_error(err: RequestError, limit: u64) -> FetchError {
    match err {
        RequestError::Api(api) => classify_api_message(&api.to_string(), limit),
        other => FetchError::Transport(other.to_string()),
    }
}

/// Map a Bot API error description onto the fetch taxonomy
fn classify_api_message(message: &str, limit: u64) -> FetchError {
    let lower = message.to_lowercase();
    if lower.contains("too big") || lower.contains("too large") {
        FetchError::TooLarge { limit }
    } else if lower.contains("file_id")
        || lower.contains("file id")
        || lower.contains("not found")
        || lower.contains("temporarily unavailable")
    {
        FetchError::NotFound
    } else {
        FetchError::Transport(message.to_string())
    }
}

fn io_error(err: std::io::Error) -> FetchError {
    FetchError::Transport(format!("temporary file I/O: {}", err))
}
