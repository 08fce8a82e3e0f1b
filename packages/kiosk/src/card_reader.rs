//! Card reader fed by a line-oriented device, FIFO, or standard input.
//!
//! Each non-blank line is one card id. Ids are normalized to uppercase hex
//! with separators removed, so `04:a1:b2:c3` and `04A1B2C3` are the same card.

use anyhow::Context;
use async_trait::async_trait;
use claim_core::collaborators::CardReader;
use claim_core::error::AdapterError;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;

pub struct LineCardReader<R> {
    reader: R,
    // Partial line survives a cancelled read
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin + Send> LineCardReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
        }
    }
}

/// Open the configured device. `-` reads standard input.
pub async fn open_card_reader(device: &str) -> anyhow::Result<Box<dyn CardReader>> {
    if device == "-" {
        return Ok(Box::new(LineCardReader::new(BufReader::new(
            tokio::io::stdin(),
        ))));
    }
    let file = tokio::fs::File::open(device)
        .await
        .with_context(|| format!("Failed to open card reader device: {}", device))?;
    Ok(Box::new(LineCardReader::new(BufReader::new(file))))
}

/// Uppercase hex with separators stripped, or `None` if the line is not a
/// card id.
pub fn normalize_card_id(line: &str) -> Option<String> {
    let id: String = line
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(id)
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> CardReader for LineCardReader<R> {
    async fn next_card(&mut self) -> Result<Option<String>, AdapterError> {
        loop {
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| AdapterError::Unavailable(e.to_string()))?;
            if n == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buf).into_owned();
            self.buf.clear();
            if line.trim().is_empty() {
                continue;
            }
            match normalize_card_id(&line) {
                Some(id) => return Ok(Some(id)),
                None => warn!(line = %line.trim(), "Ignoring unreadable card id"),
            }
        }
    }
}
