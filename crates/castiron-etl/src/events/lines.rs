//! Newline-delimited notifications from any async reader.
//!
//! Used to feed the worker from stdin (for example piping
//! `mc event` output or replaying a captured topic) and in tests.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::warn;

use super::{EventSource, Notification};
use crate::error::EtlResult;

pub struct LinesEventSource<R> {
    lines: Lines<R>,
    line_no: u64,
}

impl<R> LinesEventSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl LinesEventSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R> EventSource for LinesEventSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_event(&mut self) -> EtlResult<Option<Notification>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match Notification::decode(line.as_bytes()) {
                Ok(Some(notification)) => return Ok(Some(notification)),
                Ok(None) => continue,
                Err(e) => warn!(line = self.line_no, error = %e, "Skipping undecodable notification"),
            }
        }
        Ok(None)
    }
}
