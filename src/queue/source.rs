// Job sources: where the dispatcher pulls envelopes from
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::error;

use crate::error::{Error, Result};
use crate::queue::job::Job;

/// At-least-once stream of jobs. `None` means the source is exhausted.
#[async_trait]
pub trait JobSource: Send {
    async fn next_job(&mut self) -> Option<Result<Job>>;
}

/// One JSON envelope per line; blank lines are skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<BufReader<R>>,
    line_no: usize,
}

impl<R: AsyncRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        JsonLinesSource { lines: BufReader::new(reader).lines(), line_no: 0 }
    }
}

impl JsonLinesSource<tokio::fs::File> {
    pub async fn open(path: &str) -> Result<Self> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::Config(format!("cannot open job file {}: {}", path, e)))?;
        Ok(Self::new(file))
    }
}

impl JsonLinesSource<tokio::io::Stdin> {
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> JobSource for JsonLinesSource<R> {
    async fn next_job(&mut self) -> Option<Result<Job>> {
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) => {
                    self.line_no += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let line_no = self.line_no;
                    return Some(
                        serde_json::from_str(&line)
                            .map_err(|e| Error::InvalidJob(format!("line {}: {}", line_no, e))),
                    );
                }
                Ok(None) => return None,
                Err(e) => {
                    error!(line = self.line_no + 1, error = %e, "job stream unreadable, stopping");
                    return None;
                }
            }
        }
    }
}

#[async_trait]
impl JobSource for mpsc::Receiver<Job> {
    async fn next_job(&mut self) -> Option<Result<Job>> {
        self.recv().await.map(Ok)
    }
}
