use super::StreamHandler;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Appends raw input lines to a file for later replay.
pub struct Recorder {
    file: File,
}

impl Recorder {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening record file {}", path.display()))?;
        Ok(Self { file })
    }

    pub async fn record(&mut self, line: &[u8]) -> Result<()> {
        self.file.write_all(line).await?;
        self.file.write_all(b"\n").await?;
        self.file.flush().await?;
        Ok(())
    }
}

/// Newline-delimited JSON from a live pipe or a replay file.
pub struct LineStream<R> {
    reader: R,
    recorder: Option<Recorder>,
}

impl<R: AsyncBufRead + Unpin + Send> LineStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Feed every object to `handler` until end of input and return how
    /// many were delivered. Lines that are not JSON are skipped; a read
    /// error or a handler error ends the stream.
    pub async fn run<H: StreamHandler>(mut self, handler: &mut H) -> Result<usize> {
        handler.on_header().await?;

        let mut delivered = 0;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut buf)
                .await
                .context("reading event stream")?;
            if n == 0 {
                break;
            }
            let line = buf.trim_ascii();
            if line.is_empty() {
                continue;
            }

            if let Some(recorder) = &mut self.recorder {
                if let Err(e) = recorder.record(line).await {
                    warn!("recording failed: {:#}", e);
                }
            }

            match serde_json::from_slice::<Value>(line) {
                Ok(value) => {
                    handler.on_event(value).await?;
                    delivered += 1;
                }
                Err(e) => debug!("skipping malformed line: {}", e),
            }
        }
        Ok(delivered)
    }
}
