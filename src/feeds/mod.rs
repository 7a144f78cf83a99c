pub mod image;
pub mod stream;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Receives decoded objects from an event source, one at a time.
#[async_trait]
pub trait StreamHandler: Send {
    /// Called once when the source is open, before any event.
    async fn on_header(&mut self) -> Result<()>;

    async fn on_event(&mut self, raw: Value) -> Result<()>;
}

pub use stream::{LineStream, Recorder};
