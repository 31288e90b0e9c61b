use async_trait::async_trait;
use log2::info;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use super::error::SinkError;

/// One progress notification of a running scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub tld: String,
    pub message: String,
    /// Fraction of the page budget used so far, when meaningful
    pub progress: Option<f32>,
    pub page: Option<usize>,
    /// Unique domains collected so far
    pub found: usize,
}

impl ProgressUpdate {
    pub fn new(tld: &str, message: impl Into<String>, found: usize) -> Self {
        Self {
            tld: tld.to_string(),
            message: message.into(),
            progress: None,
            page: None,
            found,
        }
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
        self
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }
}

/// Destination for progress updates. Delivery is best effort.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: ProgressUpdate) -> Result<(), SinkError>;
}

/// Writes every update to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    async fn report(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        match update.progress {
            Some(p) => info!("[{}] {} ({:.0}%, {} found)", update.tld, update.message, p * 100.0, update.found),
            None => info!("[{}] {} ({} found)", update.tld, update.message, update.found),
        }
        Ok(())
    }
}

/// Pushes updates into an unbounded channel, e.g. towards a websocket.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<ProgressUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn report(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        self.tx.send(update).map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.report(ProgressUpdate::new(".ir", "first", 0)).await.unwrap();
        sink.report(ProgressUpdate::new(".ir", "second", 2).with_page(1)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().message, "first");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.message, "second");
        assert_eq!(second.page, Some(1));
        assert_eq!(second.found, 2);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let result = sink.report(ProgressUpdate::new(".ir", "lost", 0)).await;
        assert!(matches!(result, Err(SinkError::Closed)));
    }

    #[test]
    fn test_progress_is_clamped_and_serialized() {
        let update = ProgressUpdate::new(".ir", "done", 3).with_progress(1.5);
        assert_eq!(update.progress, Some(1.0));

        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["message"], "done");
        assert_eq!(json["progress"], 1.0);
        assert_eq!(json["found"], 3);
        assert!(json["page"].is_null());
    }
}
