//! Outbound notification interface (§6): `(title, text) -> Result<(), Error>`,
//! called by subscription callbacks, entirely outside the core pipeline.
//! Declared here only to keep the boundary explicit per §4.8; the core makes
//! no retry guarantee about this call.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("notification transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, title: &str, text: &str) -> Result<(), NotificationError>;
}

/// Stub sink that only logs, used until a real webhook transport is wired in.
pub struct LoggingNotificationSink;

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn notify(&self, title: &str, text: &str) -> Result<(), NotificationError> {
        tracing::info!(title, text, "notification (no webhook configured)");
        Ok(())
    }
}
