use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::api::AuthenticatedClient;

/// Remote capture pipeline as the controller sees it: an opaque start/end pair.
#[async_trait]
pub trait CaptureService: Send + Sync + 'static {
    async fn start(&self) -> Result<()>;

    /// Ending an already stopped session must succeed.
    async fn end(&self) -> Result<()>;
}

#[async_trait]
impl CaptureService for AuthenticatedClient {
    async fn start(&self) -> Result<()> {
        let response = self.start_capture().await?;
        debug!(status = ?response.status, "Capture start acknowledged");
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        let response = self.end_capture().await?;
        debug!(status = ?response.status, "Capture end acknowledged");
        Ok(())
    }
}
