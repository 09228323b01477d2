//! Image editor trait and utilities.

use crate::error::Result;
use crate::image::types::{EditRequest, EditedImage};
use async_trait::async_trait;

/// Trait for services that edit images from an instruction.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    /// Sends the images and instruction, returning the edited image.
    async fn edit(&self, request: &EditRequest) -> Result<EditedImage>;

    /// Returns the name of this editor for display.
    fn name(&self) -> &str;

    /// Checks if the service is reachable and authenticated.
    async fn health_check(&self) -> Result<()>;
}

/// Extension trait for editors with retry logic.
#[async_trait]
pub trait ImageEditorExt: ImageEditor {
    /// Edits with automatic retries on transient failures.
    ///
    /// `max_retries = 0` performs exactly one attempt.
    async fn edit_with_retries(
        &self,
        request: &EditRequest,
        max_retries: u32,
    ) -> Result<EditedImage> {
        let mut attempt = 0;
        loop {
            match self.edit(request).await {
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = e.retry_after().unwrap_or(std::time::Duration::from_secs(1));
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after transient error: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

impl<T: ImageEditor + ?Sized> ImageEditorExt for T {}
