//! Edit session: uploads, instruction, status and result.
//!
//! An [`EditSession`] holds everything a front end shows: the uploaded
//! images, the current instruction, a four-state status and the most recent
//! result. [`EditSession::generate`] borrows the session mutably, so a single
//! session can only have one edit in flight.

use crate::error::Result;
use crate::image::{
    EditRequest, EditedImage, ImageEditor, ImageEditorExt, ImageId, UploadReport, UploadSet,
    UploadedImage,
};
use std::path::Path;

/// Status of an edit session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EditStatus {
    /// Nothing has been attempted yet.
    #[default]
    Idle,
    /// An edit request is outstanding.
    Processing,
    /// The last edit produced an image.
    Success,
    /// The last action failed with the given message.
    Error(String),
}

impl EditStatus {
    /// Returns true while an edit is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Returns the error message, if the status is an error.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

impl std::fmt::Display for EditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Processing => write!(f, "processing"),
            Self::Success => write!(f, "success"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// State of one image-editing session.
#[derive(Debug, Default)]
pub struct EditSession {
    uploads: UploadSet,
    instruction: String,
    status: EditStatus,
    result: Option<EditedImage>,
    seed: Option<u64>,
    max_retries: u32,
}

impl EditSession {
    /// Creates an idle session with no images.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries for transient failures (default 0).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets a seed forwarded with every edit.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Adds files from disk.
    ///
    /// Valid images are kept even when others are skipped; a non-empty skip
    /// message moves the session into the error state.
    pub fn upload_paths<P: AsRef<Path>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
    ) -> UploadReport {
        let report = self.uploads.add_paths(paths);
        if let Some(message) = report.message() {
            self.status = EditStatus::Error(message);
        }
        report
    }

    /// Adds an in-memory image.
    pub fn upload_bytes(
        &mut self,
        name: impl Into<String>,
        data: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<ImageId> {
        let result = self.uploads.add_bytes(name, data, declared_mime);
        if let Err(ref e) = result {
            self.status = EditStatus::Error(e.to_string());
        }
        result
    }

    /// Removes one uploaded image.
    pub fn remove_image(&mut self, id: ImageId) -> Option<UploadedImage> {
        self.uploads.remove(id)
    }

    /// Removes every uploaded image.
    pub fn clear_images(&mut self) {
        self.uploads.clear();
    }

    /// Replaces the instruction.
    pub fn set_instruction(&mut self, instruction: impl Into<String>) {
        self.instruction = instruction.into();
    }

    /// Current instruction.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Uploaded images.
    pub fn images(&self) -> &UploadSet {
        &self.uploads
    }

    /// Current status.
    pub fn status(&self) -> &EditStatus {
        &self.status
    }

    /// Most recent successful result.
    pub fn result(&self) -> Option<&EditedImage> {
        self.result.as_ref()
    }

    /// Takes the result out of the session.
    pub fn take_result(&mut self) -> Option<EditedImage> {
        self.result.take()
    }

    /// Builds the request for the current inputs, or the message explaining
    /// why the inputs are incomplete.
    pub fn build_request(&self) -> Result<EditRequest> {
        let mut request =
            EditRequest::new(self.instruction.trim()).with_images(self.uploads.sources());
        if let Some(seed) = self.seed {
            request = request.with_seed(seed);
        }
        request.validate()?;
        Ok(request)
    }

    /// Runs one edit with the current images and instruction.
    ///
    /// Returns the resulting status. Incomplete inputs leave any previous
    /// result in place; a submitted edit clears it first.
    pub async fn generate<E>(&mut self, editor: &E) -> &EditStatus
    where
        E: ImageEditor + ?Sized,
    {
        let request = match self.build_request() {
            Ok(r) => r,
            Err(e) => {
                self.status = EditStatus::Error(e.to_string());
                return &self.status;
            }
        };

        self.status = EditStatus::Processing;
        self.result = None;
        tracing::info!(
            editor = editor.name(),
            images = request.images.len(),
            "starting edit"
        );

        match editor.edit_with_retries(&request, self.max_retries).await {
            Ok(image) => {
                tracing::info!(bytes = image.size(), "edit succeeded");
                self.result = Some(image);
                self.status = EditStatus::Success;
            }
            Err(e) => {
                tracing::warn!("edit failed: {e}");
                self.status = EditStatus::Error(e.to_string());
            }
        }
        &self.status
    }

    /// Returns to the initial idle state.
    pub fn reset(&mut self) {
        self.uploads.clear();
        self.instruction.clear();
        self.result = None;
        self.status = EditStatus::Idle;
    }
}
