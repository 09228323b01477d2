//! Image editing module.

mod editor;
pub mod gemini;
mod types;
pub mod upload;

pub use editor::{ImageEditor, ImageEditorExt};
pub use gemini::{GeminiEditor, GeminiEditorBuilder, GeminiModel};
pub use types::{EditMetadata, EditRequest, EditedImage, ImageFormat, SourceImage};
pub use upload::{ImageId, UploadReport, UploadSet, UploadedImage};
