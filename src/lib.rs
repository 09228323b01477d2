#![warn(missing_docs)]
//! nanoedit - edit images with a natural-language instruction.
//!
//! Upload one or more images, describe the edit, and the images plus the
//! instruction are sent to a Gemini image model. The response is either an
//! edited image or the model's explanation of why it did not produce one.
//!
//! # Quick Start
//!
//! ```no_run
//! use nanoedit::{EditRequest, GeminiEditor, ImageEditor, SourceImage};
//!
//! #[tokio::main]
//! async fn main() -> nanoedit::Result<()> {
//!     let editor = GeminiEditor::builder().build()?;
//!     let photo = SourceImage::from_bytes(std::fs::read("cat.png")?)?;
//!     let request = EditRequest::new("Give the cat a tiny wizard hat").with_image(photo);
//!     let image = editor.edit(&request).await?;
//!     image.save("wizard-cat.png")?;
//!     Ok(())
//! }
//! ```
//!
//! # Sessions
//!
//! [`EditSession`] tracks uploads, the instruction, a four-state status and
//! the latest result, mirroring what an interactive front end displays.
//!
//! ```no_run
//! use nanoedit::{EditSession, EditStatus, GeminiEditor};
//!
//! # async fn run() -> nanoedit::Result<()> {
//! let editor = GeminiEditor::builder().build()?;
//! let mut session = EditSession::new();
//! let report = session.upload_paths(["before.jpg", "notes.txt"]);
//! if let Some(msg) = report.message() {
//!     eprintln!("{msg}");
//! }
//! session.set_instruction("Turn the sky purple");
//! if let EditStatus::Error(msg) = session.generate(&editor).await {
//!     eprintln!("{msg}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `cli` (default): the `nanoedit` binary and the MCP server

mod error;
pub mod image;
pub mod session;

#[cfg(feature = "cli")]
#[doc(hidden)]
pub mod mcp;

// Re-export error types at crate root
pub use error::{NanoEditError, Result};

pub use image::{
    EditMetadata, EditRequest, EditedImage, GeminiEditor, GeminiEditorBuilder, GeminiModel,
    ImageEditor, ImageEditorExt, ImageFormat, ImageId, SourceImage, UploadReport, UploadSet,
    UploadedImage,
};
pub use session::{EditSession, EditStatus};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{NanoEditError, Result};
    pub use crate::image::{EditRequest, EditedImage, GeminiEditor, ImageEditor, ImageEditorExt};
    pub use crate::session::{EditSession, EditStatus};
}
