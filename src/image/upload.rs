//! Uploaded image bookkeeping.

use crate::error::{NanoEditError, Result};
use crate::image::types::{ImageFormat, SourceImage};
use base64::Engine;
use std::path::Path;

/// Identifier of an uploaded image, unique within its [`UploadSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(u64);

impl std::fmt::Display for ImageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An image accepted into an upload set.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Identifier within the owning set.
    pub id: ImageId,
    /// File name or caller-supplied label.
    pub name: String,
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// Content type of `data`.
    pub format: ImageFormat,
    /// `data:` URL suitable for previewing the upload.
    pub preview: String,
}

impl UploadedImage {
    /// Returns the payload as a request input.
    pub fn to_source(&self) -> SourceImage {
        SourceImage::new(self.data.clone(), self.format)
    }
}

/// Outcome of adding a batch of files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Ids of the images that were accepted, in input order.
    pub added: Vec<ImageId>,
    /// One message per file that was skipped.
    pub skipped: Vec<String>,
}

impl UploadReport {
    /// Returns a single-line summary of the skipped files, if any.
    pub fn message(&self) -> Option<String> {
        if self.skipped.is_empty() {
            return None;
        }
        Some(format!("Skipped {} file(s): {}", self.skipped.len(), self.skipped.join("; ")))
    }
}

/// Ordered collection of uploaded images.
#[derive(Debug, Default)]
pub struct UploadSet {
    images: Vec<UploadedImage>,
    next_id: u64,
}

impl UploadSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an in-memory image.
    ///
    /// The declared MIME type wins when it names a supported format; without
    /// one the format is sniffed from the bytes.
    pub fn add_bytes(
        &mut self,
        name: impl Into<String>,
        data: Vec<u8>,
        declared_mime: Option<&str>,
    ) -> Result<ImageId> {
        let name = name.into();
        if data.is_empty() {
            return Err(NanoEditError::UnsupportedFileType { name });
        }

        let format = match declared_mime {
            Some(mime) => ImageFormat::from_mime_type(mime),
            None => ImageFormat::from_magic_bytes(&data),
        };
        let Some(format) = format else {
            return Err(NanoEditError::UnsupportedFileType { name });
        };

        Ok(self.push(name, data, format))
    }

    /// Reads and adds files from disk, skipping anything that is not a
    /// supported image.
    pub fn add_paths<P: AsRef<Path>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
    ) -> UploadReport {
        let mut report = UploadReport::default();

        for path in paths {
            let path = path.as_ref();
            match self.add_path(path) {
                Ok(id) => report.added.push(id),
                Err(e) => {
                    tracing::debug!(path = %path.display(), "skipping upload: {e}");
                    report.skipped.push(match e {
                        NanoEditError::Io(io) => format!("{}: {io}", path.display()),
                        other => other.to_string(),
                    });
                }
            }
        }

        report
    }

    fn add_path(&mut self, path: &Path) -> Result<ImageId> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(ImageFormat::from_extension);

        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Err(NanoEditError::UnsupportedFileType { name });
        }

        // The extension is only a hint; the content decides.
        let format = match by_extension {
            Some(hint) if hint.matches_bytes(&data) => hint,
            _ => {
                let Some(sniffed) = ImageFormat::from_magic_bytes(&data) else {
                    return Err(NanoEditError::UnsupportedFileType { name });
                };
                if let Some(hint) = by_extension {
                    tracing::debug!(
                        name = %name,
                        extension = %hint,
                        content = %sniffed,
                        "file extension does not match content"
                    );
                }
                sniffed
            }
        };

        Ok(self.push(name, data, format))
    }

    fn push(&mut self, name: String, data: Vec<u8>, format: ImageFormat) -> ImageId {
        let id = ImageId(self.next_id);
        self.next_id += 1;

        let preview = format!(
            "data:{};base64,{}",
            format.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(&data)
        );
        tracing::debug!(%id, name = %name, format = %format, bytes = data.len(), "image uploaded");

        self.images.push(UploadedImage {
            id,
            name,
            data,
            format,
            preview,
        });
        id
    }

    /// Removes an image, returning it if it was present.
    pub fn remove(&mut self, id: ImageId) -> Option<UploadedImage> {
        let pos = self.images.iter().position(|img| img.id == id)?;
        Some(self.images.remove(pos))
    }

    /// Removes every image. Ids are not reused afterwards.
    pub fn clear(&mut self) {
        self.images.clear();
    }

    /// Looks up an image by id.
    pub fn get(&self, id: ImageId) -> Option<&UploadedImage> {
        self.images.iter().find(|img| img.id == id)
    }

    /// Iterates over the images in upload order.
    pub fn iter(&self) -> impl Iterator<Item = &UploadedImage> {
        self.images.iter()
    }

    /// Number of images in the set.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns true if the set holds no images.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Returns every image as a request input, in upload order.
    pub fn sources(&self) -> Vec<SourceImage> {
        self.images.iter().map(UploadedImage::to_source).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_BYTES: [u8; 12] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_BYTES: [u8; 12] = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0, 0, 0, 0, 0];

    #[test]
    fn test_add_bytes_sniffs_format() {
        let mut set = UploadSet::new();
        let id = set.add_bytes("a.png", PNG_BYTES.to_vec(), None).unwrap();

        let img = set.get(id).unwrap();
        assert_eq!(img.format, ImageFormat::Png);
        assert!(img.preview.starts_with("data:image/png;base64,"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_add_bytes_uses_declared_mime() {
        let mut set = UploadSet::new();
        let id = set
            .add_bytes("photo", vec![1, 2, 3], Some("image/webp"))
            .unwrap();
        assert_eq!(set.get(id).unwrap().format, ImageFormat::WebP);

        let err = set
            .add_bytes("doc.pdf", PNG_BYTES.to_vec(), Some("application/pdf"))
            .unwrap_err();
        assert!(matches!(
            err,
            NanoEditError::UnsupportedFileType { ref name } if name == "doc.pdf"
        ));
    }

    #[test]
    fn test_add_bytes_rejects_empty_and_unknown() {
        let mut set = UploadSet::new();
        assert!(set.add_bytes("empty.png", Vec::new(), Some("image/png")).is_err());
        assert!(set.add_bytes("notes", b"just some text".to_vec(), None).is_err());
        assert!(set.is_empty());
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut set = UploadSet::new();
        let a = set.add_bytes("a", PNG_BYTES.to_vec(), None).unwrap();
        let b = set.add_bytes("b", JPEG_BYTES.to_vec(), None).unwrap();
        assert_ne!(a, b);

        assert_eq!(set.remove(a).map(|img| img.name), Some("a".to_string()));
        assert!(set.remove(a).is_none());

        set.clear();
        let c = set.add_bytes("c", PNG_BYTES.to_vec(), None).unwrap();
        assert!(c > b);
    }

    #[test]
    fn test_sources_preserve_upload_order() {
        let mut set = UploadSet::new();
        set.add_bytes("a", JPEG_BYTES.to_vec(), None).unwrap();
        set.add_bytes("b", PNG_BYTES.to_vec(), None).unwrap();

        let formats: Vec<_> = set.sources().iter().map(|s| s.format).collect();
        assert_eq!(formats, vec![ImageFormat::Jpeg, ImageFormat::Png]);
    }

    #[test]
    fn test_add_paths_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("cat.png");
        let renamed = dir.path().join("dog.txt");
        let bad = dir.path().join("notes.txt");
        let missing = dir.path().join("missing.png");
        std::fs::write(&good, PNG_BYTES).unwrap();
        std::fs::write(&renamed, JPEG_BYTES).unwrap();
        std::fs::write(&bad, "hello").unwrap();

        let mut set = UploadSet::new();
        let report = set.add_paths([&good, &bad, &renamed, &missing]);

        assert_eq!(report.added.len(), 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(set.get(report.added[1]).unwrap().format, ImageFormat::Jpeg);

        let message = report.message().unwrap();
        assert!(message.starts_with("Skipped 2 file(s): "));
        assert!(message.contains("notes.txt is not a supported image file"));
        assert!(message.contains("missing.png"));
    }

    #[test]
    fn test_add_paths_rejects_non_image_with_image_extension() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("notes.png");
        let mislabeled = dir.path().join("photo.png");
        std::fs::write(&fake, "this is not an image at all").unwrap();
        std::fs::write(&mislabeled, JPEG_BYTES).unwrap();

        let mut set = UploadSet::new();
        let report = set.add_paths([&fake, &mislabeled]);

        assert_eq!(report.added.len(), 1);
        assert_eq!(
            report.skipped,
            vec!["notes.png is not a supported image file".to_string()]
        );
        assert_eq!(set.get(report.added[0]).unwrap().format, ImageFormat::Jpeg);
    }

    #[test]
    fn test_report_message_empty_when_nothing_skipped() {
        assert_eq!(UploadReport::default().message(), None);
    }
}
