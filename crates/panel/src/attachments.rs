//! Image attachments - validation and base64 encoding for generation requests.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use storyui_protocol::MediaAttachment;

pub const MAX_IMAGES: usize = 4;
pub const MAX_IMAGE_SIZE_MB: u64 = 20;
const MAX_IMAGE_BYTES: u64 = MAX_IMAGE_SIZE_MB * 1024 * 1024;

/// Prompt used when images are attached without any text
pub const DEFAULT_VISION_PROMPT: &str = "Create a component that matches this design";

/// A file that could not be attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentError {
    pub name: String,
    pub reason: String,
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.reason)
    }
}

/// Outcome of attaching a batch of files
#[derive(Debug, Clone, Default)]
pub struct Attached {
    pub images: Vec<MediaAttachment>,
    pub errors: Vec<AttachmentError>,
}

impl Attached {
    /// All per-file errors, one per line
    pub fn error_text(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Add pasted `data:` URIs while there is room under `MAX_IMAGES`.
    pub fn add_data_uris(&mut self, data_uris: &[String]) {
        for (index, data_uri) in data_uris.iter().enumerate() {
            if self.images.len() >= MAX_IMAGES {
                break;
            }
            match attach_data_uri(&format!("pasted-{}", index + 1), data_uri) {
                Ok(image) => self.images.push(image),
                Err(error) => self.errors.push(error),
            }
        }
    }
}

/// Attach image files from disk.
///
/// Files past the `MAX_IMAGES` limit (counting `already_attached`) are
/// ignored. Invalid files are reported individually without failing the rest.
pub fn attach_files<P: AsRef<Path>>(already_attached: usize, paths: &[P]) -> Attached {
    let mut attached = Attached::default();
    let room = MAX_IMAGES.saturating_sub(already_attached);
    let stamp = now_millis();

    for (index, path) in paths.iter().take(room).enumerate() {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        match load_file(path, &name, format!("{stamp}-{index}")) {
            Ok(image) => attached.images.push(image),
            Err(reason) => attached.errors.push(AttachmentError { name, reason }),
        }
    }

    debug!(
        component = "attachments",
        event = "attachments.attached",
        requested = paths.len(),
        attached = attached.images.len(),
        rejected = attached.errors.len(),
        "Processed image attachments"
    );
    attached
}

/// Attach an image from a `data:image/...;base64,` URI (clipboard paste).
pub fn attach_data_uri(name: &str, data_uri: &str) -> Result<MediaAttachment, AttachmentError> {
    let reject = |reason: &str| AttachmentError {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let without_scheme = data_uri
        .strip_prefix("data:")
        .ok_or_else(|| reject("Not an image file"))?;
    let (meta, data) = without_scheme
        .split_once(',')
        .ok_or_else(|| reject("Failed to process"))?;
    let media_type = meta
        .strip_suffix(";base64")
        .ok_or_else(|| reject("Failed to process"))?;
    if !media_type.starts_with("image/") {
        return Err(reject("Not an image file"));
    }

    let bytes = STANDARD
        .decode(data)
        .map_err(|_| reject("Failed to process"))?;
    if bytes.len() as u64 > MAX_IMAGE_BYTES {
        return Err(reject(&too_large()));
    }

    Ok(MediaAttachment {
        id: format!("{}-0", now_millis()),
        media_type: media_type.to_string(),
        data: data.to_string(),
        name: Some(name.to_string()),
    })
}

fn load_file(path: &Path, name: &str, id: String) -> Result<MediaAttachment, String> {
    let media_type = media_type_for(path).ok_or_else(|| "Not an image file".to_string())?;

    let metadata = fs::metadata(path).map_err(|_| "Failed to process".to_string())?;
    if metadata.len() > MAX_IMAGE_BYTES {
        return Err(too_large());
    }

    let bytes = fs::read(path).map_err(|_| "Failed to process".to_string())?;
    Ok(MediaAttachment {
        id,
        media_type: media_type.to_string(),
        data: STANDARD.encode(bytes),
        name: Some(name.to_string()),
    })
}

fn too_large() -> String {
    format!("File too large (max {MAX_IMAGE_SIZE_MB}MB)")
}

/// Image media type from the file extension, `None` for non-images.
pub fn media_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    };
    Some(media_type)
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
