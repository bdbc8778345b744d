use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};

use crate::core::message::Attachment;

/// Largest file `load_attachment` will inline.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
pub enum AttachmentError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    TooLarge {
        path: PathBuf,
        size: u64,
    },
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentError::Read { path, source } => {
                write!(f, "Failed to read attachment {}: {}", path.display(), source)
            }
            AttachmentError::TooLarge { path, size } => write!(
                f,
                "Attachment {} is {size} bytes; the limit is {MAX_ATTACHMENT_BYTES}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for AttachmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttachmentError::Read { source, .. } => Some(source),
            AttachmentError::TooLarge { .. } => None,
        }
    }
}

/// Guess a MIME type from the file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

pub fn data_url(content_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{content_type};base64,{}",
        general_purpose::STANDARD.encode(bytes)
    )
}

/// Read a local file into an attachment carrying an inline data URL.
pub fn load_attachment(path: &Path) -> Result<Attachment, AttachmentError> {
    let read_err = |source: std::io::Error| AttachmentError::Read {
        path: path.to_path_buf(),
        source,
    };
    let size = fs::metadata(path).map_err(read_err)?.len();
    if size > MAX_ATTACHMENT_BYTES {
        return Err(AttachmentError::TooLarge {
            path: path.to_path_buf(),
            size,
        });
    }
    let bytes = fs::read(path).map_err(read_err)?;
    let content_type = content_type_for(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());
    Ok(Attachment::new(name, data_url(content_type, &bytes), content_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn mime_guess_is_case_insensitive() {
        assert_eq!(content_type_for(Path::new("cat.PNG")), "image/png");
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn loads_file_as_data_url() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        file.write_all(b"hi").unwrap();
        let attachment = load_attachment(file.path()).unwrap();
        assert_eq!(attachment.content_type, "text/plain");
        assert_eq!(attachment.url, "data:text/plain;base64,aGk=");
        assert!(!attachment.is_image());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_attachment(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.png"));
    }
}
