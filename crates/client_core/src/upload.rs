//! Client-side checks applied before a pack is sent to the upload endpoint.

use thiserror::Error;

pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
const ZIP_MIME: &str = "application/zip";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejected {
    #[error("'{filename}' is not a .zip file")]
    NotZip { filename: String },
    #[error("'{filename}' is empty")]
    Empty { filename: String },
    #[error(
        "'{}' is {} which exceeds the {} upload limit",
        .filename,
        human_size(.size),
        format_bytes(MAX_UPLOAD_BYTES)
    )]
    TooLarge { filename: String, size: u64 },
}

/// A pack archive that passed the local upload checks.
#[derive(Debug, Clone)]
pub struct PackUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Name and size checks, usable on file metadata before the bytes are read.
pub fn check_upload(filename: &str, size: u64) -> Result<(), UploadRejected> {
    if !filename.to_ascii_lowercase().ends_with(".zip") {
        return Err(UploadRejected::NotZip {
            filename: filename.to_string(),
        });
    }
    if size == 0 {
        return Err(UploadRejected::Empty {
            filename: filename.to_string(),
        });
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(UploadRejected::TooLarge {
            filename: filename.to_string(),
            size,
        });
    }
    Ok(())
}

impl PackUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Result<Self, UploadRejected> {
        let filename = filename.into();
        check_upload(&filename, bytes.len() as u64)?;
        Ok(Self { filename, bytes })
    }

    pub fn mime_type(&self) -> &'static str {
        ZIP_MIME
    }
}

fn human_size(bytes: &u64) -> String {
    format_bytes(*bytes)
}

/// Human readable size with at most two decimals, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{rendered} {}", UNITS[unit])
}
