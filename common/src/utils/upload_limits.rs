use std::path::Path;

use super::config::AppConfig;
use crate::error::AppError;

/// Extension every submitted archive must carry.
pub const ARCHIVE_EXTENSION: &str = ".zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadValidationError {
    PayloadTooLarge(String),
    BadRequest(String),
}

impl From<UploadValidationError> for AppError {
    fn from(err: UploadValidationError) -> Self {
        match err {
            UploadValidationError::PayloadTooLarge(msg)
            | UploadValidationError::BadRequest(msg) => Self::InvalidInput(msg),
        }
    }
}

/// Checks the declared file name of an upload. Runs before anything touches disk.
pub fn validate_archive_name(file_name: &str) -> Result<(), UploadValidationError> {
    let base = base_name(file_name);
    let has_extension = base
        .to_ascii_lowercase()
        .strip_suffix(ARCHIVE_EXTENSION)
        .is_some_and(|stem| !stem.trim().is_empty());

    if has_extension {
        Ok(())
    } else {
        Err(UploadValidationError::BadRequest(format!(
            "Only {ARCHIVE_EXTENSION} archives are accepted"
        )))
    }
}

pub fn validate_upload(
    config: &AppConfig,
    file_name: Option<&str>,
    size_bytes: u64,
) -> Result<(), UploadValidationError> {
    let Some(file_name) = file_name else {
        return Err(UploadValidationError::BadRequest(
            "Uploaded file has no name".to_string(),
        ));
    };

    validate_archive_name(file_name)?;

    if size_bytes == 0 {
        return Err(UploadValidationError::BadRequest(
            "Uploaded file is empty".to_string(),
        ));
    }

    let limit = u64::try_from(config.upload_max_bytes).unwrap_or(u64::MAX);
    if size_bytes > limit {
        return Err(UploadValidationError::PayloadTooLarge(format!(
            "Upload is too large. Maximum allowed is {limit} bytes"
        )));
    }

    Ok(())
}

/// Display name for a job: the upload's base name without the archive extension.
pub fn display_name_for(file_name: &str) -> String {
    let base = base_name(file_name);
    let stem_len = base.len().saturating_sub(ARCHIVE_EXTENSION.len());
    let stem = if base.to_ascii_lowercase().ends_with(ARCHIVE_EXTENSION) {
        base.get(..stem_len).unwrap_or(base)
    } else {
        base
    };

    let cleaned: String = stem
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() {
        "build".to_string()
    } else {
        cleaned.to_string()
    }
}

// Browsers occasionally send a full client-side path.
fn base_name(file_name: &str) -> &str {
    let last = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    Path::new(last)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(last)
}
