use axum::extract::multipart::{Field, Multipart, MultipartError};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::error::ApiError;

pub const FILE_FIELD: &str = "file";
const ALLOWED_EXTENSION: &str = "pdf";

#[derive(Debug)]
pub struct PdfUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Pulls the `file` field out of the form, enforcing name, type and size rules.
pub async fn read_pdf_upload(
    multipart: &mut Multipart,
    max_file_size: usize,
) -> Result<PdfUpload, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = validate_filename(field.file_name())?;
        let bytes = read_limited(field, max_file_size).await?;
        if bytes.is_empty() {
            return Err(ApiError::Validation("Uploaded file is empty".to_string()));
        }

        return Ok(PdfUpload { filename, bytes });
    }

    Err(ApiError::Validation(format!(
        "multipart field '{FILE_FIELD}' is required"
    )))
}

pub fn validate_filename(filename: Option<&str>) -> Result<String, ApiError> {
    let filename = filename
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::Validation("Filename cannot be empty.".to_string()))?;

    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();

    if extension != ALLOWED_EXTENSION {
        return Err(ApiError::Validation(format!(
            "Invalid file type '.{extension}'. Only PDF allowed."
        )));
    }

    Ok(filename.to_string())
}

async fn read_limited(mut field: Field<'_>, max_file_size: usize) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        if bytes.len() + chunk.len() > max_file_size {
            return Err(ApiError::Validation(format!(
                "File exceeds the {}MB limit",
                max_file_size / (1024 * 1024)
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

fn multipart_error(error: MultipartError) -> ApiError {
    ApiError::Validation(format!("invalid multipart upload: {error}"))
}

/// An upload written to disk; the file is removed when this guard drops.
#[derive(Debug)]
pub struct TempUpload {
    path: PathBuf,
    saved_as: String,
}

impl TempUpload {
    pub async fn persist(dir: &Path, bytes: &[u8]) -> Result<Self, ApiError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|error| ApiError::Internal(format!("cannot create upload dir: {error}")))?;

        let saved_as = format!("{}.{ALLOWED_EXTENSION}", Uuid::new_v4().simple());
        let upload = Self {
            path: dir.join(&saved_as),
            saved_as,
        };
        tokio::fs::write(&upload.path, bytes)
            .await
            .map_err(|error| ApiError::Internal(format!("cannot store upload: {error}")))?;

        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn saved_as(&self) -> &str {
        &self.saved_as
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed upload"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(path = %self.path.display(), error = %error, "failed to remove upload")
            }
        }
    }
}
