use std::{collections::HashMap, path::Path};

use axum::{body::Bytes, extract::Multipart};
use tokio::fs;
use uuid::Uuid;

use crate::errors::RequestError;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
/// URL prefix the upload directory is served under.
pub const PUBLIC_PREFIX: &str = "/uploads";

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Text fields of a multipart form plus the file sent under `file_field`.
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl MultipartForm {
    /// A text field, with blank values treated as missing.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

pub async fn read_multipart(
    mut multipart: Multipart,
    file_field: &str,
) -> Result<MultipartForm, RequestError> {
    let mut form = MultipartForm::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Malformed multipart body: {}", e);
                return Err(RequestError::BadRequest("Malformed multipart body"));
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let file_name = field.file_name().unwrap_or("upload").to_string();
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|_| RequestError::BadRequest("Failed to read the uploaded file"))?;
            // Browsers send an empty part when no file was picked.
            if !data.is_empty() {
                form.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
        } else {
            let value = field
                .text()
                .await
                .map_err(|_| RequestError::BadRequest("Malformed multipart body"))?;
            form.fields.insert(name, value);
        }
    }
    Ok(form)
}

fn extension_for(file: &UploadedFile) -> String {
    let from_name = Path::new(&file.file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    from_name.unwrap_or_else(|| match file.content_type.as_deref() {
        Some("image/png") => "png".to_string(),
        Some("image/gif") => "gif".to_string(),
        Some("image/webp") => "webp".to_string(),
        _ => "jpg".to_string(),
    })
}

fn check_image(file: &UploadedFile) -> Result<(), RequestError> {
    if file.data.len() > MAX_IMAGE_BYTES {
        return Err(RequestError::BadRequest("Image exceeds the 5 MB limit"));
    }
    match file.content_type.as_deref() {
        Some(ct) if ct.starts_with("image/") => Ok(()),
        _ => Err(RequestError::BadRequest("Only image uploads are allowed")),
    }
}

/// Saves an image under `dir/subdir` with a random name and returns its
/// public URL.
pub async fn store_image(
    dir: &Path,
    subdir: Option<&str>,
    file: &UploadedFile,
) -> Result<String, RequestError> {
    check_image(file)?;

    let target_dir = match subdir {
        Some(subdir) => dir.join(subdir),
        None => dir.to_path_buf(),
    };
    fs::create_dir_all(&target_dir).await.map_err(|e| {
        tracing::error!("Failed to create upload directory {:?}: {}", target_dir, e);
        RequestError::ServerError
    })?;

    let file_name = format!("{}.{}", Uuid::new_v4(), extension_for(file));
    let path = target_dir.join(&file_name);
    fs::write(&path, &file.data).await.map_err(|e| {
        tracing::error!("Failed to save upload {:?}: {}", path, e);
        RequestError::ServerError
    })?;
    tracing::info!(path = ?path, bytes = file.data.len(), "Stored upload");

    Ok(match subdir {
        Some(subdir) => format!("{PUBLIC_PREFIX}/{subdir}/{file_name}"),
        None => format!("{PUBLIC_PREFIX}/{file_name}"),
    })
}
