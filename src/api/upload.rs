use salvo::prelude::*;
use serde::Serialize;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::utils::{get_app_state, AppError};

/// The CSV reader picks its delimiter from these extensions.
const ALLOWED_EXTENSIONS: [&str; 2] = ["csv", "tsv"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Value for the `uploadedFileRef` field of a CSV_FILE data source.
    pub uploaded_file_ref: String,
    pub size_bytes: u64,
}

/// Store a CSV upload under `UPLOAD_DIR` with a generated name.
#[handler]
pub async fn upload_csv(req: &mut Request, res: &mut Response, depot: &mut Depot) -> Result<(), AppError> {
    let state = get_app_state(depot)?;

    let file = req
        .file("file")
        .await
        .ok_or_else(|| AppError::BadRequest("Missing file field".to_string()))?;

    let file_extension = file
        .name()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "csv".to_string());
    if !ALLOWED_EXTENSIONS.contains(&file_extension.as_str()) {
        return Err(AppError::Validation(format!(
            "File extension '.{}' is not allowed. Allowed extensions: {}",
            file_extension,
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to create upload directory: {}", e)))?;

    let file_name = format!("{}.{}", Uuid::new_v4(), file_extension);
    let destination = upload_dir.join(&file_name);
    let size_bytes = tokio::fs::copy(file.path(), &destination)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to save file: {}", e)))?;

    info!("📁 Stored CSV upload {} ({} bytes)", file_name, size_bytes);
    res.status_code(StatusCode::CREATED);
    res.render(Json(UploadResponse {
        uploaded_file_ref: file_name,
        size_bytes,
    }));
    Ok(())
}
