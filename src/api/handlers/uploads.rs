use crate::AppState;
use crate::api::error::AppError;
use crate::models::KEY_FIELD;
use crate::utils::validation::validate_object_name;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
};
use tracing::info;

/// Receives form uploads when the backend runs with in-memory storage,
/// standing in for the bucket's POST endpoint.
pub async fn receive_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let store = state
        .local_uploads
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Local uploads are disabled".to_string()))?;

    let mut key = None;
    let mut data = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            KEY_FIELD => {
                key = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                );
            }
            "file" => {
                // Fields after the file part are ignored, like S3 does
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.to_string()))?,
                );
                break;
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| AppError::BadRequest("Missing 'key' field".to_string()))?;
    let data = data.ok_or_else(|| AppError::BadRequest("Missing 'file' field".to_string()))?;
    let key = validate_object_name(&key).map_err(|e| AppError::BadRequest(e.to_string()))?;

    info!("📥 Stored {} ({} bytes)", key, data.len());
    store.put(key, data.to_vec());

    Ok(StatusCode::NO_CONTENT)
}
