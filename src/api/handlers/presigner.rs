use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::NameQuery;
use crate::models::PresignResponse;
use crate::utils::validation::validate_object_name;
use axum::{
    Json,
    extract::{Query, State},
};
use tracing::info;

/// Issues a one-time form upload destination for `name`.
#[utoipa::path(
    get,
    path = "/presigner",
    params(NameQuery),
    responses(
        (status = 200, description = "Presigned upload destination", body = PresignResponse),
        (status = 400, description = "Invalid object name")
    ),
    tag = "waveforms"
)]
pub async fn presign_upload(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<PresignResponse>, AppError> {
    let name = validate_object_name(&query.name).map_err(|e| AppError::BadRequest(e.to_string()))?;
    info!("🔏 Presigning upload for {}", name);

    let post = state.storage.presign_upload(name).await?;

    Ok(Json(PresignResponse {
        url: post.url,
        fields: post.fields,
    }))
}
