use crate::AppState;
use crate::api::error::AppError;
use crate::api::handlers::NameQuery;
use crate::services::npy::NpyArray;
use crate::utils::validation::validate_object_name;
use axum::{
    Json,
    extract::{Query, State},
};
use serde_json::Value;
use tracing::info;

/// Decodes an uploaded `.npy` file into nested JSON arrays.
///
/// A `(1, 7500)` array comes back as `[[...7500 numbers...]]`.
#[utoipa::path(
    get,
    path = "/parser",
    params(NameQuery),
    responses(
        (status = 200, description = "Array contents as nested lists", body = Vec<Vec<f64>>),
        (status = 400, description = "Invalid object name"),
        (status = 404, description = "No uploaded file with that name"),
        (status = 422, description = "File is not a supported NumPy array")
    ),
    tag = "waveforms"
)]
pub async fn parse_waveform(
    State(state): State<AppState>,
    Query(query): Query<NameQuery>,
) -> Result<Json<Value>, AppError> {
    let name = validate_object_name(&query.name).map_err(|e| AppError::BadRequest(e.to_string()))?;
    info!("🧮 Starting parser for {}", name);

    let bytes = state
        .storage
        .get_file(name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No uploaded file named '{}'", name)))?;

    let array =
        NpyArray::parse(&bytes).map_err(|e| AppError::UnprocessableEntity(e.to_string()))?;
    info!("📈 Parsed {} with shape {:?}", name, array.shape);

    Ok(Json(array.to_json()))
}
