use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use casegrid_core::{Cells, GridPayload, GridSnapshot, GridStore, GridWrite, RelationMode};
use serde::Deserialize;
use serde_json::Value;
use tracing::error;

use super::{json_body, ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GridQuery {
    #[serde(default)]
    pub mode: Option<String>,
}

pub async fn load_grid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<GridQuery>,
) -> ApiResult<GridPayload> {
    let mode = query.mode.as_deref().map(str::trim).unwrap_or_default();
    if mode.is_empty() {
        return Err(ApiError::Rejected("Mode is required."));
    }
    let mode: RelationMode = mode
        .parse()
        .map_err(|_| ApiError::Rejected("Mode must be one of weapons, locations, loc-weapons."))?;

    match state.publisher.load(&id, mode).await {
        Ok(snapshot) => Ok(Json(snapshot.into())),
        Err(err) if err.is_not_found() => Ok(Json(GridPayload::default())),
        Err(err) => {
            error!(case_id = %id, %mode, error = %err, "failed to load grid");
            Err(ApiError::Internal("Failed to load grid state."))
        }
    }
}

/// Create-or-replace one grid of an existing case, then broadcast it to every viewer.
pub async fn save_grid(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<GridPayload> {
    let write = parse_grid_write(&json_body(body)?).map_err(ApiError::BadRequest)?;
    let mode = write.mode;
    let snapshot = GridSnapshot {
        case_id: id.clone(),
        mode,
        rows: write.rows,
        cols: write.cols,
        cells: write.cells,
    };

    match state.publisher.save_to_case(snapshot).await {
        Ok(Some(saved)) => Ok(Json(saved.into())),
        Ok(None) => Err(ApiError::NotFound),
        Err(err) => {
            error!(case_id = %id, %mode, error = %err, "failed to save grid");
            Err(ApiError::Internal("Failed to save grid state."))
        }
    }
}

/// Checks a grid write body field by field, reporting every problem at once.
pub fn parse_grid_write(body: &Value) -> Result<GridWrite, Vec<String>> {
    let mode = body
        .get("mode")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    let rows = non_negative(body.get("rows"));
    let cols = non_negative(body.get("cols"));
    let cells = body.get("cells").filter(|cells| cells.is_object());

    let mut errors = Vec::new();
    if mode.is_empty() {
        errors.push("Mode is required.".to_string());
    }
    if rows.is_none() {
        errors.push("Rows must be a non-negative integer.".to_string());
    }
    if cols.is_none() {
        errors.push("Cols must be a non-negative integer.".to_string());
    }
    if cells.is_none() {
        errors.push("Cells payload is required.".to_string());
    }
    let (Some(rows), Some(cols), Some(cells)) = (rows, cols, cells) else {
        return Err(errors);
    };
    if !errors.is_empty() {
        return Err(errors);
    }

    let mode = mode
        .parse::<RelationMode>()
        .map_err(|_| vec!["Mode must be one of weapons, locations, loc-weapons.".to_string()])?;
    let cells = serde_json::from_value::<Cells>(cells.clone())
        .map_err(|_| vec!["Cells payload is invalid.".to_string()])?;
    Ok(GridWrite {
        mode,
        rows,
        cols,
        cells,
    })
}

/// Integral numbers, or strings holding one, that are zero or greater. `2.0` counts.
fn non_negative(value: Option<&Value>) -> Option<usize> {
    let number = match value? {
        Value::Number(number) => {
            if let Some(n) = number.as_u64() {
                return usize::try_from(n).ok();
            }
            number.as_f64()?
        }
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if number.is_finite() && number >= 0.0 && number.fract() == 0.0 {
        usize::try_from(number as u64).ok()
    } else {
        None
    }
}
