use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use casegrid_core::{Case, CaseDraft, CaseSummary};
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use super::{json_body, ApiError, ApiResult};
use crate::storage::{CaseStore, StorageError};
use crate::AppState;

pub async fn list_cases(State(state): State<AppState>) -> ApiResult<Vec<CaseSummary>> {
    let mut cases = state.storage.list_cases().await.map_err(|err| {
        error!(error = %err, "failed to list cases");
        ApiError::Internal("Failed to load cases.")
    })?;
    cases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(cases.iter().map(Case::summary).collect()))
}

pub async fn get_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Case> {
    match state.storage.get_case(&id).await {
        Ok(Some(case)) => Ok(Json(case)),
        Ok(None) => Err(ApiError::NotFound),
        Err(err) => {
            error!(case_id = %id, error = %err, "failed to load case");
            Err(ApiError::Internal("Failed to load case."))
        }
    }
}

pub async fn create_case(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Case>), ApiError> {
    let draft = read_draft(&json_body(body)?)
        .validate()
        .map_err(ApiError::BadRequest)?;
    let case = Case::new(Uuid::new_v4().to_string(), draft);
    let case = state.storage.put_case(case).await.map_err(|err| {
        error!(error = %err, "failed to create case");
        ApiError::Internal("Failed to create case.")
    })?;
    info!(case_id = %case.id, title = %case.title, "case created");
    Ok((StatusCode::CREATED, Json(case)))
}

pub async fn update_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Case> {
    let draft = read_draft(&json_body(body)?)
        .validate()
        .map_err(ApiError::BadRequest)?;
    let internal = |err: StorageError| {
        error!(case_id = %id, error = %err, "failed to update case");
        ApiError::Internal("Failed to update case.")
    };
    let mut case = state
        .storage
        .get_case(&id)
        .await
        .map_err(internal)?
        .ok_or(ApiError::NotFound)?;
    // Stored grids keep their old shape; viewers discard them on the next open.
    case.apply(draft);
    let case = state.storage.put_case(case).await.map_err(internal)?;
    Ok(Json(case))
}

pub async fn delete_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let existed = state.publisher.delete_case(&id).await.map_err(|err| {
        error!(case_id = %id, error = %err, "failed to delete case");
        ApiError::Internal("Failed to delete case.")
    })?;
    if !existed {
        return Err(ApiError::NotFound);
    }
    info!(case_id = %id, "case deleted with its grids");
    Ok(StatusCode::NO_CONTENT)
}

/// Reads a case form loosely: non-string text fields count as blank, a non-array
/// list as empty, and non-string list entries are dropped.
pub fn read_draft(body: &Value) -> CaseDraft {
    let text = |field: &str| {
        body.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let list = |field: &str| -> Vec<String> {
        body.get(field)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    CaseDraft {
        title: text("title"),
        clues: text("clues"),
        suspects: list("suspects"),
        locations: list("locations"),
        weapons: list("weapons"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn loose_form_fields_read_as_blank() {
        let draft = read_draft(&json!({
            "title": 7,
            "clues": "Wet footprints",
            "suspects": ["Ann", 3, null, "Bo"],
            "locations": "Hall",
        }));
        assert_eq!(draft.title, "");
        assert_eq!(draft.clues, "Wet footprints");
        assert_eq!(draft.suspects, vec!["Ann".to_string(), "Bo".to_string()]);
        assert!(draft.locations.is_empty());
        assert!(draft.weapons.is_empty());
    }
}
