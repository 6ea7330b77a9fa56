//! HTTP client for the case and grid endpoints.
//!
//! `ApiClient` is also the viewer-side [`GridStore`]: loads and upserts go through
//! `/api/cases/:id/grid`, and the server broadcasts every accepted upsert.

use async_trait::async_trait;
use casegrid_core::{
    Case, CaseDraft, CaseSummary, GridError, GridPayload, GridSnapshot, GridStore, GridWrite,
    RelationMode,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("case {0} not found")]
    NotFound(String),
    #[error("request rejected: {}", .0.join(" "))]
    Rejected(Vec<String>),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

impl From<ClientError> for GridError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(err) if err.is_connect() || err.is_timeout() => {
                GridError::ConnectionLost(err.to_string())
            }
            other => GridError::PersistenceFailure(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorsBody {
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_cases(&self) -> Result<Vec<CaseSummary>, ClientError> {
        let res = self
            .http
            .get(format!("{}/api/cases", self.base_url))
            .send()
            .await?;
        decode(res, "").await
    }

    pub async fn case(&self, id: &str) -> Result<Case, ClientError> {
        let res = self
            .http
            .get(format!("{}/api/cases/{}", self.base_url, id))
            .send()
            .await?;
        decode(res, id).await
    }

    pub async fn create_case(&self, draft: &CaseDraft) -> Result<Case, ClientError> {
        let res = self
            .http
            .post(format!("{}/api/cases", self.base_url))
            .json(draft)
            .send()
            .await?;
        decode(res, "").await
    }

    pub async fn update_case(&self, id: &str, draft: &CaseDraft) -> Result<Case, ClientError> {
        let res = self
            .http
            .put(format!("{}/api/cases/{}", self.base_url, id))
            .json(draft)
            .send()
            .await?;
        decode(res, id).await
    }

    pub async fn delete_case(&self, id: &str) -> Result<(), ClientError> {
        let res = self
            .http
            .delete(format!("{}/api/cases/{}", self.base_url, id))
            .send()
            .await?;
        check(res, id).await.map(|_| ())
    }

    pub async fn grid(
        &self,
        case_id: &str,
        mode: RelationMode,
    ) -> Result<GridPayload, ClientError> {
        let res = self
            .http
            .get(format!("{}/api/cases/{}/grid", self.base_url, case_id))
            .query(&[("mode", mode.as_str())])
            .send()
            .await?;
        decode(res, case_id).await
    }

    pub async fn put_grid(
        &self,
        case_id: &str,
        write: &GridWrite,
    ) -> Result<GridPayload, ClientError> {
        let res = self
            .http
            .post(format!("{}/api/cases/{}/grid", self.base_url, case_id))
            .json(write)
            .send()
            .await?;
        decode(res, case_id).await
    }
}

async fn check(res: Response, id: &str) -> Result<Response, ClientError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(id.to_string()));
    }
    let body = res.text().await.unwrap_or_default();
    if status == StatusCode::BAD_REQUEST {
        if let Ok(parsed) = serde_json::from_str::<ErrorsBody>(&body) {
            let mut errors = parsed.errors;
            errors.extend(parsed.error);
            return Err(ClientError::Rejected(errors));
        }
    }
    Err(ClientError::UnexpectedStatus { status, body })
}

async fn decode<T: DeserializeOwned>(res: Response, id: &str) -> Result<T, ClientError> {
    Ok(check(res, id).await?.json::<T>().await?)
}

#[async_trait]
impl GridStore for ApiClient {
    async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError> {
        let payload = self.grid(case_id, mode).await?;
        if payload.is_absent() {
            return Err(GridError::not_found(case_id, mode));
        }
        Ok(payload.into_snapshot(case_id, mode))
    }

    async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
        let write = GridWrite::from(&snapshot);
        let payload = self.put_grid(&snapshot.case_id, &write).await?;
        Ok(payload.into_snapshot(snapshot.case_id, snapshot.mode))
    }
}
