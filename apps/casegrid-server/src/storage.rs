use std::sync::Arc;

use async_trait::async_trait;
use casegrid_core::{Case, GridError, GridSnapshot, GridStore, RelationMode};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;
use tracing::info;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("corrupt record at {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for GridError {
    fn from(err: StorageError) -> Self {
        GridError::PersistenceFailure(err.to_string())
    }
}

/// Case records kept next to the grids they size.
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn list_cases(&self) -> Result<Vec<Case>, StorageError>;
    async fn get_case(&self, id: &str) -> Result<Option<Case>, StorageError>;
    /// Insert or replace by id.
    async fn put_case(&self, case: Case) -> Result<Case, StorageError>;
    /// Removes the case and all of its grids. Returns whether the case existed.
    async fn delete_case(&self, id: &str) -> Result<bool, StorageError>;
}

/// Everything the server persists.
pub trait Storage: GridStore + CaseStore {}

impl<T: GridStore + CaseStore + ?Sized> Storage for T {}

pub type SharedStorage = Arc<dyn Storage>;

pub async fn connect(config: &Config) -> anyhow::Result<SharedStorage> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let storage = RedisStorage::new(url).await?;
            info!(redis = %url, "using redis storage");
            Ok(Arc::new(storage))
        }
        None => {
            info!("REDIS_URL unset; using in-memory storage");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    cases: DashMap<String, Case>,
    grids: DashMap<(String, RelationMode), GridSnapshot>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GridStore for MemoryStorage {
    async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError> {
        self.grids
            .get(&(case_id.to_string(), mode))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GridError::not_found(case_id, mode))
    }

    async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
        self.grids
            .insert((snapshot.case_id.clone(), snapshot.mode), snapshot.clone());
        Ok(snapshot)
    }
}

#[async_trait]
impl CaseStore for MemoryStorage {
    async fn list_cases(&self) -> Result<Vec<Case>, StorageError> {
        Ok(self.cases.iter().map(|entry| entry.value().clone()).collect())
    }

    async fn get_case(&self, id: &str) -> Result<Option<Case>, StorageError> {
        Ok(self.cases.get(id).map(|entry| entry.value().clone()))
    }

    async fn put_case(&self, case: Case) -> Result<Case, StorageError> {
        self.cases.insert(case.id.clone(), case.clone());
        Ok(case)
    }

    async fn delete_case(&self, id: &str) -> Result<bool, StorageError> {
        let existed = self.cases.remove(id).is_some();
        self.grids.retain(|(case_id, _), _| case_id != id);
        Ok(existed)
    }
}

const CASE_INDEX_KEY: &str = "casegrid:cases";

fn case_key(id: &str) -> String {
    format!("casegrid:case:{}", id)
}

fn grid_key(case_id: &str, mode: RelationMode) -> String {
    format!("casegrid:grid:{}:{}", case_id, mode)
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|source| StorageError::Corrupt {
        key: key.to_string(),
        source,
    })
}

fn encode<T: serde::Serialize>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|source| StorageError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// Cases and grids as JSON strings; case ids are indexed in a set for listing.
#[derive(Clone)]
pub struct RedisStorage {
    redis: ConnectionManager,
}

impl RedisStorage {
    pub async fn new(redis_url: &str) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }
}

#[async_trait]
impl GridStore for RedisStorage {
    async fn load(&self, case_id: &str, mode: RelationMode) -> Result<GridSnapshot, GridError> {
        let mut conn = self.redis.clone();
        let key = grid_key(case_id, mode);
        let raw: Option<String> = conn.get(&key).await.map_err(StorageError::from)?;
        match raw {
            Some(raw) => Ok(decode(&key, &raw)?),
            None => Err(GridError::not_found(case_id, mode)),
        }
    }

    async fn upsert(&self, snapshot: GridSnapshot) -> Result<GridSnapshot, GridError> {
        let mut conn = self.redis.clone();
        let key = grid_key(&snapshot.case_id, snapshot.mode);
        let serialized = encode(&key, &snapshot)?;
        conn.set::<_, _, ()>(&key, serialized)
            .await
            .map_err(StorageError::from)?;
        Ok(snapshot)
    }
}

#[async_trait]
impl CaseStore for RedisStorage {
    async fn list_cases(&self) -> Result<Vec<Case>, StorageError> {
        let mut conn = self.redis.clone();
        let ids: Vec<String> = conn.smembers(CASE_INDEX_KEY).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| case_key(id)).collect();
        let raws: Vec<Option<String>> = conn.mget(&keys).await?;
        let mut cases = Vec::with_capacity(raws.len());
        for (key, raw) in keys.iter().zip(raws) {
            if let Some(raw) = raw {
                cases.push(decode(key, &raw)?);
            }
        }
        Ok(cases)
    }

    async fn get_case(&self, id: &str) -> Result<Option<Case>, StorageError> {
        let mut conn = self.redis.clone();
        let key = case_key(id);
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|raw| decode(&key, &raw)).transpose()
    }

    async fn put_case(&self, case: Case) -> Result<Case, StorageError> {
        let mut conn = self.redis.clone();
        let key = case_key(&case.id);
        let serialized = encode(&key, &case)?;
        redis::pipe()
            .atomic()
            .set(&key, serialized)
            .ignore()
            .sadd(CASE_INDEX_KEY, &case.id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(case)
    }

    async fn delete_case(&self, id: &str) -> Result<bool, StorageError> {
        let mut conn = self.redis.clone();
        let mut keys = vec![case_key(id)];
        keys.extend(RelationMode::ALL.into_iter().map(|mode| grid_key(id, mode)));
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .srem(CASE_INDEX_KEY, id)
            .del(&keys)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }
}
