use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Utc;
use dashmap::DashMap;
use tokio::{io::AsyncWriteExt, sync::Mutex};
use uuid::Uuid;

use crate::models::{RenderEvent, RenderOutput, RenderRecord, RenderRequest, RenderStatus};

pub const DEFAULT_RETENTION: usize = 1000;

/// Render records by job id. Finished records are optionally appended to a
/// JSON-lines file so they outlive the process. Only the most recent
/// `retention` finished records stay in memory; queued and running ones are
/// never evicted.
#[derive(Clone)]
pub struct RenderStore {
    records: Arc<DashMap<Uuid, RenderRecord>>,
    finished: Arc<Mutex<VecDeque<Uuid>>>,
    retention: usize,
    persistence_path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl RenderStore {
    pub fn new(persistence_path: Option<PathBuf>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            finished: Arc::new(Mutex::new(VecDeque::new())),
            retention: DEFAULT_RETENTION,
            persistence_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn create_record(&self, id: Uuid, request: &RenderRequest) -> RenderRecord {
        let record = RenderRecord {
            id,
            status: RenderStatus::Queued,
            scene_count: request.scenes.len(),
            theme: request.theme.clone(),
            output: None,
            error: None,
            events: Vec::new(),
            created_at_ms: now_ms(),
            started_at_ms: None,
            finished_at_ms: None,
        };
        self.records.insert(id, record.clone());
        record
    }

    pub fn get(&self, id: &Uuid) -> Option<RenderRecord> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &Uuid) {
        self.records.remove(id);
    }

    pub fn mark_running(&self, id: Uuid) {
        if let Some(mut entry) = self.records.get_mut(&id) {
            entry.status = RenderStatus::Running;
            entry.started_at_ms = Some(now_ms());
        }
    }

    pub fn append_event(&self, id: Uuid, stage: &str, message: impl Into<String>) {
        if let Some(mut entry) = self.records.get_mut(&id) {
            entry.events.push(RenderEvent {
                ts_ms: now_ms(),
                stage: stage.to_string(),
                message: message.into(),
            });
        }
    }

    pub async fn mark_finished(
        &self,
        id: Uuid,
        status: RenderStatus,
        output: Option<RenderOutput>,
        error: Option<String>,
    ) {
        let snapshot = self.records.get_mut(&id).map(|mut entry| {
            entry.status = status;
            entry.output = output;
            entry.error = error;
            entry.finished_at_ms = Some(now_ms());
            entry.clone()
        });
        if snapshot.is_some() {
            self.evict_beyond_retention(id).await;
        }

        if let (Some(path), Some(record)) = (&self.persistence_path, snapshot) {
            let _guard = self.write_lock.lock().await;
            if let Err(err) = append_line(path, &record).await {
                tracing::warn!(job_id = %id, path = %path.display(), error = %err, "failed to persist render record");
            }
        }
    }

    async fn evict_beyond_retention(&self, finished_id: Uuid) {
        let mut finished = self.finished.lock().await;
        if !finished.contains(&finished_id) {
            finished.push_back(finished_id);
        }
        while finished.len() > self.retention {
            if let Some(oldest) = finished.pop_front() {
                self.records.remove(&oldest);
                tracing::debug!(job_id = %oldest, "render record evicted");
            }
        }
    }
}

async fn append_line(path: &Path, record: &RenderRecord) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    Ok(())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
