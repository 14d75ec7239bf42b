//! File-backed implementation of the `TaskQueue` port.
//!
//! Layout under `{state_dir}/queue/`:
//!
//! - `pending/{enqueued_millis:020}-{task_id}.json` waiting tasks, oldest first
//! - `inflight/{worker_id}/` tasks claimed by one worker and not yet acknowledged
//! - `inflight/{worker_id}.lock` held by that worker for as long as it lives
//! - `dead/` files that could not be decoded
//!
//! Claiming is a rename from `pending/` into the worker's own directory, so
//! two workers never hold the same task. `recover` only requeues directories
//! whose owner lock is free, which means their worker has exited.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::OnceCell;

use crate::application::ports::TaskQueue;
use crate::domain::MachineTask;
use crate::domain::naming::generate_id;
use crate::infra::fs;
use crate::infra::lock::{self, FileLock};

const WORKER_ID_PREFIX: &str = "w-";

pub struct FileTaskQueue {
    root: PathBuf,
    worker_id: String,
    owner: OnceCell<FileLock>,
}

impl FileTaskQueue {
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            root: state_dir.join("queue"),
            worker_id: generate_id(WORKER_ID_PREFIX),
            owner: OnceCell::new(),
        }
    }

    fn file_name(task: &MachineTask) -> String {
        format!(
            "{:020}-{}.json",
            task.enqueued_at.timestamp_millis().max(0),
            task.id
        )
    }

    fn claims_dir(&self) -> PathBuf {
        self.root.join("inflight").join(&self.worker_id)
    }

    /// Taken before the first claim and held until the queue is dropped.
    async fn ensure_owner(&self) -> Result<()> {
        let path = self
            .root
            .join("inflight")
            .join(format!("{}.lock", self.worker_id));
        self.owner.get_or_try_init(|| lock::lock(&path)).await?;
        Ok(())
    }

    fn claim_sync(root: &Path, claims: &Path, limit: usize) -> Result<Vec<MachineTask>> {
        let pending = root.join("pending");
        std::fs::create_dir_all(claims)
            .with_context(|| format!("creating directory {}", claims.display()))?;

        let mut claimed = Vec::new();
        for name in fs::json_files(&pending)? {
            if claimed.len() >= limit {
                break;
            }
            let target = claims.join(&name);
            match std::fs::rename(pending.join(&name), &target) {
                Ok(()) => {}
                // Another worker got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).with_context(|| format!("claiming {name}")),
            }
            match read_task(&target) {
                Ok(task) => claimed.push(task),
                Err(e) => {
                    tracing::warn!(file = %name, error = %format!("{e:#}"), "moving undecodable task aside");
                    let dead = root.join("dead");
                    std::fs::create_dir_all(&dead)
                        .with_context(|| format!("creating directory {}", dead.display()))?;
                    std::fs::rename(&target, dead.join(&name))
                        .with_context(|| format!("moving {name} to dead letters"))?;
                }
            }
        }
        Ok(claimed)
    }

    fn ack_sync(claims: &Path, task_id: &str) -> Result<()> {
        let suffix = format!("-{task_id}.json");
        for name in fs::json_files(claims)? {
            if name.ends_with(&suffix) {
                fs::remove_if_exists(&claims.join(&name))?;
                return Ok(());
            }
        }
        tracing::debug!(task_id, "ack for task not in flight");
        Ok(())
    }

    fn recover_sync(root: &Path, own_id: &str) -> Result<usize> {
        let inflight = root.join("inflight");
        let mut moved = 0;
        for worker_id in owner_dirs(&inflight)? {
            if worker_id == own_id {
                continue;
            }
            let lock_path = inflight.join(format!("{worker_id}.lock"));
            let Some(_owner) = lock::try_lock(&lock_path)? else {
                tracing::debug!(worker_id, "in-flight tasks held by a running worker");
                continue;
            };
            let claims = inflight.join(&worker_id);
            moved += requeue_all(root, &claims)?;
            std::fs::remove_dir(&claims)
                .with_context(|| format!("removing {}", claims.display()))?;
            fs::remove_if_exists(&lock_path)?;
            tracing::debug!(worker_id, "requeued tasks of exited worker");
        }
        Ok(moved)
    }
}

/// Worker ids with a claims directory under `inflight`.
fn owner_dirs(inflight: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(inflight) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("reading directory {}", inflight.display()));
        }
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("reading directory {}", inflight.display()))?;
        let is_dir = entry
            .file_type()
            .with_context(|| format!("inspecting {}", entry.path().display()))?
            .is_dir();
        if is_dir && let Some(name) = entry.file_name().to_str() {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

fn requeue_all(root: &Path, claims: &Path) -> Result<usize> {
    let names = fs::json_files(claims)?;
    if names.is_empty() {
        return Ok(0);
    }
    let pending = root.join("pending");
    std::fs::create_dir_all(&pending)
        .with_context(|| format!("creating directory {}", pending.display()))?;
    for name in &names {
        std::fs::rename(claims.join(name), pending.join(name))
            .with_context(|| format!("requeueing {name}"))?;
    }
    Ok(names.len())
}

fn read_task(path: &Path) -> Result<MachineTask> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

impl TaskQueue for FileTaskQueue {
    async fn enqueue(&self, task: &MachineTask) -> Result<()> {
        let path = self.root.join("pending").join(Self::file_name(task));
        let content = serde_json::to_vec(task).context("serializing task")?;
        fs::blocking("task enqueue", move || fs::write_atomic(&path, &content)).await?;
        tracing::debug!(task_id = %task.id, machine_id = %task.machine_id, kind = task.kind.name(), "task enqueued");
        Ok(())
    }

    async fn claim(&self, limit: usize) -> Result<Vec<MachineTask>> {
        self.ensure_owner().await?;
        let root = self.root.clone();
        let claims = self.claims_dir();
        fs::blocking("task claim", move || Self::claim_sync(&root, &claims, limit)).await
    }

    async fn ack(&self, task_id: &str) -> Result<()> {
        let claims = self.claims_dir();
        let task_id = task_id.to_string();
        fs::blocking("task ack", move || Self::ack_sync(&claims, &task_id)).await
    }

    async fn recover(&self) -> Result<usize> {
        let root = self.root.clone();
        let own_id = self.worker_id.clone();
        fs::blocking("task recover", move || Self::recover_sync(&root, &own_id)).await
    }
}
