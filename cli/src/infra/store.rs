//! File-backed implementation of the `MachineStore` port.
//!
//! One JSON document per machine under `{state_dir}/machines/{id}.json`.
//! Workflow locks live beside them in `{state_dir}/locks/`, so every
//! `devmachine` process pointed at the same state directory shares them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use devmachine_common::Machine;

use crate::application::ports::MachineStore;
use crate::domain::naming::validate_machine_id;
use crate::infra::fs;
use crate::infra::lock::{self, FileLock};

pub struct FileMachineStore {
    dir: PathBuf,
    locks: PathBuf,
}

impl FileMachineStore {
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        Self {
            dir: state_dir.join("machines"),
            locks: state_dir.join("locks"),
        }
    }

    /// `owner:dm-acme` becomes `owner_dm-acme.lock`.
    fn lock_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ':');
        if !valid {
            anyhow::bail!("invalid lock key '{key}'");
        }
        Ok(self.locks.join(format!("{}.lock", key.replace(':', "_"))))
    }

    fn path_for(dir: &Path, id: &str) -> Result<PathBuf> {
        validate_machine_id(id)?;
        Ok(dir.join(format!("{id}.json")))
    }

    fn read(path: &Path) -> Result<Option<Machine>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        let machine: Machine = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(machine))
    }
}

impl MachineStore for FileMachineStore {
    type Lock = FileLock;

    async fn lock(&self, key: &str) -> Result<FileLock> {
        let path = self.lock_path(key)?;
        lock::lock(&path).await
    }

    async fn load(&self, id: &str) -> Result<Option<Machine>> {
        let path = Self::path_for(&self.dir, id)?;
        fs::blocking("machine load", move || Self::read(&path)).await
    }

    async fn save(&self, machine: &Machine) -> Result<()> {
        let path = Self::path_for(&self.dir, &machine.id)?;
        let content = serde_json::to_vec_pretty(machine).context("serializing machine")?;
        fs::blocking("machine save", move || fs::write_atomic(&path, &content)).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let path = Self::path_for(&self.dir, id)?;
        fs::blocking("machine remove", move || fs::remove_if_exists(&path).map(|_| ())).await
    }

    async fn list(&self) -> Result<Vec<Machine>> {
        let dir = self.dir.clone();
        fs::blocking("machine list", move || {
            let mut machines = Vec::new();
            for name in fs::json_files(&dir)? {
                let path = dir.join(&name);
                match Self::read(&path) {
                    Ok(Some(machine)) => machines.push(machine),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %format!("{e:#}"), "skipping unreadable machine record");
                    }
                }
            }
            Ok(machines)
        })
        .await
    }
}
