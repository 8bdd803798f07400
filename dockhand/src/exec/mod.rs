//! Exec sessions: extra processes run inside a running container.
//!
//! Sessions live in a daemon-wide table (for inspect by id) and in the
//! owning container's `exec_ids` while the process is alive. Finished
//! sessions stay inspectable until garbage collection purges them.

mod gc;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use dockhand_shared::errors::{DockhandError, DockhandResult};

use crate::runtime::types::{ContainerId, ExecId};

pub(crate) use gc::collect;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub user: String,
    pub working_dir: String,
    pub tty: bool,
    pub privileged: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub detach_keys: String,
}

impl ExecConfig {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecInspect {
    pub id: ExecId,
    pub container_id: ContainerId,
    pub config: ExecConfig,
    pub running: bool,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    /// Marked by one GC pass, purged by the next.
    pub can_remove: bool,
}

#[derive(Debug)]
pub(crate) struct ExecSession {
    pub(crate) id: ExecId,
    pub(crate) container_id: ContainerId,
    pub(crate) config: ExecConfig,
    pub(crate) started: bool,
    pub(crate) running: bool,
    pub(crate) exit_code: Option<i32>,
    pub(crate) pid: Option<u32>,
    pub(crate) can_remove: bool,
    exit_tx: watch::Sender<Option<i32>>,
}

pub(crate) type SharedSession = Arc<Mutex<ExecSession>>;

impl ExecSession {
    pub(crate) fn new(id: ExecId, container_id: ContainerId, config: ExecConfig) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            id,
            container_id,
            config,
            started: false,
            running: false,
            exit_code: None,
            pid: None,
            can_remove: false,
            exit_tx,
        }
    }

    pub(crate) fn set_running(&mut self, pid: u32) {
        self.started = true;
        self.running = true;
        self.pid = Some(pid);
    }

    pub(crate) fn set_exited(&mut self, exit_code: i32) {
        self.running = false;
        self.exit_code = Some(exit_code);
        self.exit_tx.send_replace(Some(exit_code));
    }

    pub(crate) fn subscribe_exit(&self) -> watch::Receiver<Option<i32>> {
        self.exit_tx.subscribe()
    }

    pub(crate) fn inspect(&self) -> ExecInspect {
        ExecInspect {
            id: self.id.clone(),
            container_id: self.container_id.clone(),
            config: self.config.clone(),
            running: self.running,
            exit_code: self.exit_code,
            pid: self.pid,
            can_remove: self.can_remove,
        }
    }
}

/// Daemon-wide exec table.
#[derive(Default)]
pub(crate) struct ExecStore {
    sessions: RwLock<HashMap<ExecId, SharedSession>>,
}

impl ExecStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, session: ExecSession) -> SharedSession {
        let id = session.id.clone();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().insert(id, shared.clone());
        shared
    }

    pub(crate) fn get(&self, id: &str) -> DockhandResult<SharedSession> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DockhandError::NotFound(format!("No such exec instance: {}", id)))
    }

    pub(crate) fn delete(&self, id: &str) -> Option<SharedSession> {
        self.sessions.write().remove(id)
    }

    pub(crate) fn ids(&self) -> Vec<ExecId> {
        self.sessions.read().keys().cloned().collect()
    }

    pub(crate) fn for_container(&self, container_id: &ContainerId) -> Vec<SharedSession> {
        self.sessions
            .read()
            .values()
            .filter(|s| &s.lock().container_id == container_id)
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_add_get_delete() {
        let store = ExecStore::new();
        let cid = ContainerId::new();
        store.add(ExecSession::new("e1".into(), cid.clone(), ExecConfig::new(["ls"])));
        store.add(ExecSession::new("e2".into(), ContainerId::new(), ExecConfig::new(["ls"])));

        assert_eq!(store.len(), 2);
        assert_eq!(store.for_container(&cid).len(), 1);
        assert!(store.get("e1").is_ok());
        assert!(store.get("nope").unwrap_err().is_not_found());

        assert!(store.delete("e1").is_some());
        assert!(store.get("e1").is_err());
    }

    #[tokio::test]
    async fn test_exit_is_observable() {
        let mut session = ExecSession::new("e1".into(), ContainerId::new(), ExecConfig::new(["ls"]));
        let mut rx = session.subscribe_exit();
        session.set_running(10);
        assert!(session.inspect().running);

        session.set_exited(2);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(2));
        let view = session.inspect();
        assert!(!view.running);
        assert_eq!(view.exit_code, Some(2));
    }
}
