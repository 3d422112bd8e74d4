use crate::backend::{AttrMod, Filter};
use crate::dn::Dn;
use crate::engine::EdgeOp;
use crate::error::MemberOfError;
use crate::{MEMBER_ATTR, MEMBER_OF_ATTR, MemberOfEngine};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Arguments for an administrative index rebuild. The scan root is
/// required; the filter defaults to the configured user-like filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupParams {
    pub base_dn: Dn,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Finished,
}

/// Shared status object for a running or completed fixup task: state,
/// progress counters, and a bounded log of per-entry failures.
#[derive(Debug)]
pub struct FixupStatus {
    state: Mutex<TaskState>,
    entries_examined: AtomicU64,
    entries_failed: AtomicU64,
    log: Mutex<VecDeque<String>>,
    log_capacity: usize,
}

impl FixupStatus {
    fn new(log_capacity: usize) -> Self {
        Self {
            state: Mutex::new(TaskState::Running),
            entries_examined: AtomicU64::new(0),
            entries_failed: AtomicU64::new(0),
            log: Mutex::new(VecDeque::new()),
            log_capacity,
        }
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn entries_examined(&self) -> u64 {
        self.entries_examined.load(Ordering::Relaxed)
    }

    pub fn entries_failed(&self) -> u64 {
        self.entries_failed.load(Ordering::Relaxed)
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.lock().iter().cloned().collect()
    }

    fn push_log(&self, line: String) {
        let mut log = self.log.lock();
        if log.len() == self.log_capacity {
            log.pop_front();
        }
        log.push_back(line);
    }

    fn finish(&self) {
        *self.state.lock() = TaskState::Finished;
    }
}

/// Handle to a spawned fixup task.
#[derive(Debug)]
pub struct FixupTask {
    id: Uuid,
    status: Arc<FixupStatus>,
    handle: Option<JoinHandle<()>>,
}

impl FixupTask {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> Arc<FixupStatus> {
        Arc::clone(&self.status)
    }

    /// Blocks until the worker thread exits. Dropping the handle without
    /// waiting leaves the task running detached.
    pub fn wait(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl MemberOfEngine {
    /// Starts an asynchronous, best-effort rebuild of the reverse index for
    /// every entry matching the filter under the scan root.
    ///
    /// Argument faults and thread-creation failure surface synchronously;
    /// everything after that is reported through the status object. The
    /// worker holds the operation lock per entry, not across the scan, and
    /// the clear/re-derive pair on a single entry is not transactional — a
    /// concurrent write landing in that window can be lost, an accepted
    /// limitation of the batch tool.
    pub fn start_fixup(self: &Arc<Self>, params: FixupParams) -> Result<FixupTask, MemberOfError> {
        if params.base_dn.is_empty() {
            return Err(MemberOfError::InvalidTaskArguments {
                message: "basedn is required".into(),
            });
        }
        let filter = params
            .filter
            .clone()
            .unwrap_or_else(|| self.config.fixup_default_filter.clone());
        let id = Uuid::new_v4();
        let status = Arc::new(FixupStatus::new(self.config.task_log_capacity));
        let engine = Arc::clone(self);
        let worker_status = Arc::clone(&status);
        let base = params.base_dn.clone();
        let worker_filter = filter.clone();
        let handle = std::thread::Builder::new()
            .name(format!("memberof-fixup-{id}"))
            .spawn(move || engine.run_fixup(&base, &worker_filter, &worker_status))?;
        info!(%id, base = %params.base_dn, %filter, "fixup task started");
        Ok(FixupTask {
            id,
            status,
            handle: Some(handle),
        })
    }

    fn run_fixup(&self, base: &Dn, filter: &Filter, status: &FixupStatus) {
        status.push_log(format!("fixup starting under {base} with {filter}"));
        let targets: Vec<Dn> = match self.backend.search(base, filter) {
            Ok(matches) => matches.map(|e| e.dn().clone()).collect(),
            Err(err) => {
                warn!(%base, error = %err, "fixup subtree search failed");
                status.push_log(format!("subtree search failed: {err}"));
                status.finish();
                return;
            }
        };
        for dn in targets {
            if let Err(err) = self.rebuild_entry(&dn) {
                status.entries_failed.fetch_add(1, Ordering::Relaxed);
                status.push_log(format!("{dn}: {err}"));
                warn!(%dn, error = %err, "fixup failed for entry");
            }
            status.entries_examined.fetch_add(1, Ordering::Relaxed);
        }
        info!(%base, examined = status.entries_examined(), failed = status.entries_failed(),
            "fixup task finished");
        status.push_log("fixup finished".to_string());
        status.finish();
    }

    /// Rebuilds one entry's reverse membership from scratch: clear every
    /// present value, then re-derive direct and indirect memberships from
    /// the groups listing the entry as a direct member.
    pub fn rebuild_entry(&self, dn: &Dn) -> Result<(), MemberOfError> {
        let _guard = self.op_lock.lock();
        self.backend
            .modify(dn, &[AttrMod::replace(MEMBER_OF_ATTR, Vec::new())])?;
        let groups: Vec<Dn> = self
            .backend
            .search(&Dn::root(), &Filter::equals(MEMBER_ATTR, dn.as_str()))?
            .map(|e| e.dn().clone())
            .collect();
        for group in groups {
            self.apply_membership_edge(EdgeOp::Add, &group, dn);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FixupParams;
    use crate::backend::MemoryDirectory;
    use crate::config::MemberOfConfig;
    use crate::dn::Dn;
    use crate::error::MemberOfError;
    use crate::MemberOfEngine;
    use std::sync::Arc;

    #[test]
    fn missing_base_dn_is_rejected_synchronously() {
        let engine = Arc::new(MemberOfEngine::new(
            Arc::new(MemoryDirectory::new()),
            MemberOfConfig::default(),
        ));
        let err = engine
            .start_fixup(FixupParams {
                base_dn: Dn::root(),
                filter: None,
            })
            .expect_err("empty basedn");
        assert!(matches!(err, MemberOfError::InvalidTaskArguments { .. }));
    }

    #[test]
    fn status_log_is_bounded() {
        let status = super::FixupStatus::new(2);
        status.push_log("one".into());
        status.push_log("two".into());
        status.push_log("three".into());
        assert_eq!(status.log_lines(), vec!["two".to_string(), "three".to_string()]);
    }
}
