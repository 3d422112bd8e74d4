pub mod backend;
pub mod config;
pub mod dn;
pub mod engine;
pub mod error;
pub mod fixup;

pub use crate::backend::{
    AttrMod, DirectoryBackend, Entry, Filter, MemoryDirectory, ModOp, SearchMatches,
};
pub use crate::config::MemberOfConfig;
pub use crate::dn::Dn;
pub use crate::error::{MemberOfError, MemberOfErrorCode};
pub use crate::fixup::{FixupParams, FixupStatus, FixupTask, TaskState};

use crate::engine::{EdgeOp, EdgeWork};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Forward-membership attribute carried by group entries.
pub const MEMBER_ATTR: &str = "member";
/// Derived reverse-membership attribute, owned exclusively by the engine.
pub const MEMBER_OF_ATTR: &str = "memberof";

/// Predicate selecting the entries that act as groups.
pub fn group_filter() -> Filter {
    Filter::present(MEMBER_ATTR)
}

/// A committed directory write, as reported by the core's post-commit hook
/// dispatcher. Handlers are invoked only for operations whose result code
/// indicated success; replicated-origin operations are reported the same
/// way (the reverse-membership attribute itself is never replicated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    Added {
        entry: Entry,
    },
    /// `entry` is the pre-image of the deleted entry.
    Deleted {
        entry: Entry,
    },
    /// `entry` is the post-image under its new identifier.
    Renamed {
        previous_dn: Dn,
        entry: Entry,
    },
    Modified {
        dn: Dn,
        mods: Vec<AttrMod>,
        pre: Entry,
        post: Entry,
    },
}

#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub edges_added: AtomicU64,
    pub edges_removed: AtomicU64,
    pub cycles_detected: AtomicU64,
    pub reconciliations: AtomicU64,
    pub write_failures: AtomicU64,
}

/// Point-in-time snapshot of the engine's activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineMetrics {
    pub edges_added: u64,
    pub edges_removed: u64,
    pub cycles_detected: u64,
    pub reconciliations: u64,
    pub write_failures: u64,
}

/// The reverse-membership index engine.
///
/// Keeps every entry's `memberof` attribute transitively consistent with
/// the `member` attribute on group entries. All index mutations issued by
/// one invocation run behind a single process-wide lock: a mutation can
/// cascade arbitrarily deep into nested groups, and per-entry locking would
/// deadlock along the same cycles the membership graph can form. Directory
/// reads and writes that do not go through the engine are unaffected.
///
/// The engine runs strictly after the triggering write has committed, so
/// none of its failure modes surface to the client operation: cycles are
/// pruned, unresolvable targets fall back to reconciliation, failed edge
/// writes are logged and abandoned. A later fixup task or the next mutation
/// of the same edge heals any inconsistency left behind.
pub struct MemberOfEngine {
    pub(crate) backend: Arc<dyn DirectoryBackend>,
    pub(crate) config: MemberOfConfig,
    pub(crate) op_lock: Mutex<()>,
    pub(crate) counters: EngineCounters,
}

impl MemberOfEngine {
    pub fn new(backend: Arc<dyn DirectoryBackend>, config: MemberOfConfig) -> Self {
        Self {
            backend,
            config,
            op_lock: Mutex::new(()),
            counters: EngineCounters::default(),
        }
    }

    pub fn config(&self) -> &MemberOfConfig {
        &self.config
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            edges_added: self.counters.edges_added.load(Ordering::Relaxed),
            edges_removed: self.counters.edges_removed.load(Ordering::Relaxed),
            cycles_detected: self.counters.cycles_detected.load(Ordering::Relaxed),
            reconciliations: self.counters.reconciliations.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }

    /// Single dispatch point for hook wiring.
    pub fn observe(&self, event: &DirectoryEvent) {
        match event {
            DirectoryEvent::Added { entry } => self.entry_added(entry),
            DirectoryEvent::Deleted { entry } => self.entry_deleted(entry),
            DirectoryEvent::Renamed { previous_dn, entry } => {
                self.entry_renamed(previous_dn, entry)
            }
            DirectoryEvent::Modified { dn, mods, pre, post } => {
                self.membership_modified(dn, mods, pre, post)
            }
        }
    }

    /// A new entry committed. Members of a new group entry gain the group
    /// in their reverse membership.
    pub fn entry_added(&self, entry: &Entry) {
        if !entry.is_group() {
            return;
        }
        let _guard = self.op_lock.lock();
        let group = entry.dn().clone();
        debug!(%group, "group added, indexing members");
        for value in entry.values(MEMBER_ATTR) {
            self.apply_membership_edge(EdgeOp::Add, &group, &Dn::new(value));
        }
    }

    /// An entry was deleted; `entry` is its pre-image.
    ///
    /// The deleted identifier is first stripped from the forward membership
    /// of every group still listing it. If the entry was itself a group,
    /// each former member sheds the group from its reverse membership —
    /// regenerating through the reconciliation fallback where the nested
    /// chain contains groups deleted in the same window, which is far less
    /// error prone than chasing the dependency chains value by value.
    pub fn entry_deleted(&self, entry: &Entry) {
        let _guard = self.op_lock.lock();
        let dn = entry.dn();
        self.strip_forward_references(dn);
        if entry.is_group() {
            debug!(group = %dn, "group deleted, unwinding member index");
            for value in entry.values(MEMBER_ATTR) {
                self.apply_membership_edge(EdgeOp::Delete, dn, &Dn::new(value));
            }
        }
    }

    /// A group entry was renamed; `entry` is the post-image. Members swap
    /// the old group identifier for the new one in a single two-mod write
    /// each, and groups listing the old identifier as a member have the
    /// forward value rewritten.
    pub fn entry_renamed(&self, previous_dn: &Dn, entry: &Entry) {
        if !entry.is_group() {
            return;
        }
        let _guard = self.op_lock.lock();
        let post = entry.dn().clone();
        debug!(old = %previous_dn, new = %post, "group renamed, rewriting index");
        for value in entry.values(MEMBER_ATTR) {
            self.run_edges(VecDeque::from([EdgeWork {
                op: EdgeOp::Replace {
                    new_value: post.clone(),
                },
                origin: post.clone(),
                subject: previous_dn.clone(),
                target: Dn::new(value),
            }]));
        }
        self.rewrite_forward_references(previous_dn, &post);
    }

    /// A committed modify. Only mods touching the forward-membership
    /// attribute matter: adds and value-deletes map to per-value edges, a
    /// replace — or a delete with no values, which clears the attribute —
    /// diffs the pre- and post-image value lists into the minimal edge set.
    pub fn membership_modified(&self, dn: &Dn, mods: &[AttrMod], pre: &Entry, post: &Entry) {
        let _guard = self.op_lock.lock();
        for m in mods {
            if !m.attr.eq_ignore_ascii_case(MEMBER_ATTR) {
                continue;
            }
            match m.op {
                ModOp::Add => {
                    for value in &m.values {
                        self.apply_membership_edge(EdgeOp::Add, dn, &Dn::new(value));
                    }
                }
                ModOp::Delete if m.values.is_empty() => {
                    self.replace_membership(dn, pre.values(MEMBER_ATTR), post.values(MEMBER_ATTR));
                }
                ModOp::Delete => {
                    for value in &m.values {
                        self.apply_membership_edge(EdgeOp::Delete, dn, &Dn::new(value));
                    }
                }
                ModOp::Replace => {
                    self.replace_membership(dn, pre.values(MEMBER_ATTR), post.values(MEMBER_ATTR));
                }
            }
        }
    }

    fn strip_forward_references(&self, dn: &Dn) {
        let groups: Vec<Dn> = match self
            .backend
            .search(&Dn::root(), &Filter::equals(MEMBER_ATTR, dn.as_str()))
        {
            Ok(matches) => matches.map(|e| e.dn().clone()).collect(),
            Err(err) => {
                warn!(%dn, error = %err, "referencing-group search failed");
                return;
            }
        };
        for group in groups {
            if let Err(err) = self
                .backend
                .modify(&group, &[AttrMod::delete(MEMBER_ATTR, dn.to_string())])
            {
                warn!(%group, member = %dn, error = %err, "dangling member reference kept");
            }
        }
    }

    fn rewrite_forward_references(&self, previous_dn: &Dn, new_dn: &Dn) {
        let groups: Vec<Dn> = match self
            .backend
            .search(&Dn::root(), &Filter::equals(MEMBER_ATTR, previous_dn.as_str()))
        {
            Ok(matches) => matches.map(|e| e.dn().clone()).collect(),
            Err(err) => {
                warn!(dn = %previous_dn, error = %err, "referencing-group search failed");
                return;
            }
        };
        for group in groups {
            let mods = [
                AttrMod::delete(MEMBER_ATTR, previous_dn.to_string()),
                AttrMod::add(MEMBER_ATTR, new_dn.to_string()),
            ];
            if let Err(err) = self.backend.modify(&group, &mods) {
                warn!(%group, old = %previous_dn, error = %err, "member reference not rewritten");
            }
        }
    }
}
