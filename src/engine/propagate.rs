use crate::backend::{AttrMod, Entry, Filter};
use crate::dn::Dn;
use crate::engine::guard::VisitTrail;
use crate::{MEMBER_ATTR, MEMBER_OF_ATTR, MemberOfEngine};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Reverse-index effect of one forward-membership edge mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EdgeOp {
    Add,
    Delete,
    /// Delete `subject`, add `new_value`, as one two-mod write. Produced by
    /// renames.
    Replace { new_value: Dn },
}

impl EdgeOp {
    fn name(&self) -> &'static str {
        match self {
            EdgeOp::Add => "add",
            EdgeOp::Delete => "delete",
            EdgeOp::Replace { .. } => "replace",
        }
    }
}

/// One scheduled edge application. `origin` is the group whose mutation
/// started the operation and stays fixed through the descent; `subject` is
/// the reverse-index value being written. They differ only for renames.
#[derive(Debug, Clone)]
pub(crate) struct EdgeWork {
    pub op: EdgeOp,
    pub origin: Dn,
    pub subject: Dn,
    pub target: Dn,
}

enum Step {
    Descend { target: Dn, trail: VisitTrail },
    Apply { target: Dn, entry: Entry, trail: VisitTrail },
}

impl MemberOfEngine {
    /// Applies `op` for the edge `group -> target` on the reverse index,
    /// descending into nested groups. Callers hold the operation lock.
    pub(crate) fn apply_membership_edge(&self, op: EdgeOp, group: &Dn, target: &Dn) {
        self.run_edges(VecDeque::from([EdgeWork {
            op,
            origin: group.clone(),
            subject: group.clone(),
            target: target.clone(),
        }]));
    }

    /// Drains an edge queue. Closure edges discovered while applying an add
    /// are pushed back here rather than applied in nested calls, so a deep
    /// ancestor chain costs queue entries instead of native stack frames.
    pub(crate) fn run_edges(&self, mut pending: VecDeque<EdgeWork>) {
        while let Some(work) = pending.pop_front() {
            self.run_one_edge(&work, &mut pending);
        }
    }

    /// Depth-first application of one edge over the nested-group graph.
    ///
    /// The recursion of the membership graph is driven from an explicit
    /// step stack: `Descend` resolves a target and, for a group, schedules
    /// its members above an `Apply` step for the group itself, so every
    /// direct effect runs after its whole subtree — the same post-order a
    /// recursive descent produces. Each child branch carries its own
    /// extended trail; re-entering a group already on the trail prunes that
    /// branch, direct effect included.
    fn run_one_edge(&self, work: &EdgeWork, pending: &mut VecDeque<EdgeWork>) {
        let mut steps = vec![Step::Descend {
            target: work.target.clone(),
            trail: VisitTrail::root(),
        }];
        while let Some(step) = steps.pop() {
            match step {
                Step::Descend { target, trail } => {
                    let entry = match self
                        .backend
                        .lookup(&target, &[MEMBER_ATTR, MEMBER_OF_ATTR])
                    {
                        Ok(Some(entry)) => entry,
                        Ok(None) => {
                            if matches!(work.op, EdgeOp::Delete) {
                                // the target may be a group deleted in the
                                // same window; re-derive every holder of the
                                // originating group instead
                                debug!(%target, origin = %work.origin,
                                    "delete target unresolvable, reconciling holders");
                                self.reconcile_holders(&work.origin);
                            }
                            continue;
                        }
                        Err(err) => {
                            warn!(%target, error = %err, "target lookup failed, pruning branch");
                            continue;
                        }
                    };
                    if entry.is_group() {
                        let Some(deeper) = trail.enter(&target) else {
                            self.counters.cycles_detected.fetch_add(1, Ordering::Relaxed);
                            warn!(%target, op = work.op.name(), "group cycle detected, pruning branch");
                            continue;
                        };
                        debug!(%target, op = work.op.name(), "descending into nested group");
                        let members: Vec<Dn> =
                            entry.values(MEMBER_ATTR).iter().map(|v| Dn::new(v)).collect();
                        steps.push(Step::Apply { target, entry, trail });
                        for member in members.into_iter().rev() {
                            steps.push(Step::Descend {
                                target: member,
                                trail: deeper.clone(),
                            });
                        }
                    } else {
                        steps.push(Step::Apply { target, entry, trail });
                    }
                }
                Step::Apply { target, entry, trail } => {
                    self.apply_direct(work, &target, &entry, &trail, pending);
                }
            }
        }
    }

    /// The direct effect on one target, after its subtree was handled.
    fn apply_direct(
        &self,
        work: &EdgeWork,
        target: &Dn,
        entry: &Entry,
        trail: &VisitTrail,
        pending: &mut VecDeque<EdgeWork>,
    ) {
        if work.subject == *target {
            // never record an entry as a member of itself, cyclic
            // groupings included
            debug!(%target, "skipping self-membership");
            return;
        }
        match &work.op {
            EdgeOp::Add => {
                if entry.has_dn_value(MEMBER_OF_ATTR, &work.subject) {
                    debug!(%target, group = %work.subject, "reverse value already present");
                    return;
                }
                let mods = [AttrMod::add(MEMBER_OF_ATTR, work.subject.to_string())];
                match self.backend.modify(target, &mods) {
                    Ok(()) => {
                        self.counters.edges_added.fetch_add(1, Ordering::Relaxed);
                        debug!(%target, group = %work.subject, "reverse value added");
                        self.queue_inherited_memberships(&work.subject, target, pending);
                    }
                    Err(err) => {
                        self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(%target, group = %work.subject, error = %err,
                            "reverse add failed, branch abandoned");
                    }
                }
            }
            EdgeOp::Delete => {
                if trail.depth() >= 2 && self.is_legitimate_member(&work.subject, target, trail) {
                    debug!(%target, group = %work.subject,
                        "membership held through another path, not removing");
                    return;
                }
                if self.is_member(&work.subject, target) {
                    debug!(%target, group = %work.subject,
                        "still a transitive member, not removing");
                } else {
                    let mods = [AttrMod::delete(MEMBER_OF_ATTR, work.subject.to_string())];
                    match self.backend.modify(target, &mods) {
                        Ok(()) => {
                            self.counters.edges_removed.fetch_add(1, Ordering::Relaxed);
                            debug!(%target, group = %work.subject, "reverse value removed");
                        }
                        Err(err) => {
                            self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(%target, group = %work.subject, error = %err,
                                "reverse delete failed, branch abandoned");
                        }
                    }
                }
                // the removal may have orphaned indirect values on this
                // entry; re-derive them
                self.reconcile_entry(target);
            }
            EdgeOp::Replace { new_value } => {
                let mods = [
                    AttrMod::delete(MEMBER_OF_ATTR, work.subject.to_string()),
                    AttrMod::add(MEMBER_OF_ATTR, new_value.to_string()),
                ];
                match self.backend.modify(target, &mods) {
                    Ok(()) => {
                        self.counters.edges_removed.fetch_add(1, Ordering::Relaxed);
                        self.counters.edges_added.fetch_add(1, Ordering::Relaxed);
                        debug!(%target, old = %work.subject, new = %new_value,
                            "reverse value replaced");
                    }
                    Err(err) => {
                        self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(%target, old = %work.subject, error = %err,
                            "reverse replace failed, branch abandoned");
                    }
                }
            }
        }
    }

    /// An entry that just gained `subject` in its reverse membership also
    /// inherits the memberships of `subject` itself: every group listing
    /// `subject` as a direct member is queued as a further add towards the
    /// target.
    fn queue_inherited_memberships(
        &self,
        subject: &Dn,
        target: &Dn,
        pending: &mut VecDeque<EdgeWork>,
    ) {
        let parents = match self
            .backend
            .search(&Dn::root(), &Filter::equals(MEMBER_ATTR, subject.as_str()))
        {
            Ok(matches) => matches,
            Err(err) => {
                warn!(%subject, error = %err, "ancestor search failed, closure incomplete");
                return;
            }
        };
        for parent in parents {
            pending.push_back(EdgeWork {
                op: EdgeOp::Add,
                origin: parent.dn().clone(),
                subject: parent.dn().clone(),
                target: target.clone(),
            });
        }
    }
}
