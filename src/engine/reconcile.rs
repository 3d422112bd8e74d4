use crate::backend::Filter;
use crate::dn::{Dn, sorted_unique};
use crate::engine::guard::VisitTrail;
use crate::engine::EdgeOp;
use crate::{MEMBER_ATTR, MEMBER_OF_ATTR, MemberOfEngine};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

impl MemberOfEngine {
    /// Re-derives which of the entry's listed reverse memberships still
    /// hold, removing only those that no longer do.
    ///
    /// The listed groups are partitioned into verified ones (the entry is a
    /// direct member) and candidates. Candidates are then promoted to
    /// verified whenever some already-verified group is itself a direct
    /// member of the candidate — the entry reaches the candidate through
    /// that group — looping until a full pass promotes nothing. Whatever is
    /// left is stale and removed with a full recursive delete, so nested
    /// cleanup re-runs the same machinery to its fixpoint. Quadratic in the
    /// entry's fan-out, which is bounded by one entry's memberships, not
    /// the directory.
    pub(crate) fn reconcile_entry(&self, dn: &Dn) {
        self.counters.reconciliations.fetch_add(1, Ordering::Relaxed);
        let entry = match self.backend.lookup(dn, &[MEMBER_OF_ATTR]) {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                debug!(%dn, error = %err, "reconciliation lookup failed");
                return;
            }
        };
        let listed = sorted_unique(entry.values(MEMBER_OF_ATTR));
        if listed.is_empty() {
            return;
        }

        let mut verified: Vec<Dn> = Vec::with_capacity(listed.len());
        let mut candidates: Vec<Dn> = Vec::new();
        for group in listed {
            if self.is_direct_member(&group, dn) {
                verified.push(group);
            } else {
                candidates.push(group);
            }
        }

        let mut promoted = true;
        while promoted && !candidates.is_empty() {
            promoted = false;
            let mut index = 0;
            while index < candidates.len() {
                let reachable = verified
                    .iter()
                    .any(|held| self.is_direct_member(&candidates[index], held));
                if reachable {
                    verified.push(candidates.remove(index));
                    promoted = true;
                } else {
                    index += 1;
                }
            }
        }

        for stale in candidates {
            debug!(entry = %dn, group = %stale, "removing stale reverse membership");
            self.apply_membership_edge(EdgeOp::Delete, &stale, dn);
        }
    }

    /// Reconciles every entry currently listing `group` in its reverse
    /// membership. Fallback for deletes whose target vanished mid-flight:
    /// the nested chain may include groups deleted in the same window, so
    /// each holder is re-derived from scratch.
    pub(crate) fn reconcile_holders(&self, group: &Dn) {
        let holders: Vec<Dn> = match self
            .backend
            .search(&Dn::root(), &Filter::equals(MEMBER_OF_ATTR, group.as_str()))
        {
            Ok(matches) => matches.map(|e| e.dn().clone()).collect(),
            Err(err) => {
                warn!(%group, error = %err, "holder search failed, skipping reconciliation");
                return;
            }
        };
        for holder in holders {
            self.reconcile_entry(&holder);
        }
    }

    /// Decides whether a pending removal must be suppressed because the
    /// membership still holds through another path: either the target is
    /// (still) a direct member of the subject group, or some other group in
    /// the target's reverse membership — excluding the group being detached,
    /// the first one entered on this descent — is itself a direct member of
    /// the subject group.
    pub(crate) fn is_legitimate_member(
        &self,
        subject: &Dn,
        target: &Dn,
        trail: &VisitTrail,
    ) -> bool {
        let Some(detaching) = trail.first_entered() else {
            return false;
        };
        let group = match self.backend.lookup(subject, &[MEMBER_ATTR]) {
            Ok(Some(group)) => group,
            Ok(None) => return false,
            Err(err) => {
                debug!(%subject, error = %err, "legitimacy lookup failed");
                return false;
            }
        };
        if group.has_dn_value(MEMBER_ATTR, target) {
            debug!(%target, %subject, "target is a direct member, keeping");
            return true;
        }
        let holder = match self.backend.lookup(target, &[MEMBER_OF_ATTR]) {
            Ok(Some(holder)) => holder,
            _ => return false,
        };
        for value in holder.values(MEMBER_OF_ATTR) {
            let other = Dn::new(value);
            if &other == detaching {
                continue;
            }
            if group.has_dn_value(MEMBER_ATTR, &other) {
                debug!(%target, via = %other, "membership held through another group, keeping");
                return true;
            }
        }
        false
    }
}
