use crate::dn::{Dn, sorted_unique};
use crate::engine::EdgeOp;
use crate::MemberOfEngine;
use tracing::debug;

/// One side of a forward-membership replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipChange {
    Removed(Dn),
    Added(Dn),
}

/// Minimal edit set implied by replacing `old` with `new`.
///
/// Both inputs are copied into sorted, de-duplicated arrays and merged in a
/// single forward pass: a value only in `old` is a removal, only in `new` an
/// addition, in both nothing (both cursors advance). Linear after sorting,
/// which matters because full replacement of a group's membership is a
/// common bulk operation.
pub fn diff_membership(old: &[String], new: &[String]) -> Vec<MembershipChange> {
    let old = sorted_unique(old);
    let new = sorted_unique(new);
    let mut changes = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        if i == old.len() {
            changes.push(MembershipChange::Added(new[j].clone()));
            j += 1;
        } else if j == new.len() {
            changes.push(MembershipChange::Removed(old[i].clone()));
            i += 1;
        } else {
            match old[i].cmp(&new[j]) {
                std::cmp::Ordering::Less => {
                    changes.push(MembershipChange::Removed(old[i].clone()));
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    changes.push(MembershipChange::Added(new[j].clone()));
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
            }
        }
    }
    changes
}

impl MemberOfEngine {
    /// Applies a full replacement of `group`'s forward membership as the
    /// minimal set of reverse-index edge mutations.
    pub(crate) fn replace_membership(&self, group: &Dn, old: &[String], new: &[String]) {
        for change in diff_membership(old, new) {
            match change {
                MembershipChange::Removed(value) => {
                    debug!(%group, member = %value, "replacement removes member");
                    self.apply_membership_edge(EdgeOp::Delete, group, &value);
                }
                MembershipChange::Added(value) => {
                    debug!(%group, member = %value, "replacement adds member");
                    self.apply_membership_edge(EdgeOp::Add, group, &value);
                }
            }
        }
    }
}
