use crate::backend::Filter;
use crate::dn::Dn;
use crate::{MEMBER_ATTR, MemberOfEngine};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

impl MemberOfEngine {
    /// True when `candidate` appears literally in `group`'s
    /// forward-membership attribute. An unresolvable group or a failed
    /// lookup answers false.
    pub fn is_direct_member(&self, group: &Dn, candidate: &Dn) -> bool {
        match self.backend.lookup(group, &[MEMBER_ATTR]) {
            Ok(Some(entry)) => entry.has_dn_value(MEMBER_ATTR, candidate),
            Ok(None) => false,
            Err(err) => {
                debug!(%group, error = %err, "direct-membership lookup failed");
                false
            }
        }
    }

    /// Direct or transitive membership test.
    ///
    /// After the direct fast path, walks the reverse reachability of the
    /// candidate: every group listing the current node as a direct member is
    /// either the group under test or another node to walk. The visited set
    /// is keyed on the candidate chain, so cyclic groupings terminate. A
    /// failed search answers false — the negative result is the safe one,
    /// it only ever triggers cleanup.
    pub fn is_member(&self, group: &Dn, candidate: &Dn) -> bool {
        if self.is_direct_member(group, candidate) {
            return true;
        }
        let mut visited: HashSet<Dn> = HashSet::from([candidate.clone()]);
        let mut worklist: VecDeque<Dn> = VecDeque::from([candidate.clone()]);
        while let Some(node) = worklist.pop_front() {
            let matches = match self
                .backend
                .search(&Dn::root(), &Filter::equals(MEMBER_ATTR, node.as_str()))
            {
                Ok(matches) => matches,
                Err(err) => {
                    warn!(%node, error = %err, "membership search failed, treating as non-member");
                    continue;
                }
            };
            for parent in matches {
                if parent.dn() == group {
                    return true;
                }
                if visited.insert(parent.dn().clone()) {
                    worklist.push_back(parent.dn().clone());
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{Entry, MemoryDirectory};
    use crate::config::MemberOfConfig;
    use crate::dn::Dn;
    use crate::MemberOfEngine;
    use std::sync::Arc;

    fn engine(entries: Vec<Entry>) -> MemberOfEngine {
        let dir = MemoryDirectory::new();
        for entry in entries {
            dir.add_entry(entry);
        }
        MemberOfEngine::new(Arc::new(dir), MemberOfConfig::default())
    }

    #[test]
    fn direct_membership_is_detected() {
        let engine = engine(vec![
            Entry::new("cn=g1,dc=x").with_attr("member", ["uid=u,dc=x"]),
            Entry::new("uid=u,dc=x"),
        ]);
        assert!(engine.is_direct_member(&Dn::new("cn=g1,dc=x"), &Dn::new("UID=U, DC=X")));
        assert!(!engine.is_direct_member(&Dn::new("uid=u,dc=x"), &Dn::new("cn=g1,dc=x")));
        assert!(!engine.is_direct_member(&Dn::new("cn=ghost,dc=x"), &Dn::new("uid=u,dc=x")));
    }

    #[test]
    fn transitive_membership_walks_nested_groups() {
        let engine = engine(vec![
            Entry::new("cn=g1,dc=x").with_attr("member", ["cn=g2,dc=x"]),
            Entry::new("cn=g2,dc=x").with_attr("member", ["cn=g3,dc=x"]),
            Entry::new("cn=g3,dc=x").with_attr("member", ["uid=u,dc=x"]),
            Entry::new("uid=u,dc=x"),
        ]);
        assert!(engine.is_member(&Dn::new("cn=g1,dc=x"), &Dn::new("uid=u,dc=x")));
        assert!(engine.is_member(&Dn::new("cn=g2,dc=x"), &Dn::new("uid=u,dc=x")));
        assert!(!engine.is_member(&Dn::new("cn=g3,dc=x"), &Dn::new("cn=g1,dc=x")));
    }

    #[test]
    fn cyclic_groupings_terminate() {
        let engine = engine(vec![
            Entry::new("cn=g1,dc=x").with_attr("member", ["cn=g2,dc=x"]),
            Entry::new("cn=g2,dc=x").with_attr("member", ["cn=g1,dc=x", "uid=u,dc=x"]),
            Entry::new("uid=u,dc=x"),
            Entry::new("cn=elsewhere,dc=x").with_attr("member", ["uid=w,dc=x"]),
        ]);
        assert!(engine.is_member(&Dn::new("cn=g1,dc=x"), &Dn::new("uid=u,dc=x")));
        assert!(!engine.is_member(&Dn::new("cn=elsewhere,dc=x"), &Dn::new("uid=u,dc=x")));
    }
}
