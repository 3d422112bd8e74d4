use crate::backend::{AttrMod, DirectoryBackend, Entry, Filter, ModOp, SearchMatches};
use crate::dn::Dn;
use crate::error::MemberOfError;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// In-memory directory backend with LDAP-shaped mutation semantics.
///
/// Backs the test suite and embedders that keep their directory resident.
/// Every `modify` call is all-or-nothing: the mod list is applied to a
/// working copy and committed only when every mod validated.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: Mutex<BTreeMap<Dn, Entry>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry, as the directory core would on add.
    pub fn add_entry(&self, entry: Entry) {
        self.entries.lock().insert(entry.dn().clone(), entry);
    }

    pub fn remove_entry(&self, dn: &Dn) -> Option<Entry> {
        self.entries.lock().remove(dn)
    }

    /// Re-keys an entry under a new identifier, as the directory core would
    /// on rename. Attributes are carried over unchanged.
    pub fn rename_entry(&self, from: &Dn, to: &Dn) -> Result<(), MemberOfError> {
        let mut entries = self.entries.lock();
        let Some(mut entry) = entries.remove(from) else {
            return Err(MemberOfError::NoSuchEntry {
                dn: from.to_string(),
            });
        };
        entry.set_dn(to.clone());
        entries.insert(to.clone(), entry);
        Ok(())
    }

    pub fn entry(&self, dn: &Dn) -> Option<Entry> {
        self.entries.lock().get(dn).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn apply_mod(entry: &mut Entry, m: &AttrMod) -> Result<(), MemberOfError> {
    match m.op {
        ModOp::Add => {
            for value in &m.values {
                if entry.has_value(&m.attr, value) {
                    return Err(MemberOfError::ValueExists {
                        dn: entry.dn().to_string(),
                        attribute: m.attr.clone(),
                        value: value.clone(),
                    });
                }
                entry.add_value(&m.attr, value.clone());
            }
            Ok(())
        }
        ModOp::Delete if m.values.is_empty() => {
            if !entry.remove_attr(&m.attr) {
                return Err(MemberOfError::NoSuchAttribute {
                    dn: entry.dn().to_string(),
                    attribute: m.attr.clone(),
                });
            }
            Ok(())
        }
        ModOp::Delete => {
            for value in &m.values {
                if !entry.remove_value(&m.attr, value) {
                    return Err(MemberOfError::NoSuchValue {
                        dn: entry.dn().to_string(),
                        attribute: m.attr.clone(),
                        value: value.clone(),
                    });
                }
            }
            Ok(())
        }
        ModOp::Replace => {
            entry.set_values(&m.attr, m.values.clone());
            Ok(())
        }
    }
}

impl DirectoryBackend for MemoryDirectory {
    fn lookup(&self, dn: &Dn, attrs: &[&str]) -> Result<Option<Entry>, MemberOfError> {
        Ok(self.entries.lock().get(dn).map(|e| e.project(attrs)))
    }

    fn search(&self, base: &Dn, filter: &Filter) -> Result<SearchMatches<'_>, MemberOfError> {
        let matches: Vec<Entry> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.dn().is_under(base) && filter.matches(e))
            .cloned()
            .collect();
        Ok(SearchMatches::new(matches.into_iter()))
    }

    fn modify(&self, dn: &Dn, mods: &[AttrMod]) -> Result<(), MemberOfError> {
        let mut entries = self.entries.lock();
        let Some(current) = entries.get(dn) else {
            return Err(MemberOfError::NoSuchEntry { dn: dn.to_string() });
        };
        let mut staged = current.clone();
        for m in mods {
            apply_mod(&mut staged, m)?;
        }
        entries.insert(dn.clone(), staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryDirectory;
    use crate::backend::{AttrMod, DirectoryBackend, Entry, Filter};
    use crate::dn::Dn;
    use crate::error::MemberOfError;

    fn seeded() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.add_entry(
            Entry::new("cn=eng,ou=groups,dc=example")
                .with_attr("member", ["uid=alice,ou=people,dc=example"]),
        );
        dir.add_entry(
            Entry::new("uid=alice,ou=people,dc=example").with_attr("objectclass", ["inetuser"]),
        );
        dir
    }

    #[test]
    fn lookup_projects_requested_attributes() {
        let dir = seeded();
        let entry = dir
            .lookup(&Dn::new("cn=eng,ou=groups,dc=example"), &["member"])
            .expect("lookup")
            .expect("entry");
        assert_eq!(entry.values("member").len(), 1);

        let missing = dir
            .lookup(&Dn::new("cn=ghost,dc=example"), &[])
            .expect("lookup");
        assert!(missing.is_none());
    }

    #[test]
    fn search_scopes_to_subtree() {
        let dir = seeded();
        let under_groups: Vec<_> = dir
            .search(
                &Dn::new("ou=groups,dc=example"),
                &Filter::present("member"),
            )
            .expect("search")
            .collect();
        assert_eq!(under_groups.len(), 1);

        let under_people: Vec<_> = dir
            .search(
                &Dn::new("ou=people,dc=example"),
                &Filter::present("member"),
            )
            .expect("search")
            .collect();
        assert!(under_people.is_empty());

        let whole_tree: Vec<_> = dir
            .search(&Dn::root(), &Filter::equals("objectclass", "inetuser"))
            .expect("search")
            .collect();
        assert_eq!(whole_tree.len(), 1);
    }

    #[test]
    fn modify_is_all_or_nothing() {
        let dir = seeded();
        let group = Dn::new("cn=eng,ou=groups,dc=example");
        let err = dir
            .modify(
                &group,
                &[
                    AttrMod::add("member", "uid=bob,ou=people,dc=example"),
                    AttrMod::delete("member", "uid=ghost,dc=example"),
                ],
            )
            .expect_err("second mod must fail");
        assert!(matches!(err, MemberOfError::NoSuchValue { .. }));
        // first mod must not have leaked through
        let entry = dir.entry(&group).expect("entry");
        assert!(!entry.has_value("member", "uid=bob,ou=people,dc=example"));
    }

    #[test]
    fn duplicate_add_and_absent_delete_are_rejected() {
        let dir = seeded();
        let group = Dn::new("cn=eng,ou=groups,dc=example");
        let dup = dir
            .modify(
                &group,
                &[AttrMod::add("member", "UID=Alice, OU=People, DC=Example")],
            )
            .expect_err("duplicate add");
        assert!(matches!(dup, MemberOfError::ValueExists { .. }));

        let gone = dir
            .modify(&group, &[AttrMod::clear("memberof")])
            .expect_err("clearing absent attribute");
        assert!(matches!(gone, MemberOfError::NoSuchAttribute { .. }));
    }

    #[test]
    fn replace_with_no_values_removes_attribute() {
        let dir = seeded();
        let group = Dn::new("cn=eng,ou=groups,dc=example");
        dir.modify(&group, &[AttrMod::replace("member", Vec::new())])
            .expect("replace");
        assert!(!dir.entry(&group).expect("entry").is_group());
        // replacing an absent attribute with nothing is a no-op, not an error
        dir.modify(&group, &[AttrMod::replace("member", Vec::new())])
            .expect("idempotent replace");
    }

    #[test]
    fn rename_rekeys_entry() {
        let dir = seeded();
        let from = Dn::new("uid=alice,ou=people,dc=example");
        let to = Dn::new("uid=alicia,ou=people,dc=example");
        dir.rename_entry(&from, &to).expect("rename");
        assert!(dir.entry(&from).is_none());
        assert_eq!(dir.entry(&to).expect("entry").dn(), &to);
        let err = dir.rename_entry(&from, &to).expect_err("double rename");
        assert!(matches!(err, MemberOfError::NoSuchEntry { .. }));
    }
}
