use crate::dn::Dn;
use crate::error::MemberOfError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod memory;

pub use memory::MemoryDirectory;

/// A directory entry: a normalized identifier plus named multi-valued
/// attributes. Attribute names are folded to lowercase on insertion; values
/// keep their original spelling and are compared through the same
/// normalization the engine applies to identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    attrs: BTreeMap<String, Vec<String>>,
}

impl Entry {
    pub fn new(dn: impl Into<Dn>) -> Self {
        Self {
            dn: dn.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr<I, S>(mut self, attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_values(attr, values.into_iter().map(Into::into).collect());
        self
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = dn;
    }

    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .get(&attr.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_value(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }

    pub fn has_value(&self, attr: &str, value: &str) -> bool {
        self.has_dn_value(attr, &Dn::new(value))
    }

    pub fn has_dn_value(&self, attr: &str, value: &Dn) -> bool {
        self.values(attr).iter().any(|v| &Dn::new(v) == value)
    }

    /// Group filter: any entry carrying a forward-membership attribute acts
    /// as a group.
    pub fn is_group(&self) -> bool {
        !self.values(crate::MEMBER_ATTR).is_empty()
    }

    pub fn add_value(&mut self, attr: &str, value: impl Into<String>) {
        self.attrs
            .entry(attr.to_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Removes one occurrence of `value` (normalized comparison); drops the
    /// attribute when its last value goes. Returns false when absent.
    pub fn remove_value(&mut self, attr: &str, value: &str) -> bool {
        let key = attr.to_lowercase();
        let target = Dn::new(value);
        let Some(values) = self.attrs.get_mut(&key) else {
            return false;
        };
        let Some(position) = values.iter().position(|v| Dn::new(v) == target) else {
            return false;
        };
        values.remove(position);
        if values.is_empty() {
            self.attrs.remove(&key);
        }
        true
    }

    pub fn remove_attr(&mut self, attr: &str) -> bool {
        self.attrs.remove(&attr.to_lowercase()).is_some()
    }

    pub fn set_values(&mut self, attr: &str, values: Vec<String>) {
        let key = attr.to_lowercase();
        if values.is_empty() {
            self.attrs.remove(&key);
        } else {
            self.attrs.insert(key, values);
        }
    }

    /// Copy of this entry restricted to the requested attributes; an empty
    /// request keeps everything.
    pub fn project(&self, attrs: &[&str]) -> Entry {
        if attrs.is_empty() {
            return self.clone();
        }
        let wanted: Vec<String> = attrs.iter().map(|a| a.to_lowercase()).collect();
        Entry {
            dn: self.dn.clone(),
            attrs: self
                .attrs
                .iter()
                .filter(|(name, _)| wanted.iter().any(|w| w == *name))
                .map(|(name, values)| (name.clone(), values.clone()))
                .collect(),
        }
    }
}

/// Attribute modification operation, the closed three-case variant shared by
/// the hook contract and the backend mutation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// One attribute modification: applied transactionally by
/// [`DirectoryBackend::modify`], and reported to the engine by the hook
/// dispatcher for committed modify operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrMod {
    pub op: ModOp,
    pub attr: String,
    pub values: Vec<String>,
}

impl AttrMod {
    pub fn add(attr: &str, value: impl Into<String>) -> Self {
        Self {
            op: ModOp::Add,
            attr: attr.to_lowercase(),
            values: vec![value.into()],
        }
    }

    pub fn delete(attr: &str, value: impl Into<String>) -> Self {
        Self {
            op: ModOp::Delete,
            attr: attr.to_lowercase(),
            values: vec![value.into()],
        }
    }

    /// Delete with no values: removes the whole attribute.
    pub fn clear(attr: &str) -> Self {
        Self {
            op: ModOp::Delete,
            attr: attr.to_lowercase(),
            values: Vec::new(),
        }
    }

    pub fn replace(attr: &str, values: Vec<String>) -> Self {
        Self {
            op: ModOp::Replace,
            attr: attr.to_lowercase(),
            values,
        }
    }
}

/// Simple search filter: presence or equality on a single attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    Present(String),
    Equals(String, String),
}

impl Filter {
    pub fn present(attr: &str) -> Self {
        Filter::Present(attr.to_lowercase())
    }

    pub fn equals(attr: &str, value: impl Into<String>) -> Self {
        Filter::Equals(attr.to_lowercase(), value.into())
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::Present(attr) => !entry.values(attr).is_empty(),
            Filter::Equals(attr, value) => entry.has_value(attr, value),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Filter::Present(attr) => write!(f, "({attr}=*)"),
            Filter::Equals(attr, value) => write!(f, "({attr}={value})"),
        }
    }
}

/// A finite, single-pass sequence of search matches. Not restartable; the
/// caller folds over it once.
pub struct SearchMatches<'a> {
    inner: Box<dyn Iterator<Item = Entry> + 'a>,
}

impl<'a> SearchMatches<'a> {
    pub fn new(inner: impl Iterator<Item = Entry> + 'a) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Iterator for SearchMatches<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        self.inner.next()
    }
}

/// The narrow slice of directory functionality the engine consumes.
///
/// Implementations sit in front of the real entry store. `modify` is the
/// transactional attribute-mutation primitive: either every mod in the list
/// applies or none does. Searches with an empty base cover the whole tree.
pub trait DirectoryBackend: Send + Sync {
    /// Point lookup returning the requested attribute subset (all
    /// attributes when `attrs` is empty), or `None` for an unknown
    /// identifier.
    fn lookup(&self, dn: &Dn, attrs: &[&str]) -> Result<Option<Entry>, MemberOfError>;

    /// Subtree search under `base` with a simple filter.
    fn search(&self, base: &Dn, filter: &Filter) -> Result<SearchMatches<'_>, MemberOfError>;

    /// Transactional attribute mutation, applied in list order.
    fn modify(&self, dn: &Dn, mods: &[AttrMod]) -> Result<(), MemberOfError>;
}

#[cfg(test)]
mod tests {
    use super::{AttrMod, Entry, Filter, ModOp};

    #[test]
    fn entry_values_compare_through_normalization() {
        let entry = Entry::new("CN=Staff, DC=Example")
            .with_attr("Member", ["UID=Alice, DC=Example", "uid=bob,dc=example"]);
        assert_eq!(entry.dn().as_str(), "cn=staff,dc=example");
        assert!(entry.has_value("member", "uid=alice,dc=example"));
        assert!(entry.has_value("MEMBER", "UID=BOB,DC=EXAMPLE"));
        assert!(!entry.has_value("member", "uid=carol,dc=example"));
        assert!(entry.is_group());
    }

    #[test]
    fn remove_value_drops_empty_attribute() {
        let mut entry = Entry::new("cn=g,dc=x").with_attr("member", ["uid=a,dc=x"]);
        assert!(entry.remove_value("member", "UID=A, DC=X"));
        assert!(!entry.is_group());
        assert!(!entry.remove_value("member", "uid=a,dc=x"));
    }

    #[test]
    fn projection_keeps_only_requested_attributes() {
        let entry = Entry::new("uid=a,dc=x")
            .with_attr("objectclass", ["inetuser"])
            .with_attr("memberof", ["cn=g,dc=x"]);
        let projected = entry.project(&["memberof"]);
        assert_eq!(projected.values("memberof"), ["cn=g,dc=x"]);
        assert!(projected.values("objectclass").is_empty());
        assert_eq!(entry.project(&[]), entry);
    }

    #[test]
    fn filters_match_presence_and_equality() {
        let group = Entry::new("cn=g,dc=x").with_attr("member", ["uid=a,dc=x"]);
        assert!(Filter::present("member").matches(&group));
        assert!(Filter::equals("member", "UID=A,DC=X").matches(&group));
        assert!(!Filter::equals("member", "uid=b,dc=x").matches(&group));
        assert_eq!(Filter::equals("member", "uid=a,dc=x").to_string(), "(member=uid=a,dc=x)");
    }

    #[test]
    fn attr_mod_constructors_fold_attribute_case() {
        let m = AttrMod::add("MemberOf", "cn=g,dc=x");
        assert_eq!(m.op, ModOp::Add);
        assert_eq!(m.attr, "memberof");
        assert!(AttrMod::clear("member").values.is_empty());
    }
}
