use serde::{Deserialize, Serialize};

/// A normalized directory identifier (distinguished name).
///
/// Normalization is component-wise: the raw string is split on `,`, each
/// component is trimmed, the components are re-joined with `,`, and the
/// whole string is lowercased. Escaped separators are not handled; the
/// engine compares identifiers at the string level throughout. `Ord` is
/// byte-wise over the normalized form, which is the total order the diff
/// engine sorts by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dn(String);

impl Dn {
    pub fn new(raw: &str) -> Self {
        let normalized = raw
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(",")
            .to_lowercase();
        Self(normalized)
    }

    /// The empty identifier, used as the base of whole-tree searches.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `self` sits at or under `base` in the directory tree.
    pub fn is_under(&self, base: &Dn) -> bool {
        if base.0.is_empty() || self.0 == base.0 {
            return true;
        }
        self.0.ends_with(&base.0) && self.0[..self.0.len() - base.0.len()].ends_with(',')
    }
}

impl std::fmt::Display for Dn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Dn {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Dn {
    fn from(raw: &str) -> Self {
        Dn::new(raw)
    }
}

/// Copies attribute values into a sorted, de-duplicated array of
/// identifiers, the shape both the diff engine and the reconciliation
/// verifier consume.
pub fn sorted_unique<I, S>(values: I) -> Vec<Dn>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<Dn> = values.into_iter().map(|v| Dn::new(v.as_ref())).collect();
    out.sort_unstable();
    out.dedup();
    out
}
