#![allow(dead_code)]

use memberof::{
    AttrMod, DirectoryBackend, DirectoryEvent, Dn, Entry, Filter, MEMBER_OF_ATTR, MemberOfConfig,
    MemberOfEngine, MemoryDirectory, SearchMatches,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Directory plus engine, wired the way the server core wires them: every
/// helper applies the write to the directory first and fires the matching
/// post-commit hook second.
pub struct DirFixture {
    pub dir: Arc<MemoryDirectory>,
    pub engine: Arc<MemberOfEngine>,
}

impl DirFixture {
    pub fn new() -> Self {
        let dir = Arc::new(MemoryDirectory::new());
        let engine = Arc::new(MemberOfEngine::new(
            Arc::clone(&dir) as Arc<dyn DirectoryBackend>,
            MemberOfConfig::default(),
        ));
        Self { dir, engine }
    }

    pub fn add(&self, entry: Entry) {
        self.dir.add_entry(entry.clone());
        self.engine.observe(&DirectoryEvent::Added { entry });
    }

    pub fn delete(&self, dn: &str) {
        let entry = self.dir.remove_entry(&Dn::new(dn)).expect("entry to delete");
        self.engine.observe(&DirectoryEvent::Deleted { entry });
    }

    pub fn rename(&self, from: &str, to: &str) {
        let from = Dn::new(from);
        let to = Dn::new(to);
        self.dir.rename_entry(&from, &to).expect("rename");
        let entry = self.dir.entry(&to).expect("renamed entry");
        self.engine.observe(&DirectoryEvent::Renamed {
            previous_dn: from,
            entry,
        });
    }

    pub fn modify(&self, dn: &str, mods: Vec<AttrMod>) {
        let dn = Dn::new(dn);
        let pre = self.dir.entry(&dn).expect("entry to modify");
        self.dir.modify(&dn, &mods).expect("modify");
        let post = self.dir.entry(&dn).expect("modified entry");
        self.engine.observe(&DirectoryEvent::Modified { dn, mods, pre, post });
    }

    /// Fires the modify hook without touching the directory, as a repeated
    /// or replicated delivery of an already-applied operation would.
    pub fn replay(&self, dn: &str, mods: Vec<AttrMod>) {
        let dn = Dn::new(dn);
        let entry = self.dir.entry(&dn).expect("entry to replay against");
        self.engine.observe(&DirectoryEvent::Modified {
            dn,
            mods,
            pre: entry.clone(),
            post: entry,
        });
    }

    /// Normalized, sorted reverse membership of an entry.
    pub fn member_of(&self, dn: &str) -> Vec<String> {
        let Some(entry) = self.dir.entry(&Dn::new(dn)) else {
            return Vec::new();
        };
        let mut values: Vec<String> = entry
            .values(MEMBER_OF_ATTR)
            .iter()
            .map(|v| Dn::new(v).as_str().to_string())
            .collect();
        values.sort();
        values
    }

    /// Raw reverse-membership values, duplicates preserved.
    pub fn raw_member_of(&self, dn: &str) -> Vec<String> {
        self.dir
            .entry(&Dn::new(dn))
            .map(|e| e.values(MEMBER_OF_ATTR).to_vec())
            .unwrap_or_default()
    }
}

/// Backend wrapper recording every mutation the engine issues, for asserting
/// minimal edit sets.
#[derive(Default)]
pub struct RecordingBackend {
    pub inner: MemoryDirectory,
    pub mods: Mutex<Vec<(Dn, Vec<AttrMod>)>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(Dn, Vec<AttrMod>)> {
        self.mods.lock().clone()
    }
}

impl DirectoryBackend for RecordingBackend {
    fn lookup(
        &self,
        dn: &Dn,
        attrs: &[&str],
    ) -> Result<Option<Entry>, memberof::MemberOfError> {
        self.inner.lookup(dn, attrs)
    }

    fn search(
        &self,
        base: &Dn,
        filter: &Filter,
    ) -> Result<SearchMatches<'_>, memberof::MemberOfError> {
        self.inner.search(base, filter)
    }

    fn modify(&self, dn: &Dn, mods: &[AttrMod]) -> Result<(), memberof::MemberOfError> {
        self.mods.lock().push((dn.clone(), mods.to_vec()));
        self.inner.modify(dn, mods)
    }
}
