//! The root directory (consumed interface, spec §6): a name -> managed
//! pointer map with atomic replace/remove. Its backing concurrent hash map
//! and interned-string table are explicitly out of scope (spec §1); this
//! crate only needs the narrow trait C7 scans at the start of every
//! Marking phase.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::pointer::offset::OffsetWord;

pub trait RootDirectory: Send + Sync {
    fn lookup(&self, name: &str) -> Option<OffsetWord>;
    fn store(&self, name: &str, value: OffsetWord);
    fn remove(&self, name: &str);
    /// All currently stored roots, for C7 to scan at the start of Marking
    /// (spec §6: "Roots are scanned at the start of every Marking phase").
    fn snapshot(&self) -> Vec<OffsetWord>;
}

/// A `RwLock<HashMap>`-backed root directory, sufficient for a single
/// process or for tests. A real multi-process deployment backs this with
/// the concurrent hash map / interned-string table named (but not defined)
/// in spec §1.
#[derive(Default)]
pub struct LocalRootDirectory {
    roots: RwLock<HashMap<String, OffsetWord>>,
}

impl LocalRootDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RootDirectory for LocalRootDirectory {
    fn lookup(&self, name: &str) -> Option<OffsetWord> {
        self.roots.read().unwrap().get(name).copied()
    }

    fn store(&self, name: &str, value: OffsetWord) {
        self.roots.write().unwrap().insert(name.to_string(), value);
    }

    fn remove(&self, name: &str) {
        self.roots.write().unwrap().remove(name);
    }

    fn snapshot(&self) -> Vec<OffsetWord> {
        self.roots.read().unwrap().values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::offset::PointerKind;

    #[test]
    fn store_then_lookup() {
        let dir = LocalRootDirectory::new();
        let ptr = OffsetWord::new(8, PointerKind::Normal);
        dir.store("x", ptr);
        assert_eq!(dir.lookup("x"), Some(ptr));
    }

    #[test]
    fn remove_clears_entry() {
        let dir = LocalRootDirectory::new();
        let ptr = OffsetWord::new(8, PointerKind::Normal);
        dir.store("x", ptr);
        dir.remove("x");
        assert_eq!(dir.lookup("x"), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let dir = LocalRootDirectory::new();
        let a = OffsetWord::new(8, PointerKind::Normal);
        let b = OffsetWord::new(16, PointerKind::Normal);
        dir.store("x", a);
        dir.store("x", b);
        assert_eq!(dir.lookup("x"), Some(b));
    }

    #[test]
    fn snapshot_lists_all_roots() {
        let dir = LocalRootDirectory::new();
        dir.store("x", OffsetWord::new(8, PointerKind::Normal));
        dir.store("y", OffsetWord::new(16, PointerKind::Normal));
        let mut snap = dir.snapshot();
        snap.sort_by_key(|w| w.offset());
        assert_eq!(snap.len(), 2);
    }
}
