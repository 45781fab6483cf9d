//! Mirrored remote properties.
//!
//! Records live in an indexed table; the transport listener installed
//! for a mirror carries its [`MirrorIndex`] rather than the record's
//! key, so renaming the remote element only rewrites the record.

use stepwise_core::{ChangeEvent, ListenerId};

use crate::tree::join;

/// Stable index of a mirror record. The generation tells a reused slot
/// apart from the record the index was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct MirrorIndex {
    slot: usize,
    generation: u64,
}

/// One mirrored remote subtree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MirrorRecord {
    /// Remote element, updated on rename.
    pub element: String,
    /// Subscribed path on the remote element; empty mirrors the whole tree.
    pub remote_path: String,
    /// Local parent path the subtree is grafted under.
    pub local_path: String,
    /// Local path of the mirrored subtree's root.
    pub root_path: String,
    /// Transport listener feeding this mirror.
    pub listener: Option<ListenerId>,
    /// Set once the remote subtree has been grafted locally.
    pub grafted: bool,
}

impl MirrorRecord {
    pub fn new(element: &str, remote_path: &str, local_path: &str) -> Self {
        let root_name = match remote_path.rsplit_once('.') {
            Some((_, last)) => last,
            None if remote_path.is_empty() => element,
            None => remote_path,
        };
        Self {
            element: element.to_owned(),
            remote_path: remote_path.to_owned(),
            local_path: local_path.to_owned(),
            root_path: join(local_path, root_name),
            listener: None,
            grafted: false,
        }
    }

    fn matches(&self, element: &str, remote_path: &str, local_path: &str) -> bool {
        self.element == element && self.remote_path == remote_path && self.local_path == local_path
    }

    /// Whether a change of `path` on `sender` concerns this mirror.
    pub fn covers(&self, sender: &str, path: &str) -> bool {
        if sender != self.element {
            return false;
        }
        self.remote_path.is_empty()
            || path == self.remote_path
            || path
                .strip_prefix(self.remote_path.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Local path corresponding to the remote `path`. The empty path maps
    /// to nothing.
    pub fn local_for(&self, path: &str) -> Option<String> {
        if path.is_empty() {
            return None;
        }
        if path == self.remote_path {
            return Some(self.root_path.clone());
        }
        let rest = if self.remote_path.is_empty() {
            path
        } else {
            path.strip_prefix(self.remote_path.as_str())?
                .strip_prefix('.')?
        };
        Some(join(&self.root_path, rest))
    }
}

/// Local tree operation derived from a remote change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MirrorUpdate {
    /// Overwrite the values of a node.
    SetValues { path: String },
    /// Graft the new node under `parent` as `name`.
    Add { parent: String, name: String },
    /// Remove a node below the mirror root.
    Delete { path: String },
    /// The mirrored root itself is gone.
    DropMirror,
}

/// Translate a remote change into a local update.
pub(crate) fn translate(record: &MirrorRecord, event: ChangeEvent, path: &str) -> Option<MirrorUpdate> {
    match event {
        ChangeEvent::Change => record
            .local_for(path)
            .map(|path| MirrorUpdate::SetValues { path }),
        ChangeEvent::Delete => {
            let local = record.local_for(path)?;
            if local == record.root_path {
                Some(MirrorUpdate::DropMirror)
            } else {
                Some(MirrorUpdate::Delete { path: local })
            }
        }
        ChangeEvent::New => {
            let (parent, name) = path.rsplit_once('.').unwrap_or(("", path));
            let parent = if parent.is_empty() && !record.remote_path.is_empty() {
                return None;
            } else if parent.is_empty() {
                record.root_path.clone()
            } else {
                record.local_for(parent)?
            };
            Some(MirrorUpdate::Add {
                parent,
                name: name.to_owned(),
            })
        }
    }
}

/// Indexed mirror records.
#[derive(Default)]
pub(crate) struct MirrorTable {
    slots: Vec<Slot>,
    next_generation: u64,
}

struct Slot {
    generation: u64,
    record: Option<MirrorRecord>,
}

impl MirrorTable {
    pub fn insert(&mut self, record: MirrorRecord) -> MirrorIndex {
        let generation = self.next_generation;
        self.next_generation += 1;
        let slot = match self.slots.iter().position(|s| s.record.is_none()) {
            Some(free) => {
                self.slots[free] = Slot {
                    generation,
                    record: Some(record),
                };
                free
            }
            None => {
                self.slots.push(Slot {
                    generation,
                    record: Some(record),
                });
                self.slots.len() - 1
            }
        };
        MirrorIndex { slot, generation }
    }

    fn slot(&self, index: MirrorIndex) -> Option<&Slot> {
        self.slots
            .get(index.slot)
            .filter(|s| s.generation == index.generation)
    }

    fn slot_mut(&mut self, index: MirrorIndex) -> Option<&mut Slot> {
        self.slots
            .get_mut(index.slot)
            .filter(|s| s.generation == index.generation)
    }

    pub fn get(&self, index: MirrorIndex) -> Option<&MirrorRecord> {
        self.slot(index).and_then(|s| s.record.as_ref())
    }

    pub fn get_mut(&mut self, index: MirrorIndex) -> Option<&mut MirrorRecord> {
        self.slot_mut(index).and_then(|s| s.record.as_mut())
    }

    pub fn find(&self, element: &str, remote_path: &str, local_path: &str) -> Option<MirrorIndex> {
        self.slots.iter().enumerate().find_map(|(slot, s)| {
            s.record
                .as_ref()
                .filter(|r| r.matches(element, remote_path, local_path))
                .map(|_| MirrorIndex {
                    slot,
                    generation: s.generation,
                })
        })
    }

    pub fn remove(&mut self, index: MirrorIndex) -> Option<MirrorRecord> {
        self.slot_mut(index).and_then(|s| s.record.take())
    }

    pub fn drain(&mut self) -> Vec<MirrorRecord> {
        self.slots.drain(..).filter_map(|s| s.record).collect()
    }

    /// Point every record of `old` at `new`. Returns the number rebound.
    pub fn rename_element(&mut self, old: &str, new: &str) -> usize {
        let mut n = 0;
        for record in self.slots.iter_mut().filter_map(|s| s.record.as_mut()) {
            if record.element == old {
                record.element = new.to_owned();
                n += 1;
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.record.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_name_follows_remote_path() {
        assert_eq!(MirrorRecord::new("B", "A.X", "Loc").root_path, "Loc.X");
        assert_eq!(MirrorRecord::new("B", "A", "Loc").root_path, "Loc.A");
        assert_eq!(MirrorRecord::new("B", "", "Loc").root_path, "Loc.B");
        assert_eq!(MirrorRecord::new("B", "A", "").root_path, "A");
    }

    #[test]
    fn covers_respects_segment_boundaries() {
        let r = MirrorRecord::new("B", "A.X", "Loc");
        assert!(r.covers("B", "A.X"));
        assert!(r.covers("B", "A.X.Y"));
        assert!(!r.covers("B", "A.XY"));
        assert!(!r.covers("C", "A.X"));
        assert!(MirrorRecord::new("B", "", "Loc").covers("B", "Anything"));
    }

    #[test]
    fn local_paths() {
        let r = MirrorRecord::new("B", "A.X", "Loc");
        assert_eq!(r.local_for("A.X").as_deref(), Some("Loc.X"));
        assert_eq!(r.local_for("A.X.Y.Z").as_deref(), Some("Loc.X.Y.Z"));
        assert_eq!(r.local_for(""), None);
        let whole = MirrorRecord::new("B", "", "Loc");
        assert_eq!(whole.local_for("A.X").as_deref(), Some("Loc.B.A.X"));
    }

    #[test]
    fn translate_events() {
        let r = MirrorRecord::new("B", "A", "Loc");
        assert_eq!(
            translate(&r, ChangeEvent::Change, "A.V"),
            Some(MirrorUpdate::SetValues {
                path: "Loc.A.V".to_owned()
            })
        );
        assert_eq!(translate(&r, ChangeEvent::Delete, "A"), Some(MirrorUpdate::DropMirror));
        assert_eq!(
            translate(&r, ChangeEvent::Delete, "A.V"),
            Some(MirrorUpdate::Delete {
                path: "Loc.A.V".to_owned()
            })
        );
        assert_eq!(
            translate(&r, ChangeEvent::New, "A.N"),
            Some(MirrorUpdate::Add {
                parent: "Loc.A".to_owned(),
                name: "N".to_owned()
            })
        );
        let whole = MirrorRecord::new("B", "", "Loc");
        assert_eq!(
            translate(&whole, ChangeEvent::New, "Top"),
            Some(MirrorUpdate::Add {
                parent: "Loc.B".to_owned(),
                name: "Top".to_owned()
            })
        );
    }

    #[test]
    fn indices_survive_removal_and_rename() {
        let mut table = MirrorTable::default();
        let a = table.insert(MirrorRecord::new("B", "A", "L1"));
        let b = table.insert(MirrorRecord::new("B", "C", "L2"));
        table.remove(a);
        assert_eq!(table.get(b).map(|r| r.remote_path.as_str()), Some("C"));
        assert_eq!(table.rename_element("B", "B2"), 1);
        assert_eq!(table.find("B2", "C", "L2"), Some(b));
        assert_eq!(table.find("B", "C", "L2"), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stale_index_does_not_resolve_to_reused_slot() {
        let mut table = MirrorTable::default();
        let old = table.insert(MirrorRecord::new("B", "A", "L1"));
        assert!(table.remove(old).is_some());
        let new = table.insert(MirrorRecord::new("C", "X", "L2"));
        assert_ne!(old, new);
        assert!(table.get(old).is_none());
        assert!(table.get_mut(old).is_none());
        assert!(table.remove(old).is_none());
        assert_eq!(table.get(new).map(|r| r.element.as_str()), Some("C"));
        assert_eq!(table.find("C", "X", "L2"), Some(new));
        assert_eq!(table.len(), 1);
    }
}
