//! Local hierarchical property store.
//!
//! Nodes own their children directly. Every mutation runs under one
//! re-entrant lock: structural changes happen inside a short `RefCell`
//! borrow, then the collected listener calls run with the borrow
//! released but the lock still held. A listener may therefore read or
//! mutate the tree from inside its callback on the same thread, while
//! other threads wait until the whole dispatch is over.
//!
//! Change notifications bubble: a listener on `A` hears about changes to
//! `A.B.C` with the relative path `B.C`.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use smallvec::SmallVec;
use stepwise_core::{
    CoreError, FromValue, ListenerId, PropertyChange, PropertyData, PropertyListener,
    PropertyStore, Value,
};

type Segments<'a> = SmallVec<[&'a str; 8]>;

fn split(path: &str) -> Result<Segments<'_>, CoreError> {
    if path.is_empty() {
        return Ok(Segments::new());
    }
    let segs: Segments<'_> = path.split('.').collect();
    if segs.iter().any(|s| s.is_empty()) {
        return Err(CoreError::InvalidArgument);
    }
    Ok(segs)
}

/// Join a parent path and a child name.
pub(crate) fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_owned()
    } else {
        format!("{parent}.{name}")
    }
}

// ── Nodes ──────────────────────────────────────────────────────

struct Node {
    name: String,
    values: Vec<Value>,
    children: Vec<Node>,
    listeners: Vec<(ListenerId, Arc<dyn PropertyListener>)>,
}

impl Node {
    fn new(name: &str, values: Vec<Value>) -> Self {
        Self {
            name: name.to_owned(),
            values,
            children: Vec::new(),
            listeners: Vec::new(),
        }
    }

    fn from_data(data: &PropertyData) -> Self {
        Self {
            name: data.name.clone(),
            values: data.values.clone(),
            children: data.children.iter().map(Node::from_data).collect(),
            listeners: Vec::new(),
        }
    }

    fn snapshot(&self) -> PropertyData {
        PropertyData {
            name: self.name.clone(),
            values: self.values.clone(),
            children: self.children.iter().map(Node::snapshot).collect(),
        }
    }

    fn find(&self, segs: &[&str]) -> Option<&Node> {
        segs.iter()
            .try_fold(self, |node, seg| node.children.iter().find(|c| c.name == *seg))
    }

    fn find_mut(&mut self, segs: &[&str]) -> Option<&mut Node> {
        let mut node = self;
        for seg in segs {
            node = node.children.iter_mut().find(|c| c.name == *seg)?;
        }
        Some(node)
    }

    /// Walk `segs`, creating missing nodes with an empty string value.
    /// Returns the target and the depth of the first created node
    /// (`segs.len()` if nothing was created).
    fn ensure(&mut self, segs: &[&str]) -> (&mut Node, usize) {
        let mut node = self;
        let mut first_created = segs.len();
        for (depth, seg) in segs.iter().enumerate() {
            let pos = match node.children.iter().position(|c| c.name == *seg) {
                Some(pos) => pos,
                None => {
                    if first_created == segs.len() {
                        first_created = depth;
                    }
                    node.children
                        .push(Node::new(seg, vec![Value::Str(String::new())]));
                    node.children.len() - 1
                }
            };
            node = &mut node.children[pos];
        }
        (node, first_created)
    }

    /// Absolute paths of this node and every descendant, parents first.
    fn subtree_paths(&self, path: &str, out: &mut Vec<String>) {
        out.push(path.to_owned());
        for child in &self.children {
            child.subtree_paths(&join(path, &child.name), out);
        }
    }
}

// ── Notification batches ───────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChangeKind {
    Added,
    Changed,
    Deleted,
}

struct Pending {
    kind: ChangeKind,
    listener: Arc<dyn PropertyListener>,
    change: PropertyChange,
}

#[derive(Default)]
struct Batch {
    ready: Vec<Pending>,
    later: Vec<(String, ChangeKind)>,
}

impl Batch {
    /// Queue a notification resolved once the mutation is done.
    fn touch(&mut self, path: String, kind: ChangeKind) {
        self.later.push((path, kind));
    }

    /// Queue delete notifications for `path` and its subtree. Must run
    /// before the subtree is detached.
    fn deleting(&mut self, root: &Node, path: &str) {
        let Ok(segs) = split(path) else { return };
        let Some(node) = root.find(&segs) else { return };
        let mut paths = Vec::new();
        node.subtree_paths(path, &mut paths);
        for p in paths {
            collect(root, &p, ChangeKind::Deleted, &mut self.ready);
        }
    }
}

/// Collect one notification per listener on the node at `path` and on
/// each of its ancestors, innermost first.
fn collect(root: &Node, path: &str, kind: ChangeKind, out: &mut Vec<Pending>) {
    let Ok(segs) = split(path) else { return };
    let mut chain: SmallVec<[&Node; 8]> = SmallVec::new();
    let mut node = root;
    chain.push(node);
    for seg in &segs {
        match node.children.iter().find(|c| c.name == *seg) {
            Some(child) => {
                node = child;
                chain.push(node);
            }
            None => return,
        }
    }
    let property = node.snapshot();
    for (depth, holder) in chain.iter().enumerate().rev() {
        if holder.listeners.is_empty() {
            continue;
        }
        let relative_path = segs[depth..].join(".");
        for (_, listener) in &holder.listeners {
            out.push(Pending {
                kind,
                listener: Arc::clone(listener),
                change: PropertyChange {
                    path: path.to_owned(),
                    relative_path: relative_path.clone(),
                    property: property.clone(),
                },
            });
        }
    }
}

fn dispatch(pending: Vec<Pending>) {
    for p in pending {
        let res = match p.kind {
            ChangeKind::Added => p.listener.on_property_added(&p.change),
            ChangeKind::Changed => p.listener.on_property_changed(&p.change),
            ChangeKind::Deleted => p.listener.on_property_deleted(&p.change),
        };
        if let Err(e) = res {
            tracing::debug!(path = %p.change.path, kind = ?p.kind, error = %e, "property listener failed");
        }
    }
}

/// Whether assigning `new` to a node holding `current` is observable.
fn differs(current: &[Value], new: &Value) -> bool {
    match current {
        [only] => match (only, new) {
            (Value::Int(a), Value::Float(b)) => *b as i32 != *a,
            (Value::Float(a), Value::Int(b)) => *a != f64::from(*b),
            (a, b) => a != b,
        },
        _ => true,
    }
}

// ── PropertyTree ───────────────────────────────────────────────

/// The local property tree of one participant.
pub struct PropertyTree {
    root: ReentrantMutex<RefCell<Node>>,
}

// Compile-time assertion: PropertyTree must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<PropertyTree>();
};

impl Default for PropertyTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyTree {
    /// An empty tree. The unnamed root has the empty path.
    pub fn new() -> Self {
        Self {
            root: ReentrantMutex::new(RefCell::new(Node::new("", Vec::new()))),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Node) -> T) -> T {
        let guard = self.root.lock();
        let root = guard.borrow();
        f(&root)
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Node, &mut Batch) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let guard = self.root.lock();
        let mut batch = Batch::default();
        let result = {
            let mut root = guard.borrow_mut();
            let result = f(&mut *root, &mut batch);
            for (path, kind) in std::mem::take(&mut batch.later) {
                collect(&*root, &path, kind, &mut batch.ready);
            }
            result
        };
        dispatch(batch.ready);
        result
    }

    /// Whether a node exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        let Ok(segs) = split(path) else { return false };
        self.read(|root| root.find(&segs).is_some())
    }

    /// Snapshot of the node at `path` and its subtree.
    pub fn get(&self, path: &str) -> Option<PropertyData> {
        let segs = split(path).ok()?;
        self.read(|root| root.find(&segs).map(Node::snapshot))
    }

    /// All values of the node at `path`.
    pub fn values(&self, path: &str) -> Result<Vec<Value>, CoreError> {
        let segs = split(path)?;
        self.read(|root| root.find(&segs).map(|n| n.values.clone()))
            .ok_or(CoreError::NotFound)
    }

    /// Typed value at `index`, converting between int and float.
    pub fn get_value<T: FromValue>(&self, path: &str, index: usize) -> Result<T, CoreError> {
        let segs = split(path)?;
        self.read(|root| {
            let node = root.find(&segs).ok_or(CoreError::NotFound)?;
            let v = node.values.get(index).ok_or(CoreError::InvalidArgument)?;
            T::from_value(v)
        })
    }

    /// Assign a scalar, replacing any array. Missing nodes are created.
    ///
    /// Listeners hear `added` for created nodes, otherwise `changed`
    /// when the value or type changed or the node was an array.
    pub fn set_value(&self, path: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        self.set_values(path, &[value.into()])
    }

    /// Assign an array. Later elements are converted to the first
    /// element's type.
    pub fn set_values(&self, path: &str, values: &[Value]) -> Result<(), CoreError> {
        let (first, rest) = values.split_first().ok_or(CoreError::InvalidArgument)?;
        let ty = first.value_type();
        let mut converted = Vec::with_capacity(values.len());
        converted.push(first.clone());
        for v in rest {
            converted.push(v.convert_to(ty)?);
        }
        let segs = split(path)?;
        if segs.is_empty() {
            return Err(CoreError::InvalidArgument);
        }
        self.mutate(|root, batch| {
            let (node, first_created) = root.ensure(&segs);
            let notify = converted.len() > 1 || differs(&node.values, first);
            node.values = converted;
            if first_created < segs.len() {
                for depth in first_created..segs.len() {
                    batch.touch(segs[..=depth].join("."), ChangeKind::Added);
                }
            } else if notify {
                batch.touch(path.to_owned(), ChangeKind::Changed);
            }
            Ok(())
        })
    }

    /// Append to an existing node's array. The value is converted to the
    /// array's element type.
    pub fn append_value(&self, path: &str, value: impl Into<Value>) -> Result<(), CoreError> {
        let value = value.into();
        let segs = split(path)?;
        self.mutate(|root, batch| {
            let node = root.find_mut(&segs).ok_or(CoreError::NotFound)?;
            let value = match node.values.first() {
                Some(first) => value.convert_to(first.value_type())?,
                None => value,
            };
            node.values.push(value);
            batch.touch(path.to_owned(), ChangeKind::Changed);
            Ok(())
        })
    }

    /// Reset the value to its type's zero and drop every child.
    pub fn clear_property(&self, path: &str) -> Result<(), CoreError> {
        let segs = split(path)?;
        self.mutate(|root, batch| {
            let children: Vec<String> = root
                .find(&segs)
                .ok_or(CoreError::NotFound)?
                .children
                .iter()
                .map(|c| join(path, &c.name))
                .collect();
            for child in &children {
                batch.deleting(root, child);
            }
            let node = root.find_mut(&segs).ok_or(CoreError::NotFound)?;
            node.children.clear();
            node.values = node
                .values
                .first()
                .map(|v| vec![Value::zero(v.value_type())])
                .unwrap_or_default();
            batch.touch(path.to_owned(), ChangeKind::Changed);
            Ok(())
        })
    }

    /// Remove a node and its subtree. The root cannot be deleted.
    pub fn delete_property(&self, path: &str) -> Result<(), CoreError> {
        let segs = split(path)?;
        let Some((name, parent)) = segs.split_last() else {
            return Err(CoreError::Failed);
        };
        self.mutate(|root, batch| {
            if root.find(&segs).is_none() {
                return Err(CoreError::NotFound);
            }
            batch.deleting(root, path);
            let parent = root.find_mut(parent).ok_or(CoreError::NotFound)?;
            parent.children.retain(|c| c.name != *name);
            Ok(())
        })
    }

    /// Graft `data` as a child of `local_path`, merging into an existing
    /// node of the same name. Missing ancestors are created.
    pub fn merge_property(&self, local_path: &str, data: &PropertyData) -> Result<(), CoreError> {
        if data.name.is_empty() || data.name.contains('.') {
            return Err(CoreError::InvalidArgument);
        }
        let segs = split(local_path)?;
        self.mutate(|root, batch| {
            let (parent, first_created) = root.ensure(&segs);
            merge_into(parent, local_path, data, batch);
            for depth in first_created..segs.len() {
                batch.touch(segs[..=depth].join("."), ChangeKind::Added);
            }
            Ok(())
        })
    }

    /// Observe the node at `path` and its descendants.
    pub fn register_listener(
        &self,
        path: &str,
        listener: Arc<dyn PropertyListener>,
    ) -> Result<ListenerId, CoreError> {
        let segs = split(path)?;
        let id = ListenerId::next();
        self.mutate(|root, _| {
            let node = root.find_mut(&segs).ok_or(CoreError::NotFound)?;
            node.listeners.push((id, listener));
            Ok(id)
        })
    }

    /// Stop observing. Fails with `NotFound` if either the node or the
    /// listener is unknown.
    pub fn unregister_listener(&self, path: &str, id: ListenerId) -> Result<(), CoreError> {
        let segs = split(path)?;
        self.mutate(|root, _| {
            let node = root.find_mut(&segs).ok_or(CoreError::NotFound)?;
            let pos = node
                .listeners
                .iter()
                .position(|(l, _)| *l == id)
                .ok_or(CoreError::NotFound)?;
            node.listeners.remove(pos);
            Ok(())
        })
    }
}

fn merge_into(parent: &mut Node, parent_path: &str, data: &PropertyData, batch: &mut Batch) {
    let path = join(parent_path, &data.name);
    match parent.children.iter_mut().find(|c| c.name == data.name) {
        Some(existing) => {
            if existing.values != data.values {
                existing.values = data.values.clone();
                batch.touch(path.clone(), ChangeKind::Changed);
            }
            for child in &data.children {
                merge_into(existing, &path, child, batch);
            }
        }
        None => {
            parent.children.push(Node::from_data(data));
            batch.touch(path, ChangeKind::Added);
        }
    }
}

impl PropertyStore for PropertyTree {
    fn get_property(&self, path: &str) -> Option<PropertyData> {
        self.get(path)
    }

    fn set_property_value(&self, path: &str, value: Value) -> Result<(), CoreError> {
        self.set_value(path, value)
    }

    fn register_listener(
        &self,
        path: &str,
        listener: Arc<dyn PropertyListener>,
    ) -> Result<ListenerId, CoreError> {
        PropertyTree::register_listener(self, path, listener)
    }

    fn unregister_listener(&self, path: &str, id: ListenerId) -> Result<(), CoreError> {
        PropertyTree::unregister_listener(self, path, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(&'static str, String, String)>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<(&'static str, String, String)> {
            std::mem::take(&mut *self.events.lock())
        }
    }

    impl PropertyListener for Recorder {
        fn on_property_added(&self, c: &PropertyChange) -> Result<(), CoreError> {
            self.events
                .lock()
                .push(("add", c.path.clone(), c.relative_path.clone()));
            Ok(())
        }
        fn on_property_changed(&self, c: &PropertyChange) -> Result<(), CoreError> {
            self.events
                .lock()
                .push(("change", c.path.clone(), c.relative_path.clone()));
            Ok(())
        }
        fn on_property_deleted(&self, c: &PropertyChange) -> Result<(), CoreError> {
            self.events
                .lock()
                .push(("delete", c.path.clone(), c.relative_path.clone()));
            Ok(())
        }
    }

    #[test]
    fn set_creates_intermediate_nodes() {
        let tree = PropertyTree::new();
        tree.set_value("A.B.C", 5).unwrap();
        assert_eq!(tree.get_value::<i32>("A.B.C", 0), Ok(5));
        assert_eq!(tree.get_value::<String>("A.B", 0), Ok(String::new()));
        assert!(tree.exists("A"));
        assert!(!tree.exists("A.X"));
    }

    #[test]
    fn typed_getters() {
        let tree = PropertyTree::new();
        tree.set_value("N", 7).unwrap();
        assert_eq!(tree.get_value::<f64>("N", 0), Ok(7.0));
        assert_eq!(tree.get_value::<bool>("N", 0), Err(CoreError::InvalidType));
        assert_eq!(tree.get_value::<i32>("N", 1), Err(CoreError::InvalidArgument));
        assert_eq!(tree.get_value::<i32>("M", 0), Err(CoreError::NotFound));
    }

    #[test]
    fn change_bubbles_with_relative_path() {
        let tree = PropertyTree::new();
        tree.set_value("A.B.C", 1).unwrap();
        let rec = Arc::new(Recorder::default());
        tree.register_listener("A", rec.clone()).unwrap();
        tree.register_listener("A.B.C", rec.clone()).unwrap();
        tree.set_value("A.B.C", 2).unwrap();
        assert_eq!(
            rec.take(),
            vec![
                ("change", "A.B.C".to_owned(), String::new()),
                ("change", "A.B.C".to_owned(), "B.C".to_owned()),
            ]
        );
    }

    #[test]
    fn unchanged_scalar_is_silent() {
        let tree = PropertyTree::new();
        tree.set_value("X", 3).unwrap();
        let rec = Arc::new(Recorder::default());
        tree.register_listener("X", rec.clone()).unwrap();
        tree.set_value("X", 3).unwrap();
        tree.set_value("X", 3.0).unwrap();
        assert!(rec.take().is_empty());
        tree.set_value("X", "3").unwrap();
        assert_eq!(rec.take().len(), 1);
    }

    #[test]
    fn array_reset_always_notifies() {
        let tree = PropertyTree::new();
        tree.set_values("Arr", &[Value::Int(1), Value::Int(2)]).unwrap();
        let rec = Arc::new(Recorder::default());
        tree.register_listener("Arr", rec.clone()).unwrap();
        tree.set_value("Arr", 1).unwrap();
        assert_eq!(rec.take().len(), 1);
        assert_eq!(tree.values("Arr").unwrap(), vec![Value::Int(1)]);
    }

    #[test]
    fn new_nodes_announce_themselves_to_ancestors() {
        let tree = PropertyTree::new();
        tree.set_value("A", true).unwrap();
        let rec = Arc::new(Recorder::default());
        tree.register_listener("A", rec.clone()).unwrap();
        tree.set_value("A.B.C", 1).unwrap();
        assert_eq!(
            rec.take(),
            vec![
                ("add", "A.B".to_owned(), "B".to_owned()),
                ("add", "A.B.C".to_owned(), "B.C".to_owned()),
            ]
        );
    }

    #[test]
    fn append_enforces_element_type() {
        let tree = PropertyTree::new();
        tree.set_value("F", 1.5).unwrap();
        tree.append_value("F", 2).unwrap();
        assert_eq!(tree.get_value::<f64>("F", 1), Ok(2.0));
        assert_eq!(tree.append_value("F", "x"), Err(CoreError::InvalidType));
        assert_eq!(tree.append_value("G", 1), Err(CoreError::NotFound));
    }

    #[test]
    fn set_values_rejects_empty_and_mixed() {
        let tree = PropertyTree::new();
        assert_eq!(tree.set_values("A", &[]), Err(CoreError::InvalidArgument));
        assert_eq!(
            tree.set_values("A", &[Value::Bool(true), Value::Int(1)]),
            Err(CoreError::InvalidType)
        );
        assert!(!tree.exists("A"));
    }

    #[test]
    fn clear_resets_value_and_children() {
        let tree = PropertyTree::new();
        tree.set_value("A", 9).unwrap();
        tree.set_value("A.B", "x").unwrap();
        let rec = Arc::new(Recorder::default());
        tree.register_listener("A", rec.clone()).unwrap();
        tree.clear_property("A").unwrap();
        assert_eq!(tree.get_value::<i32>("A", 0), Ok(0));
        assert!(!tree.exists("A.B"));
        assert_eq!(
            rec.take(),
            vec![
                ("delete", "A.B".to_owned(), "B".to_owned()),
                ("change", "A".to_owned(), String::new()),
            ]
        );
    }

    #[test]
    fn delete_notifies_whole_subtree() {
        let tree = PropertyTree::new();
        tree.set_value("A.B.C", 1).unwrap();
        let inner = Arc::new(Recorder::default());
        tree.register_listener("A.B.C", inner.clone()).unwrap();
        tree.delete_property("A.B").unwrap();
        assert!(!tree.exists("A.B"));
        assert_eq!(inner.take(), vec![("delete", "A.B.C".to_owned(), String::new())]);
        assert_eq!(tree.delete_property("A.B"), Err(CoreError::NotFound));
        assert_eq!(tree.delete_property(""), Err(CoreError::Failed));
    }

    #[test]
    fn merge_grafts_and_updates() {
        let tree = PropertyTree::new();
        let data = PropertyData::new("Remote")
            .with_value(1)
            .with_child(PropertyData::new("Leaf").with_value("a"));
        tree.merge_property("Mirror", &data).unwrap();
        assert_eq!(tree.get_value::<String>("Mirror.Remote.Leaf", 0), Ok("a".to_owned()));

        let rec = Arc::new(Recorder::default());
        tree.register_listener("Mirror", rec.clone()).unwrap();
        let data = PropertyData::new("Remote")
            .with_value(1)
            .with_child(PropertyData::new("Leaf").with_value("b"))
            .with_child(PropertyData::new("Other").with_value(false));
        tree.merge_property("Mirror", &data).unwrap();
        assert_eq!(
            rec.take(),
            vec![
                ("change", "Mirror.Remote.Leaf".to_owned(), "Remote.Leaf".to_owned()),
                ("add", "Mirror.Remote.Other".to_owned(), "Remote.Other".to_owned()),
            ]
        );
    }

    #[test]
    fn listener_may_mutate_tree() {
        struct Echo(Arc<PropertyTree>);
        impl PropertyListener for Echo {
            fn on_property_changed(&self, c: &PropertyChange) -> Result<(), CoreError> {
                let v: i32 = c.property.get(0)?;
                self.0.set_value("Echo", v * 2)
            }
        }
        let tree = Arc::new(PropertyTree::new());
        tree.set_value("In", 1).unwrap();
        tree.register_listener("In", Arc::new(Echo(tree.clone())))
            .unwrap();
        tree.set_value("In", 21).unwrap();
        assert_eq!(tree.get_value::<i32>("Echo", 0), Ok(42));
    }

    #[test]
    fn unregister_unknown_listener() {
        let tree = PropertyTree::new();
        tree.set_value("A", 1).unwrap();
        let id = tree
            .register_listener("A", Arc::new(Recorder::default()))
            .unwrap();
        tree.unregister_listener("A", id).unwrap();
        assert_eq!(tree.unregister_listener("A", id), Err(CoreError::NotFound));
        assert_eq!(
            tree.register_listener("Missing", Arc::new(Recorder::default()))
                .unwrap_err(),
            CoreError::NotFound
        );
    }
}
