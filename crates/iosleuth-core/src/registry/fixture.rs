/// In-memory scripted registry backend.
///
/// Lets tests build a small registry tree, script how each entry responds
/// to connection-open attempts, and observe handle bookkeeping (how many
/// entries and connections are live at any moment). Single-threaded by
/// design, matching the engine's synchronous execution model.
use super::{Connection, Entry, RawHandle, Registry, Status};
use compact_str::CompactString;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// "(iokit/common) general error" — used for failed metadata lookups.
pub const STATUS_ERROR: Status = Status(0xE00002BCu32 as i32);
/// "(iokit/common) unsupported function" — default open-denial code.
pub const STATUS_UNSUPPORTED: Status = Status(0xE00002C7u32 as i32);
/// "(iokit/common) not privileged" — alternative denial code.
pub const STATUS_NOT_PRIVILEGED: Status = Status(0xE00002C1u32 as i32);

/// How one entry responds to an open attempt for one type code.
///
/// `handles[0]` is granted to the first open, `handles[1]` to every
/// subsequent one — scripting both singleton services (same value twice)
/// and per-open services (two distinct values). A zero handle means the
/// host grants no connection, whatever the status says.
#[derive(Debug, Clone, Copy)]
pub struct OpenScript {
    pub status: Status,
    pub handles: [RawHandle; 2],
}

impl OpenScript {
    /// Denied with the default code; no handle.
    pub fn denied() -> Self {
        OpenScript {
            status: STATUS_UNSUPPORTED,
            handles: [0, 0],
        }
    }

    /// Success status and real handles.
    pub fn granted(first: RawHandle, second: RawHandle) -> Self {
        OpenScript {
            status: Status::SUCCESS,
            handles: [first, second],
        }
    }

    /// Success status but a null handle — the ambiguous host behavior.
    pub fn granted_empty() -> Self {
        OpenScript {
            status: Status::SUCCESS,
            handles: [0, 0],
        }
    }
}

struct Node {
    name: Option<CompactString>,
    class: Option<CompactString>,
    properties: HashMap<CompactString, CompactString>,
    opens: HashMap<u32, OpenScript>,
    set_status: Status,
    children: Vec<usize>,
}

struct Inner {
    nodes: Vec<Node>,
    superclasses: HashMap<CompactString, Option<CompactString>>,
    pid: u32,
    open_counts: RefCell<HashMap<(usize, u32), usize>>,
    live_entries: Cell<usize>,
    open_connections: Cell<usize>,
}

impl Inner {
    fn conforms_to(&self, idx: usize, pattern: &str) -> bool {
        let mut class = match &self.nodes[idx].class {
            Some(c) => Some(c.clone()),
            None => return false,
        };
        while let Some(c) = class {
            if c == pattern {
                return true;
            }
            class = self.superclasses.get(&c).cloned().flatten();
        }
        false
    }
}

/// Identifies a node while building; not a registry handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// Builder for a [`FixtureRegistry`].
pub struct FixtureBuilder {
    nodes: Vec<Node>,
    superclasses: HashMap<CompactString, Option<CompactString>>,
    pid: u32,
}

impl FixtureBuilder {
    /// Start a tree with the given root entry. The root is what the
    /// snapshot collector records first, before draining the plane.
    pub fn new(root_name: &str, root_class: &str) -> Self {
        let mut b = FixtureBuilder {
            nodes: Vec::new(),
            superclasses: HashMap::new(),
            pid: 1234,
        };
        b.nodes.push(Node {
            name: Some(CompactString::new(root_name)),
            class: Some(CompactString::new(root_class)),
            properties: HashMap::new(),
            opens: HashMap::new(),
            set_status: Status::SUCCESS,
            children: Vec::new(),
        });
        b
    }

    /// Set the pid reported as the calling process's identity.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Register a class and its immediate superclass for conforms-to and
    /// hierarchy walks.
    pub fn register_class(&mut self, class: &str, superclass: Option<&str>) {
        self.superclasses
            .insert(CompactString::new(class), superclass.map(CompactString::new));
    }

    /// Add a child entry under `parent`.
    pub fn child(&mut self, parent: NodeId, name: &str, class: &str) -> NodeId {
        let idx = self.nodes.len();
        self.nodes.push(Node {
            name: Some(CompactString::new(name)),
            class: Some(CompactString::new(class)),
            properties: HashMap::new(),
            opens: HashMap::new(),
            set_status: Status::SUCCESS,
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(idx);
        NodeId(idx)
    }

    /// Make name lookups fail for this entry.
    pub fn clear_name(&mut self, id: NodeId) {
        self.nodes[id.0].name = None;
    }

    /// Make class lookups fail for this entry.
    pub fn clear_class(&mut self, id: NodeId) {
        self.nodes[id.0].class = None;
    }

    pub fn property(&mut self, id: NodeId, key: &str, value: &str) {
        self.nodes[id.0]
            .properties
            .insert(CompactString::new(key), CompactString::new(value));
    }

    /// Script the response to opening `type_code` against this entry.
    /// Unscripted type codes are denied with [`STATUS_UNSUPPORTED`].
    pub fn open_script(&mut self, id: NodeId, type_code: u32, script: OpenScript) {
        self.nodes[id.0].opens.insert(type_code, script);
    }

    /// Script the response to the set-property probe.
    pub fn set_status(&mut self, id: NodeId, status: Status) {
        self.nodes[id.0].set_status = status;
    }

    pub fn build(self) -> FixtureRegistry {
        FixtureRegistry {
            inner: Rc::new(Inner {
                nodes: self.nodes,
                superclasses: self.superclasses,
                pid: self.pid,
                open_counts: RefCell::new(HashMap::new()),
                live_entries: Cell::new(0),
                open_connections: Cell::new(0),
            }),
        }
    }
}

/// Scripted in-memory registry.
#[derive(Clone)]
pub struct FixtureRegistry {
    inner: Rc<Inner>,
}

impl FixtureRegistry {
    /// Number of entry handles currently held by callers.
    pub fn live_entries(&self) -> usize {
        self.inner.live_entries.get()
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.get()
    }

    fn entry(&self, idx: usize) -> FixtureEntry {
        FixtureEntry::new(self.inner.clone(), idx)
    }
}

/// Owned handle to one fixture node. Dropping it is the release.
pub struct FixtureEntry {
    inner: Rc<Inner>,
    idx: usize,
}

impl FixtureEntry {
    fn new(inner: Rc<Inner>, idx: usize) -> Self {
        inner.live_entries.set(inner.live_entries.get() + 1);
        FixtureEntry { inner, idx }
    }
}

impl Drop for FixtureEntry {
    fn drop(&mut self) {
        self.inner
            .live_entries
            .set(self.inner.live_entries.get() - 1);
    }
}

pub struct FixtureConnection {
    inner: Rc<Inner>,
    raw: RawHandle,
}

impl Drop for FixtureConnection {
    fn drop(&mut self) {
        self.inner
            .open_connections
            .set(self.inner.open_connections.get() - 1);
    }
}

impl Connection for FixtureConnection {
    fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl Entry for FixtureEntry {
    type Connection = FixtureConnection;
    type ChildIter = std::vec::IntoIter<FixtureEntry>;

    fn name(&self) -> Result<CompactString, Status> {
        self.inner.nodes[self.idx]
            .name
            .clone()
            .ok_or(STATUS_ERROR)
    }

    fn class_name(&self) -> Result<CompactString, Status> {
        self.inner.nodes[self.idx]
            .class
            .clone()
            .ok_or(STATUS_ERROR)
    }

    fn conforms_to(&self, class: &str) -> bool {
        self.inner.conforms_to(self.idx, class)
    }

    fn children(&self, _plane: &str) -> Result<Self::ChildIter, Status> {
        // The fixture exposes the same parent/child structure in every plane.
        let children: Vec<FixtureEntry> = self.inner.nodes[self.idx]
            .children
            .iter()
            .map(|&c| FixtureEntry::new(self.inner.clone(), c))
            .collect();
        Ok(children.into_iter())
    }

    fn string_property(&self, key: &str) -> Option<CompactString> {
        self.inner.nodes[self.idx].properties.get(key).cloned()
    }

    fn properties_text(&self) -> Result<String, Status> {
        let props = &self.inner.nodes[self.idx].properties;
        let mut keys: Vec<&CompactString> = props.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(&props[key]);
            out.push('\n');
        }
        Ok(out)
    }

    fn set_string_property(&self, _key: &str, _value: &str) -> Status {
        self.inner.nodes[self.idx].set_status
    }

    fn open(&self, type_code: u32) -> (Status, Option<FixtureConnection>) {
        let script = match self.inner.nodes[self.idx].opens.get(&type_code) {
            Some(s) => *s,
            None => OpenScript::denied(),
        };
        let mut counts = self.inner.open_counts.borrow_mut();
        let count = counts.entry((self.idx, type_code)).or_insert(0);
        let raw = script.handles[(*count).min(1)];
        *count += 1;
        drop(counts);

        let conn = if raw != 0 {
            self.inner
                .open_connections
                .set(self.inner.open_connections.get() + 1);
            Some(FixtureConnection {
                inner: self.inner.clone(),
                raw,
            })
        } else {
            None
        };
        (script.status, conn)
    }
}

impl Registry for FixtureRegistry {
    type Entry = FixtureEntry;
    type PlaneIter = std::vec::IntoIter<FixtureEntry>;

    fn root(&self) -> Result<FixtureEntry, Status> {
        Ok(self.entry(0))
    }

    fn iter_plane(&self, _plane: &str, recursive: bool) -> Result<Self::PlaneIter, Status> {
        // Pre-order over the root's descendants; the root itself is the
        // caller's to fetch separately.
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.inner.nodes[0].children.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            out.push(self.entry(idx));
            if recursive {
                for &c in self.inner.nodes[idx].children.iter().rev() {
                    stack.push(c);
                }
            }
        }
        Ok(out.into_iter())
    }

    fn status_message(&self, status: Status) -> String {
        match status {
            Status::SUCCESS => "successful".to_string(),
            STATUS_ERROR => "(iokit/common) general error".to_string(),
            STATUS_UNSUPPORTED => "(iokit/common) unsupported function".to_string(),
            STATUS_NOT_PRIVILEGED => "(iokit/common) not privileged".to_string(),
            other => format!("unknown error code {other}"),
        }
    }

    fn current_pid(&self) -> u32 {
        self.inner.pid
    }

    fn superclass_of(&self, class: &str) -> Option<CompactString> {
        self.inner.superclasses.get(class).cloned().flatten()
    }
}
