/// Registry abstraction — the seam between the probing engine and the
/// host's hierarchical device/service registry.
///
/// Everything above this module is written against the [`Registry`],
/// [`Entry`], and [`Connection`] traits. Two backends exist:
///
/// - [`crate::platform::iokit`] — the real IOKit registry (macOS only).
/// - [`fixture`] — an in-memory scripted registry used by the test suite,
///   following the production/verification backend split.
///
/// Handle lifetimes are expressed through ownership: an [`Entry`] releases
/// its underlying registry handle when dropped, and a [`Connection`] closes
/// the client connection when dropped. Early-exit paths therefore cannot
/// leak handles.
pub mod fixture;

use compact_str::CompactString;
use std::fmt;

/// Raw numeric value of a connection handle. `0` is the null handle.
pub type RawHandle = u64;

/// Status code returned by registry operations.
///
/// Mirrors the host's kernel return code: `0` is success, everything else
/// is backend-defined. Human-readable messages come from
/// [`Registry::status_message`] because the code-to-string mapping belongs
/// to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);

    #[inline]
    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A typed client connection to a registry entry's service.
///
/// Closed exactly once, on drop. The raw value stays meaningful after the
/// connection is closed (it is recorded in probe results for display), but
/// the handle itself must never be used again.
pub trait Connection {
    /// Raw handle value as granted by the host. `0` means the host granted
    /// no real handle even though the open call may have succeeded.
    fn raw(&self) -> RawHandle;

    /// Whether the handle names a live, usable connection.
    fn is_valid(&self) -> bool {
        self.raw() != 0
    }
}

/// An owned handle to one node of the registry tree.
///
/// Released exactly once, on drop.
pub trait Entry: Sized {
    type Connection: Connection;
    type ChildIter: Iterator<Item = Self>;

    /// Instance name of the entry. Fails independently of [`class_name`].
    ///
    /// [`class_name`]: Entry::class_name
    fn name(&self) -> Result<CompactString, Status>;

    /// Class name of the entry.
    fn class_name(&self) -> Result<CompactString, Status>;

    /// Class-or-ancestor-class equality check against `class`.
    fn conforms_to(&self, class: &str) -> bool;

    /// Iterate the entry's direct children in the given plane.
    fn children(&self, plane: &str) -> Result<Self::ChildIter, Status>;

    /// Read a short string property by key, if present and string-typed.
    fn string_property(&self, key: &str) -> Option<CompactString>;

    /// Serialise the entry's whole property table for display.
    fn properties_text(&self) -> Result<String, Status>;

    /// Attempt to set a single string property. Used only as a no-op
    /// acceptance probe; the payload is fixed by the caller.
    fn set_string_property(&self, key: &str, value: &str) -> Status;

    /// Attempt to open a typed client connection against this entry.
    ///
    /// The returned status and handle vary independently: a success status
    /// may come with no handle (the host accepted the call but granted no
    /// connection), and that state is meaningful to callers.
    fn open(&self, type_code: u32) -> (Status, Option<Self::Connection>);
}

/// Entry point into a registry backend.
pub trait Registry {
    type Entry: Entry;
    type PlaneIter: Iterator<Item = <Self as Registry>::Entry>;

    /// The root entry of the registry. Present in every plane.
    fn root(&self) -> Result<Self::Entry, Status>;

    /// Iterate entries of the named plane, rooted at the registry root.
    /// The root itself is not yielded. With `recursive` set, yields the
    /// whole subtree in pre-order; otherwise only the root's children.
    fn iter_plane(&self, plane: &str, recursive: bool) -> Result<Self::PlaneIter, Status>;

    /// Human-readable message for a status code, as produced by the host's
    /// status-to-string facility.
    fn status_message(&self, status: Status) -> String;

    /// Process id of the calling process, used to recognise client objects
    /// this process itself caused to be created.
    fn current_pid(&self) -> u32;

    /// Immediate superclass of a class name, or `None` at the top of the
    /// hierarchy (or for unknown classes).
    fn superclass_of(&self, class: &str) -> Option<CompactString>;
}
