/// Data model for probe results.
///
/// One [`ProbeResult`] is produced per (entry, type code) pair actually
/// probed. Results are append-only and keep the exact order the probe
/// engine produced them in: entry traversal order crossed with ascending
/// type code. Rendering depends on that determinism.
use crate::registry::{Connection, RawHandle, Status};
use compact_str::CompactString;

/// Classification of the two independently-obtained connection handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleEquality {
    /// The second open was never attempted (or granted no handle).
    /// Rendered as an empty cell.
    NoComparison,
    /// Both opens returned the bit-identical handle — the service hands
    /// out a shared singleton connection.
    Equal,
    /// The opens returned distinct handles — per-open client semantics.
    NotEqual,
}

impl HandleEquality {
    /// Classify from the recorded raw values. Deterministic: the same
    /// inputs always produce the same label.
    pub fn classify(one: RawHandle, two: RawHandle) -> Self {
        if two == 0 {
            HandleEquality::NoComparison
        } else if one == two {
            HandleEquality::Equal
        } else {
            HandleEquality::NotEqual
        }
    }

    /// Table cell text.
    pub fn label(self) -> &'static str {
        match self {
            HandleEquality::NoComparison => "",
            HandleEquality::Equal => "==",
            HandleEquality::NotEqual => "!=",
        }
    }
}

/// Three-way outcome of a single connection-open attempt.
///
/// Some services accept the open call but grant no real connection for
/// certain type codes; that state is host-policy-dependent and is kept
/// distinct instead of being collapsed into success/failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenDisposition {
    /// The open call returned a failure status.
    Denied,
    /// Success status, but the granted handle is null or unusable.
    GrantedEmpty,
    /// Success status and a live connection handle.
    Granted,
}

impl OpenDisposition {
    pub fn classify<C: Connection>(status: Status, conn: Option<&C>) -> Self {
        if !status.is_success() {
            OpenDisposition::Denied
        } else if conn.map_or(false, |c| c.is_valid()) {
            OpenDisposition::Granted
        } else {
            OpenDisposition::GrantedEmpty
        }
    }
}

/// One record of a probing attempt against one entry with one type code.
///
/// Never mutated after construction. An empty `class_name` or
/// `instance_name` means the corresponding metadata lookup failed; an
/// empty `client_class` means no same-process client object was found
/// (which is not an error).
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub class_name: CompactString,
    pub instance_name: CompactString,
    pub type_code: u32,
    /// Status of the first open attempt.
    pub spawn: Status,
    /// Host-rendered message for `spawn`, resolved at probe time so the
    /// renderer needs no backend access.
    pub spawn_message: String,
    /// Class of the user-client object our own process caused to be
    /// created, when one was found among the entry's children.
    pub client_class: CompactString,
    pub handle_one: RawHandle,
    pub handle_two: RawHandle,
    pub equality: HandleEquality,
}
