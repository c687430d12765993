/// Client-creator filter.
///
/// When a connection open grants a real handle, the host synthesises a
/// user-client object as a child of the probed entry and tags it with a
/// short string naming the creating process. This module finds the child
/// created by *our* process and recovers its class name.
use crate::registry::Entry;
use compact_str::CompactString;

/// Property key the host uses to tag a user client with its creator.
pub(crate) const CREATOR_PROPERTY: &str = "IOUserClientCreator";

/// Extract the process id from a creator tag of the form
/// `"pid 1234, processname"`.
pub(crate) fn parse_creator_pid(tag: &str) -> Option<u32> {
    let rest = tag.strip_prefix("pid")?.trim_start();
    let digits = &rest[..rest.chars().take_while(|c| c.is_ascii_digit()).count()];
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Search `entry`'s direct children in `plane` for a user client created
/// by `pid` and return its class name. First match wins — a user client
/// belongs to exactly one creator. Returns an empty string when nothing
/// matches or the child iterator is unavailable; neither is an error.
pub(crate) fn client_class_for<E: Entry>(entry: &E, plane: &str, pid: u32) -> CompactString {
    let children = match entry.children(plane) {
        Ok(it) => it,
        Err(_) => return CompactString::default(),
    };
    for child in children {
        if let Some(tag) = child.string_property(CREATOR_PROPERTY) {
            if parse_creator_pid(&tag) == Some(pid) {
                // Class resolution may still fail; the cell stays empty then.
                return child.class_name().unwrap_or_default();
            }
        }
    }
    CompactString::default()
}
