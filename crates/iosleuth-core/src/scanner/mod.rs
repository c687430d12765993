/// Scanner module — snapshot collection and the user-client probe engine.
///
/// A scan runs in two strictly separated phases:
///
/// 1. **Snapshot** ([`snapshot`]): drain the plane iterator into an owned
///    `Vec` *before* any probing. Opening a connection mutates the
///    registry (the host inserts user-client objects), which invalidates a
///    live iterator, so "iterate-while-probing" is never an option.
/// 2. **Probe** ([`probe`]): for each snapshotted entry and each type code
///    in the requested range, attempt up to two independent connection
///    opens and record the outcome.
///
/// Handle hygiene is ownership-based: entries are released and
/// connections closed when their values drop, so early returns on the
/// fatal allocation path cannot leak. Both probe connections are dropped
/// before the next type code is attempted, bounding the number of
/// simultaneously open connections to two regardless of tree size.
mod creator;

use crate::model::{HandleEquality, OpenDisposition, ProbeResult};
use crate::registry::{Connection, Entry, Registry, Status};
use compact_str::CompactString;
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Initial snapshot capacity; the buffer doubles whenever it fills.
pub const INITIAL_SNAPSHOT_CAPACITY: usize = 1024;

/// Fatal scan failures. Anything recoverable (failed name lookup, denied
/// open) is data, not an error.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Growing the snapshot buffer or the result list failed. Fatal for
    /// the whole run: a partial result set would be misleading.
    #[error("out of memory growing the {what}: {source}")]
    Allocation {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    /// The registry root could not be resolved; nothing can be scanned.
    #[error("failed to resolve the registry root: status {0}")]
    Root(Status),
}

/// Parameters of one scan run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Registry plane to traverse.
    pub plane: String,
    /// Optional class/instance filter: an entry is probed if its class
    /// conforms to the pattern or its instance name equals it exactly.
    pub matcher: Option<String>,
    /// Inclusive type-code range to attempt per entry.
    pub type_min: u32,
    pub type_max: u32,
    /// Drop attempts whose first open did not return a success status.
    pub only_successful: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            plane: "IOService".to_string(),
            matcher: None,
            type_min: 0,
            type_max: 0,
            only_successful: false,
        }
    }
}

/// Collect every entry of `plane` into an owned snapshot, the registry
/// root first. No filtering happens here — filtering needs metadata
/// lookups, which belong with per-entry processing in [`probe`].
pub fn snapshot<R: Registry>(registry: &R, plane: &str) -> Result<Vec<R::Entry>, ScanError> {
    let mut entries: Vec<R::Entry> = Vec::new();
    entries
        .try_reserve(INITIAL_SNAPSHOT_CAPACITY)
        .map_err(|source| ScanError::Allocation {
            what: "snapshot buffer",
            source,
        })?;

    entries.push(registry.root().map_err(ScanError::Root)?);

    match registry.iter_plane(plane, true) {
        Ok(iter) => {
            for entry in iter {
                if entries.len() == entries.capacity() {
                    entries
                        .try_reserve(entries.capacity())
                        .map_err(|source| ScanError::Allocation {
                            what: "snapshot buffer",
                            source,
                        })?;
                }
                entries.push(entry);
            }
        }
        Err(status) => {
            // Still worth probing the root on its own.
            warn!("no iterator for plane {plane}: status {status}");
        }
    }

    debug!("snapshotted {} entries from plane {plane}", entries.len());
    Ok(entries)
}

/// Probe every snapshotted entry, in snapshot order, with every type code
/// in `opts.type_min..=opts.type_max`, and return the ordered result list.
///
/// Per entry: a failed name or class lookup degrades to the empty
/// sentinel and probing continues. The second open is attempted only when
/// the first returned a success status *and* a valid handle — "success
/// with a null handle" is its own reportable state and must not trigger a
/// second attempt.
pub fn probe<R: Registry>(
    registry: &R,
    snapshot: Vec<R::Entry>,
    opts: &ScanOptions,
) -> Result<Vec<ProbeResult>, ScanError> {
    let pid = registry.current_pid();
    let mut results: Vec<ProbeResult> = Vec::new();

    for entry in snapshot {
        let name = entry.name().unwrap_or_default();
        if let Some(pattern) = opts.matcher.as_deref() {
            let matches =
                entry.conforms_to(pattern) || (!name.is_empty() && name == pattern);
            if !matches {
                continue;
            }
        }
        let class = entry.class_name().unwrap_or_default();

        for type_code in opts.type_min..=opts.type_max {
            let (spawn, one) = entry.open(type_code);
            let disposition = OpenDisposition::classify(spawn, one.as_ref());
            let two = match disposition {
                OpenDisposition::Granted => entry.open(type_code).1,
                _ => None,
            };

            if opts.only_successful && !spawn.is_success() {
                continue;
            }

            // The synthesised user client only exists while the
            // connection is open, so look it up before dropping `one`.
            let client_class = match disposition {
                OpenDisposition::Granted => creator::client_class_for(&entry, &opts.plane, pid),
                _ => CompactString::default(),
            };

            if results.len() == results.capacity() {
                results
                    .try_reserve(results.capacity().max(1))
                    .map_err(|source| ScanError::Allocation {
                        what: "result list",
                        source,
                    })?;
            }

            let handle_one = one.as_ref().map_or(0, Connection::raw);
            let handle_two = two.as_ref().map_or(0, Connection::raw);
            results.push(ProbeResult {
                class_name: class.clone(),
                instance_name: name.clone(),
                type_code,
                spawn,
                spawn_message: registry.status_message(spawn),
                client_class,
                handle_one,
                handle_two,
                equality: HandleEquality::classify(handle_one, handle_two),
            });
            // `one` and `two` drop here: both connections are closed
            // before the next type code.
        }
        // `entry` drops here: the handle is released once all of its
        // type codes have been probed.
    }

    Ok(results)
}

/// Snapshot and probe in one call.
pub fn scan<R: Registry>(registry: &R, opts: &ScanOptions) -> Result<Vec<ProbeResult>, ScanError> {
    let entries = snapshot(registry, &opts.plane)?;
    info!("scanning {} entries in plane {}", entries.len(), opts.plane);
    probe(registry, entries, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::fixture::{
        FixtureBuilder, FixtureRegistry, OpenScript, STATUS_NOT_PRIVILEGED,
    };

    /// Root plus a small service subtree; "gate" accepts only type 1.
    fn probe_tree() -> FixtureRegistry {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry").with_pid(42);
        b.register_class("IOService", Some("IORegistryEntry"));
        b.register_class("AppleDisk", Some("IOService"));
        let disk = b.child(b.root(), "disk0", "AppleDisk");
        b.child(disk, "disk0s1", "AppleDisk");
        let gate = b.child(b.root(), "gate", "IOService");
        b.open_script(gate, 1, OpenScript::granted(0x903, 0x907));
        b.build()
    }

    #[test]
    fn snapshot_counts_root_plus_every_reachable_node() {
        let reg = probe_tree();
        let snap = snapshot(&reg, "IOService").unwrap();
        assert_eq!(snap.len(), 4); // root + disk0 + disk0s1 + gate
        drop(snap);

        // Re-traversal of a static tree is idempotent.
        let again = snapshot(&reg, "IOService").unwrap();
        assert_eq!(again.len(), 4);
        drop(again);
        assert_eq!(reg.live_entries(), 0);
    }

    #[test]
    fn results_follow_traversal_order_times_type_code() {
        let reg = probe_tree();
        let opts = ScanOptions {
            type_max: 1,
            ..ScanOptions::default()
        };
        let results = scan(&reg, &opts).unwrap();
        let order: Vec<(String, u32)> = results
            .iter()
            .map(|r| (r.instance_name.to_string(), r.type_code))
            .collect();
        assert_eq!(
            order,
            [
                ("Root".to_string(), 0),
                ("Root".to_string(), 1),
                ("disk0".to_string(), 0),
                ("disk0".to_string(), 1),
                ("disk0s1".to_string(), 0),
                ("disk0s1".to_string(), 1),
                ("gate".to_string(), 0),
                ("gate".to_string(), 1),
            ]
        );
    }

    #[test]
    fn second_open_only_after_success_with_valid_handle() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        let svc = b.child(b.root(), "svc", "IOService");
        // Denied, but the host leaves a stale non-null handle value.
        b.open_script(svc, 0, OpenScript {
            status: STATUS_NOT_PRIVILEGED,
            handles: [0x55, 0x66],
        });
        // Success status with a null first handle; a second attempt
        // would be observable as handle 0x99.
        b.open_script(svc, 1, OpenScript {
            status: Status::SUCCESS,
            handles: [0, 0x99],
        });
        b.open_script(svc, 2, OpenScript::granted(0x7, 0x7));
        let reg = b.build();

        let opts = ScanOptions {
            matcher: Some("svc".to_string()),
            type_max: 2,
            ..ScanOptions::default()
        };
        let results = scan(&reg, &opts).unwrap();
        assert_eq!(results.len(), 3);

        // Denied: first handle recorded verbatim, no second attempt.
        assert_eq!(results[0].handle_one, 0x55);
        assert_eq!(results[0].handle_two, 0);
        assert_eq!(results[0].equality, HandleEquality::NoComparison);

        // Granted-but-empty: success status must not trigger open #2.
        assert!(results[1].spawn.is_success());
        assert_eq!(results[1].handle_one, 0);
        assert_eq!(results[1].handle_two, 0);
        assert_eq!(results[1].equality, HandleEquality::NoComparison);

        // Granted: both attempts made, identical handles.
        assert_eq!(results[2].handle_one, 0x7);
        assert_eq!(results[2].handle_two, 0x7);
        assert_eq!(results[2].equality, HandleEquality::Equal);
    }

    #[test]
    fn only_successful_is_a_pure_filter() {
        let reg = probe_tree();
        let full = scan(
            &reg,
            &ScanOptions {
                type_max: 2,
                ..ScanOptions::default()
            },
        )
        .unwrap();
        let filtered = scan(
            &reg,
            &ScanOptions {
                type_max: 2,
                only_successful: true,
                ..ScanOptions::default()
            },
        )
        .unwrap();

        assert!(filtered.len() <= full.len());
        assert!(filtered.iter().all(|r| r.spawn.is_success()));
        // "gate" only accepts type 1: one retained attempt out of three.
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].instance_name, "gate");
        assert_eq!(filtered[0].type_code, 1);
        assert_eq!(
            full.iter().filter(|r| r.instance_name == "gate").count(),
            3
        );
    }

    #[test]
    fn matcher_accepts_name_or_conforming_class() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        b.register_class("IOService", Some("IORegistryEntry"));
        b.register_class("AppleThing", Some("IOService"));
        b.child(b.root(), "by-name", "IOService");
        b.child(b.root(), "by-class", "AppleThing");
        b.child(b.root(), "neither", "IOService");
        let reg = b.build();

        let results = scan(
            &reg,
            &ScanOptions {
                matcher: Some("by-name".to_string()),
                ..ScanOptions::default()
            },
        )
        .unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.instance_name.as_str()).collect();
        assert_eq!(names, ["by-name"]);

        let results = scan(
            &reg,
            &ScanOptions {
                matcher: Some("AppleThing".to_string()),
                ..ScanOptions::default()
            },
        )
        .unwrap();
        let names: Vec<&str> = results.iter().map(|r| r.instance_name.as_str()).collect();
        assert_eq!(names, ["by-class"]);
    }

    #[test]
    fn failed_lookups_degrade_to_empty_sentinels() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        let broken = b.child(b.root(), "broken", "IOService");
        b.clear_name(broken);
        b.clear_class(broken);
        let reg = b.build();

        let results = scan(&reg, &ScanOptions::default()).unwrap();
        // Both entries are still probed; the broken one carries sentinels.
        assert_eq!(results.len(), 2);
        assert!(results[1].instance_name.is_empty());
        assert!(results[1].class_name.is_empty());
    }

    #[test]
    fn creator_filter_populates_client_class() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry").with_pid(42);
        let svc = b.child(b.root(), "svc", "IOService");
        b.open_script(svc, 0, OpenScript::granted(0x7, 0x9));
        let uc = b.child(svc, "uc", "AppleFakeUserClient");
        b.property(uc, "IOUserClientCreator", "pid 42, ioscan");
        let reg = b.build();

        let results = scan(&reg, &ScanOptions::default()).unwrap();
        let svc_row = results
            .iter()
            .find(|r| r.instance_name == "svc")
            .unwrap();
        assert_eq!(svc_row.client_class, "AppleFakeUserClient");
        assert_eq!(svc_row.equality, HandleEquality::NotEqual);
        // Root (and the uc child) got no handle, so no creator search ran.
        assert!(results[0].client_class.is_empty());
    }

    #[test]
    fn scan_holds_no_handles_afterwards() {
        let reg = probe_tree();
        let results = scan(
            &reg,
            &ScanOptions {
                type_max: 3,
                ..ScanOptions::default()
            },
        )
        .unwrap();
        assert!(!results.is_empty());
        assert_eq!(reg.live_entries(), 0);
        assert_eq!(reg.open_connections(), 0);
    }
}
