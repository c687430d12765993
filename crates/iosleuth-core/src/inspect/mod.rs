/// Entry inspector — walk the registry and print matching entries,
/// optionally dumping their property tables or probing whether they
/// accept a property set.
///
/// Unlike the scanner, inspection opens no connections, so the host never
/// mutates the tree underneath us and the live plane iterator stays
/// valid; no snapshot phase is needed here.
use crate::registry::{Entry, Registry, Status};
use compact_str::CompactString;
use owo_colors::OwoColorize;
use std::io::{self, Write};
use thiserror::Error;
use tracing::warn;

/// The fixed key/value pair used for the set-property probe.
///
/// Constructed once by the caller and passed in explicitly. The payload
/// is deliberately meaningless: the point is whether the entry *accepts*
/// a set at all, never what is written.
#[derive(Debug, Clone)]
pub struct SetProbe {
    pub key: String,
    pub value: String,
}

impl SetProbe {
    /// The conventional no-op payload.
    pub fn no_op() -> Self {
        SetProbe {
            key: "herp".to_string(),
            value: "derp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    /// Registry plane to traverse.
    pub plane: String,
    /// Same match rule as the scanner: conforms-to class or exact
    /// instance name.
    pub matcher: Option<String>,
    /// Dump each matching entry's property table.
    pub dump: bool,
    /// Attempt the set-property probe on each matching entry.
    pub set_probe: Option<SetProbe>,
}

/// Inspection failures. Metadata lookups are fatal here — unlike the
/// scanner there is no table to degrade into, and a half-printed entry
/// line is worse than stopping.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to resolve the registry root: status {0}")]
    Root(Status),

    #[error("name lookup failed: status {0}")]
    Name(Status),

    #[error("class lookup failed for {name}: status {status}")]
    Class { name: CompactString, status: Status },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Walk the root plus every entry of `opts.plane` and print the matching
/// ones as `Class(Name)`, with dump or set-probe output as requested.
pub fn print_entries<R: Registry, W: Write>(
    registry: &R,
    opts: &InspectOptions,
    out: &mut W,
) -> Result<(), InspectError> {
    let root = registry.root().map_err(InspectError::Root)?;
    print_entry(registry, &root, opts, out)?;
    drop(root);

    match registry.iter_plane(&opts.plane, true) {
        Ok(iter) => {
            for entry in iter {
                print_entry(registry, &entry, opts, out)?;
            }
        }
        Err(status) => warn!("no iterator for plane {}: status {status}", opts.plane),
    }
    Ok(())
}

fn print_entry<R: Registry, W: Write>(
    registry: &R,
    entry: &R::Entry,
    opts: &InspectOptions,
    out: &mut W,
) -> Result<(), InspectError> {
    let name = entry.name().map_err(InspectError::Name)?;
    if let Some(pattern) = opts.matcher.as_deref() {
        if !entry.conforms_to(pattern) && name != pattern {
            return Ok(());
        }
    }
    let class = entry
        .class_name()
        .map_err(|status| InspectError::Class {
            name: name.clone(),
            status,
        })?;

    let label = format!("{class}({name})");

    if let Some(probe) = &opts.set_probe {
        let status = entry.set_string_property(&probe.key, &probe.value);
        writeln!(
            out,
            "{} {}",
            format!("{label}:").bright_cyan().bold(),
            colored_status(registry, status),
        )?;
    } else if opts.dump {
        let (status, text) = match entry.properties_text() {
            Ok(text) => (Status::SUCCESS, Some(text)),
            Err(status) => (status, None),
        };
        writeln!(
            out,
            "{} {}",
            format!("{label}:").bright_cyan().bold(),
            colored_status(registry, status),
        )?;
        if let Some(text) = text {
            write!(out, "{text}")?;
        }
    } else {
        writeln!(out, "{}", label.bright_cyan().bold())?;
    }
    Ok(())
}

fn colored_status<R: Registry>(registry: &R, status: Status) -> String {
    let message = registry.status_message(status);
    if status.is_success() {
        format!("{}", message.bright_green().bold())
    } else {
        format!("{}", message.bright_yellow().bold())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::fixture::{FixtureBuilder, STATUS_NOT_PRIVILEGED};

    fn strip_ansi(s: &str) -> String {
        let mut out = String::new();
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c == '\x1b' {
                for d in chars.by_ref() {
                    if d == 'm' {
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    fn print_to_string(
        reg: &crate::registry::fixture::FixtureRegistry,
        opts: &InspectOptions,
    ) -> Vec<String> {
        let mut buf = Vec::new();
        print_entries(reg, opts, &mut buf).unwrap();
        String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(strip_ansi)
            .collect()
    }

    #[test]
    fn prints_class_and_name_for_each_entry() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        b.child(b.root(), "disk0", "AppleDisk");
        let reg = b.build();

        let opts = InspectOptions {
            plane: "IOService".to_string(),
            ..InspectOptions::default()
        };
        let lines = print_to_string(&reg, &opts);
        assert_eq!(lines, ["IORegistryEntry(Root)", "AppleDisk(disk0)"]);
    }

    #[test]
    fn matcher_limits_output() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        b.child(b.root(), "disk0", "AppleDisk");
        b.child(b.root(), "pmu", "ApplePMU");
        let reg = b.build();

        let opts = InspectOptions {
            plane: "IOService".to_string(),
            matcher: Some("pmu".to_string()),
            ..InspectOptions::default()
        };
        let lines = print_to_string(&reg, &opts);
        assert_eq!(lines, ["ApplePMU(pmu)"]);
    }

    #[test]
    fn dump_appends_property_lines() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        let disk = b.child(b.root(), "disk0", "AppleDisk");
        b.property(disk, "BSD Name", "disk0");
        b.property(disk, "Leaf", "false");
        let reg = b.build();

        let opts = InspectOptions {
            plane: "IOService".to_string(),
            matcher: Some("disk0".to_string()),
            dump: true,
            ..InspectOptions::default()
        };
        let lines = print_to_string(&reg, &opts);
        assert_eq!(
            lines,
            [
                "AppleDisk(disk0): successful",
                "BSD Name = disk0",
                "Leaf = false",
            ]
        );
    }

    #[test]
    fn set_probe_reports_acceptance_per_entry() {
        let mut b = FixtureBuilder::new("Root", "IORegistryEntry");
        let open = b.child(b.root(), "open", "AppleDisk");
        let locked = b.child(b.root(), "locked", "AppleDisk");
        b.set_status(locked, STATUS_NOT_PRIVILEGED);
        let _ = open;
        let reg = b.build();

        let opts = InspectOptions {
            plane: "IOService".to_string(),
            matcher: Some("AppleDisk".to_string()),
            set_probe: Some(SetProbe::no_op()),
            ..InspectOptions::default()
        };
        let lines = print_to_string(&reg, &opts);
        assert_eq!(
            lines,
            [
                "AppleDisk(open): successful",
                "AppleDisk(locked): (iokit/common) not privileged",
            ]
        );
    }
}
