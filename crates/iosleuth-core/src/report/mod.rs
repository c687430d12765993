/// Report renderer — dynamically column-sized probe table.
///
/// Two passes, because column widths depend on the whole result set: the
/// first pass measures every field's display width, the second prints the
/// header and one row per result in original order. Rendering never
/// reorders or filters — all filtering happened in the probe engine.
///
/// Color escapes are emitted unconditionally (no TTY detection), matching
/// the rest of the toolkit: header cyan, failed lookups red, type codes
/// purple, open status green/yellow for success/failure, creator class
/// blue.
use crate::model::ProbeResult;
use owo_colors::OwoColorize;
use std::io;

const HDR_CLASS: &str = "Class";
const HDR_NAME: &str = "Name";
const HDR_TYPE: &str = "Type";
const HDR_SPAWN: &str = "Spawn";
const HDR_UC: &str = "UC";
const HDR_ONE: &str = "One";
const HDR_TWO: &str = "Two";
const HDR_EQUAL: &str = "Equal";

/// Fallback text for a failed name or class lookup. Its length counts
/// toward the column width like any other value.
const LOOKUP_FAILED: &str = "failed";

/// Number of decimal digits in `v`; 0 has width 1.
fn decimal_width(mut v: u32) -> usize {
    let mut w = 1;
    while v >= 10 {
        v /= 10;
        w += 1;
    }
    w
}

/// Number of hex digits in `v`; 0 has width 1.
fn hex_width(v: u64) -> usize {
    if v == 0 {
        1
    } else {
        (64 - v.leading_zeros() as usize).div_ceil(4)
    }
}

struct Widths {
    class: usize,
    name: usize,
    type_code: usize,
    spawn: usize,
    uc: usize,
    one: usize,
    two: usize,
    equal: usize,
}

impl Widths {
    /// Pass 1: every column is at least as wide as its header label and
    /// as its widest row value.
    fn measure(results: &[ProbeResult]) -> Widths {
        let mut w = Widths {
            class: HDR_CLASS.len(),
            name: HDR_NAME.len(),
            type_code: HDR_TYPE.len(),
            spawn: HDR_SPAWN.len(),
            uc: HDR_UC.len(),
            one: HDR_ONE.len(),
            two: HDR_TWO.len(),
            equal: HDR_EQUAL.len(),
        };
        for r in results {
            w.class = w.class.max(display_or_failed(&r.class_name).len());
            w.name = w.name.max(display_or_failed(&r.instance_name).len());
            w.type_code = w.type_code.max(decimal_width(r.type_code));
            w.spawn = w.spawn.max(r.spawn_message.len());
            w.uc = w.uc.max(r.client_class.len());
            w.one = w.one.max(hex_width(r.handle_one));
            w.two = w.two.max(hex_width(r.handle_two));
        }
        w
    }
}

fn display_or_failed(s: &str) -> &str {
    if s.is_empty() {
        LOOKUP_FAILED
    } else {
        s
    }
}

/// Pass 2: print the header and every row, in result order.
pub fn render<W: io::Write>(results: &[ProbeResult], out: &mut W) -> io::Result<()> {
    let w = Widths::measure(results);

    let header = format!(
        "{:<cw$} {:<nw$} {:>tw$} {:<sw$} {:<uw$} {:>ow$} {:>w2$} {:<ew$}",
        HDR_CLASS,
        HDR_NAME,
        HDR_TYPE,
        HDR_SPAWN,
        HDR_UC,
        HDR_ONE,
        HDR_TWO,
        HDR_EQUAL,
        cw = w.class,
        nw = w.name,
        tw = w.type_code,
        sw = w.spawn,
        uw = w.uc,
        ow = w.one,
        w2 = w.two,
        ew = w.equal,
    );
    writeln!(out, "{}", header.bright_cyan().bold())?;

    for r in results {
        let class = format!("{:<cw$}", display_or_failed(&r.class_name), cw = w.class);
        if r.class_name.is_empty() {
            write!(out, "{} ", class.bright_red().bold())?;
        } else {
            write!(out, "{class} ")?;
        }

        let name = format!("{:<nw$}", display_or_failed(&r.instance_name), nw = w.name);
        if r.instance_name.is_empty() {
            write!(out, "{} ", name.bright_red().bold())?;
        } else {
            write!(out, "{name} ")?;
        }

        let type_code = format!("{:>tw$}", r.type_code, tw = w.type_code);
        write!(out, "{} ", type_code.bright_magenta().bold())?;

        let spawn = format!("{:<sw$}", r.spawn_message, sw = w.spawn);
        if r.spawn.is_success() {
            write!(out, "{} ", spawn.bright_green().bold())?;
        } else {
            write!(out, "{} ", spawn.bright_yellow().bold())?;
        }

        let uc = format!("{:<uw$}", r.client_class, uw = w.uc);
        write!(out, "{} ", uc.bright_blue().bold())?;

        writeln!(
            out,
            "{:>ow$x} {:>tw$x} {:<ew$}",
            r.handle_one,
            r.handle_two,
            r.equality.label(),
            ow = w.one,
            tw = w.two,
            ew = w.equal,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HandleEquality;
    use crate::registry::Status;
    use compact_str::CompactString;

    fn result(
        class: &str,
        name: &str,
        type_code: u32,
        spawn: Status,
        spawn_message: &str,
        client_class: &str,
        one: u64,
        two: u64,
    ) -> ProbeResult {
        ProbeResult {
            class_name: CompactString::new(class),
            instance_name: CompactString::new(name),
            type_code,
            spawn,
            spawn_message: spawn_message.to_string(),
            client_class: CompactString::new(client_class),
            handle_one: one,
            handle_two: two,
            equality: HandleEquality::classify(one, two),
        }
    }

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

    fn rendered_lines(results: &[ProbeResult]) -> Vec<String> {
        let mut buf = Vec::new();
        render(results, &mut buf).unwrap();
        String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(strip_ansi)
            .collect()
    }

    #[test]
    fn numeric_widths() {
        assert_eq!(decimal_width(0), 1);
        assert_eq!(decimal_width(9), 1);
        assert_eq!(decimal_width(10), 2);
        assert_eq!(decimal_width(4_294_967_295), 10);
        assert_eq!(hex_width(0), 1);
        assert_eq!(hex_width(0xf), 1);
        assert_eq!(hex_width(0x10), 2);
        assert_eq!(hex_width(0xdead_beef), 8);
        assert_eq!(hex_width(u64::MAX), 16);
    }

    #[test]
    fn root_scenario_row() {
        let rows = vec![result(
            "Root",
            "Root",
            0,
            Status::SUCCESS,
            "successful",
            "",
            0x7,
            0x7,
        )];
        let lines = rendered_lines(&rows);
        assert_eq!(lines.len(), 2);
        let cells: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(cells, ["Root", "Root", "0", "successful", "7", "7", "=="]);
    }

    #[test]
    fn columns_are_at_least_header_and_value_wide() {
        let rows = vec![
            result(
                "AppleVeryLongDriverClassName",
                "",
                1000,
                Status(0x2c7),
                "(iokit/common) unsupported function",
                "AppleFakeUserClient",
                0x1234_5678,
                0,
            ),
            result("X", "y", 0, Status::SUCCESS, "successful", "", 0x7, 0x8),
        ];
        let lines = rendered_lines(&rows);
        assert!(lines[0].starts_with("Class"));

        // Class column accommodates the longest class name (28 chars);
        // the Name column accommodates the "failed" fallback (6 chars),
        // so the Type column starts at 28 + 1 + 6 + 1 = 36.
        assert!(lines[1].starts_with("AppleVeryLongDriverClassName failed 1000"));
        assert_eq!(lines[1].find("1000"), Some(36));

        // The short row is padded out to the same columns.
        assert_eq!(lines[2].find('y'), Some(29));

        // Every line spans the same overall width.
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }

    #[test]
    fn failure_fields_render_failed_fallback() {
        let rows = vec![result(
            "",
            "",
            2,
            Status(0x2bc),
            "(iokit/common) general error",
            "",
            0,
            0,
        )];
        let lines = rendered_lines(&rows);
        let cells: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(
            cells,
            ["failed", "failed", "2", "(iokit/common)", "general", "error", "0", "0"]
        );
    }

    #[test]
    fn handles_render_in_hex() {
        let rows = vec![result(
            "C",
            "n",
            0,
            Status::SUCCESS,
            "successful",
            "",
            0xdead,
            0xbeef,
        )];
        let lines = rendered_lines(&rows);
        assert!(lines[1].contains("dead"));
        assert!(lines[1].contains("beef"));
        assert!(lines[1].trim_end().ends_with("!="));
    }

    #[test]
    fn empty_result_set_prints_header_only() {
        let lines = rendered_lines(&[]);
        assert_eq!(lines.len(), 1);
        let cells: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(
            cells,
            ["Class", "Name", "Type", "Spawn", "UC", "One", "Two", "Equal"]
        );
    }
}
