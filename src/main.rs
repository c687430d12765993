//! ioscan — walk the IOKit registry and stress-probe user-client spawning.
//!
//! Thin binary entry point. All logic lives in the `iosleuth-core` crate;
//! this file only parses arguments, wires up logging, and picks the
//! registry backend.

use clap::{Arg, ArgAction, Command};
use iosleuth_core::scanner::ScanOptions;
use owo_colors::OwoColorize;

/// Accepts decimal or `0x`-prefixed hex, like the classic tools did.
fn parse_type_code(s: &str) -> Result<u32, String> {
    let t = s.trim();
    let (digits, radix) = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (t, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|e| format!("invalid type code {s:?}: {e}"))
}

fn cli() -> Command {
    Command::new("ioscan")
        .about(
            "Iterate over all registry entries and try to spawn user clients.\n\
             If NAME is given, only entries with matching class or instance name are considered.\n\
             If MIN and MAX are given, all types in between are tried.\n\
             If only MIN is given, only that type is tried, otherwise it defaults to type 0.",
        )
        .arg(
            Arg::new("plane")
                .short('p')
                .value_name("PLANE")
                .default_value("IOService")
                .help("Iterate over the given registry plane"),
        )
        .arg(
            Arg::new("only-successful")
                .short('s')
                .action(ArgAction::SetTrue)
                .help("Print only successful spawning attempts"),
        )
        .arg(
            Arg::new("name")
                .value_name("NAME")
                .help("Class or instance name to match"),
        )
        .arg(
            Arg::new("min")
                .value_name("MIN")
                .value_parser(parse_type_code)
                .help("First connection type to try (decimal or 0x-prefixed hex)"),
        )
        .arg(
            Arg::new("max")
                .value_name("MAX")
                .value_parser(parse_type_code)
                .help("Last connection type to try (defaults to MIN)"),
        )
}

#[cfg(target_os = "macos")]
fn run(opts: &ScanOptions) -> anyhow::Result<()> {
    use iosleuth_core::platform::IoKitRegistry;
    use iosleuth_core::{report, scanner};
    use std::io::Write;

    let registry = IoKitRegistry::new();
    let results = scanner::scan(&registry, opts)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    report::render(&results, &mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run(_opts: &ScanOptions) -> anyhow::Result<()> {
    anyhow::bail!("the IOKit registry backend is only available on macOS")
}

fn main() {
    // Structured logging goes to stderr so the table owns stdout.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let min = matches.get_one::<u32>("min").copied();
    let max = matches.get_one::<u32>("max").copied();
    let opts = ScanOptions {
        plane: matches
            .get_one::<String>("plane")
            .cloned()
            .unwrap_or_default(),
        matcher: matches.get_one::<String>("name").cloned(),
        type_min: min.unwrap_or(0),
        type_max: max.or(min).unwrap_or(0),
        only_successful: matches.get_flag("only-successful"),
    };

    if let Err(err) = run(&opts) {
        eprintln!("{}", format!("ioscan: {err:#}").bright_red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_parse_in_decimal_and_hex() {
        assert_eq!(parse_type_code("0"), Ok(0));
        assert_eq!(parse_type_code("42"), Ok(42));
        assert_eq!(parse_type_code("0x10"), Ok(16));
        assert_eq!(parse_type_code("0XfF"), Ok(255));
        assert!(parse_type_code("nope").is_err());
        assert!(parse_type_code("-1").is_err());
    }

    #[test]
    fn range_arguments_follow_the_min_max_defaults() {
        let m = cli().get_matches_from(["ioscan", "AppleDisk", "3"]);
        let min = m.get_one::<u32>("min").copied();
        let max = m.get_one::<u32>("max").copied();
        assert_eq!(min, Some(3));
        // A single value means min == max.
        assert_eq!(max.or(min), Some(3));

        let m = cli().get_matches_from(["ioscan", "-s", "-p", "IOUSB", "X", "1", "0x8"]);
        assert_eq!(m.get_one::<String>("plane").unwrap(), "IOUSB");
        assert!(m.get_flag("only-successful"));
        assert_eq!(m.get_one::<u32>("max").copied(), Some(8));
    }
}
