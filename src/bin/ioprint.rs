//! ioprint — walk the IOKit registry and print matching entries,
//! optionally dumping their properties or probing whether they accept a
//! property set.

use clap::{Arg, ArgAction, Command};
use iosleuth_core::inspect::{InspectOptions, SetProbe};
use owo_colors::OwoColorize;

fn cli() -> Command {
    Command::new("ioprint")
        .about(
            "Iterate over all registry entries and optionally perform some operations.\n\
             If NAME is given, only entries with matching class or instance name are considered.",
        )
        .arg(
            Arg::new("dump")
                .short('d')
                .action(ArgAction::SetTrue)
                .help("Dump (print) the entries' properties"),
        )
        .arg(
            Arg::new("plane")
                .short('p')
                .value_name("PLANE")
                .default_value("IOService")
                .help("Iterate over the given registry plane"),
        )
        .arg(
            Arg::new("set")
                .short('s')
                .action(ArgAction::SetTrue)
                .help("Try to set a no-op property on the entries"),
        )
        .arg(
            Arg::new("name")
                .value_name("NAME")
                .help("Class or instance name to match"),
        )
}

#[cfg(target_os = "macos")]
fn run(opts: &InspectOptions) -> anyhow::Result<()> {
    use iosleuth_core::inspect;
    use iosleuth_core::platform::IoKitRegistry;
    use std::io::Write;

    let registry = IoKitRegistry::new();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    inspect::print_entries(&registry, opts, &mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run(_opts: &InspectOptions) -> anyhow::Result<()> {
    anyhow::bail!("the IOKit registry backend is only available on macOS")
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let opts = InspectOptions {
        plane: matches
            .get_one::<String>("plane")
            .cloned()
            .unwrap_or_default(),
        matcher: matches.get_one::<String>("name").cloned(),
        dump: matches.get_flag("dump"),
        // Built once, up front; the probe payload is fixed for the run.
        set_probe: matches.get_flag("set").then(SetProbe::no_op),
    };

    if let Err(err) = run(&opts) {
        eprintln!("{}", format!("ioprint: {err:#}").bright_red().bold());
        std::process::exit(1);
    }
}
