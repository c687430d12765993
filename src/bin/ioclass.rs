//! ioclass — print an IOKit class's superclass chain, one class per
//! line, indented one space per inheritance level.

use clap::{Arg, Command};
use owo_colors::OwoColorize;

fn cli() -> Command {
    Command::new("ioclass")
        .about("Print the given class and all of its superclasses")
        .arg(
            Arg::new("class")
                .value_name("CLASS")
                .required(true)
                .help("Class name to resolve"),
        )
}

#[cfg(target_os = "macos")]
fn run(class: &str) -> anyhow::Result<()> {
    use iosleuth_core::hierarchy;
    use iosleuth_core::platform::IoKitRegistry;
    use std::io::Write;

    let registry = IoKitRegistry::new();
    let chain = hierarchy::class_chain(&registry, class);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    hierarchy::render_chain(&chain, &mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn run(_class: &str) -> anyhow::Result<()> {
    anyhow::bail!("the IOKit registry backend is only available on macOS")
}

fn main() {
    let matches = cli().get_matches();
    let class = matches
        .get_one::<String>("class")
        .expect("CLASS is required");

    if let Err(err) = run(class) {
        eprintln!("{}", format!("ioclass: {err:#}").bright_red().bold());
        std::process::exit(1);
    }
}
