/// Class hierarchy walker — resolves a class name's superclass chain.

use crate::registry::Registry;
use compact_str::CompactString;
use std::io::{self, Write};

/// Walk from `class` to the top of the hierarchy. The given name is
/// always the first element, known to the host or not; unknown classes
/// simply have no ancestors.
pub fn class_chain<R: Registry>(registry: &R, class: &str) -> Vec<CompactString> {
    let mut chain = vec![CompactString::new(class)];
    let mut current = CompactString::new(class);
    while let Some(superclass) = registry.superclass_of(&current) {
        chain.push(superclass.clone());
        current = superclass;
    }
    chain
}

/// Print the chain, one class per line, indented one extra space per
/// inheritance level.
pub fn render_chain<W: Write>(chain: &[CompactString], out: &mut W) -> io::Result<()> {
    for (depth, class) in chain.iter().enumerate() {
        writeln!(out, "{:depth$}{class}", "")?;
    }
    Ok(())
}
