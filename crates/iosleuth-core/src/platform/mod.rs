/// Platform backends for the registry seam.
///
/// Only the IOKit backend exists today, and only on macOS; every other
/// platform still builds the engine, the renderer, and the fixture.

#[cfg(target_os = "macos")]
pub mod iokit;

#[cfg(target_os = "macos")]
pub use iokit::IoKitRegistry;
