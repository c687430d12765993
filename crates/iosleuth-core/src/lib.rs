/// IOSleuth Core — registry walking, user-client probing, and reporting.
///
/// This crate contains all business logic with zero CLI dependencies.
/// Everything is written against the registry trait seam so the same
/// engine runs against the real IOKit registry and the in-memory test
/// fixture.
///
/// # Modules
///
/// - [`registry`] — the `Registry`/`Entry`/`Connection` seam and the
///   scripted in-memory fixture backend.
/// - [`model`] — probe result records and outcome classifications.
/// - [`scanner`] — snapshot collection and the user-client probe engine.
/// - [`report`] — the dynamically column-sized table renderer.
/// - [`inspect`] — entry printing, property dumping, set-property probing.
/// - [`hierarchy`] — class superclass-chain resolution.
/// - [`platform`] — the IOKit backend (macOS only).
pub mod hierarchy;
pub mod inspect;
pub mod model;
pub mod platform;
pub mod registry;
pub mod report;
pub mod scanner;
