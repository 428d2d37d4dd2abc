//! Introspection and debugging tools for netobj traffic.
//!
//! This crate provides utilities for inspecting and understanding captured
//! messages:
//!
//! - Inspect a single message: header, list sections, registry contents
//! - Replay a capture (registry message plus frames) and report every
//!   receiver event and the final mirror state
//!
//! # Design Principles
//!
//! - **First-class tooling** - These tools are part of the product, not afterthoughts.
//! - **Human-readable output** - Make it easy to understand what the codec is doing.
//! - **Capture only** - Nothing beyond the captured bytes is needed to decode them.

mod inspect;
mod replay;

pub use inspect::{
    format_inspect_pretty, inspect_message, HeaderReport, InspectReport, RegistryReport,
    SectionReport,
};
pub use replay::{
    format_replay_pretty, replay_capture, EventReport, FieldReport, FrameReport, ListReport,
    ObjectReport, ReplayReport,
};
