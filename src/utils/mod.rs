//! Generic utility primitives with zero pipeline knowledge.
//!
//! - `artifact` - Glob expansion for artifact paths
//! - `command` - Captured process output
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell quoting and shell-line invocation

pub mod artifact;
pub mod command;
pub mod io;
pub mod shell;
