//! Ready-made readers and writers.

/// In-memory list reader and writer.
pub mod list;

#[cfg(feature = "logger")]
/// An item writer that logs every item it receives.
pub mod logger;
