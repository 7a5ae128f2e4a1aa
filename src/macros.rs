// This is free and unencumbered software released into the public domain.

//! Diagnostics macros.
//!
//! Call sites log unconditionally; the `tracing` feature decides whether the
//! events reach `asimov_module::tracing` or compile away.

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($arg:tt)*) => { asimov_module::tracing::trace!(target: "asimov_depth_sync", $($arg)*) };
}

#[cfg(feature = "tracing")]
macro_rules! debug {
    ($($arg:tt)*) => { asimov_module::tracing::debug!(target: "asimov_depth_sync", $($arg)*) };
}

#[cfg(feature = "tracing")]
macro_rules! info {
    ($($arg:tt)*) => { asimov_module::tracing::info!(target: "asimov_depth_sync", $($arg)*) };
}

#[cfg(feature = "tracing")]
macro_rules! warn {
    ($($arg:tt)*) => { asimov_module::tracing::warn!(target: "asimov_depth_sync", $($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
macro_rules! info {
    ($($arg:tt)*) => {{}};
}

#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}
