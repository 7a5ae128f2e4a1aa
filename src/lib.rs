// This is free and unencumbered software released into the public domain.

#[macro_use]
mod macros;

pub mod cli;
pub mod shared;

#[cfg(all(feature = "avf", target_os = "ios"))]
pub mod ffi;
