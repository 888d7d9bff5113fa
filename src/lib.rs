//! nospawn: process-creation denial for sandboxed programs
//!
//! The `nospawn-preload` library overrides fork, exec and spawn primitives so
//! that any call prints `"<operation> not allowed"` and terminates the caller.
//! This crate holds the shared pieces: the registry of blocked operations, the
//! fatal denial path, and a launcher that runs programs with the library
//! preloaded.
//!
//! The launcher and its dependencies sit behind the default `launcher`
//! feature; the preload library builds against `default-features = false`.

pub mod deny;
pub mod error;
#[cfg(feature = "launcher")]
pub mod launcher;
pub mod registry;
#[cfg(feature = "launcher")]
pub mod types;

pub use deny::deny;
pub use error::{NospawnError, Result};
#[cfg(feature = "launcher")]
pub use launcher::Launcher;
pub use registry::{BlockedOperation, Family, DENIED_EXIT_CODE};
#[cfg(feature = "launcher")]
pub use types::{LaunchConfig, LaunchReport, LaunchStatus};
