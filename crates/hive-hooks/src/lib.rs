//! Receive hooks installed into every managed bare repository.
//!
//! Each repository carries a `pre-receive` and a `post-receive` script that
//! forward pushes to the server, authenticated with a shared token. This crate
//! renders those scripts and repairs them when they are missing, stale or not
//! executable.

mod config;
mod error;
mod installer;
mod types;

pub use config::HooksConfig;
pub use error::{HookError, Result};
pub use installer::HookInstaller;
pub use types::ReceiveHook;
