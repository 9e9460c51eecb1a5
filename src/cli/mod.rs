//! Command-line interface module.

mod args;
pub mod compile;
pub mod index;
pub mod watch;

pub use args::{Cli, Commands};
