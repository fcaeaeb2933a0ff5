//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod info;
pub(crate) mod monitor;
pub(crate) mod protocol;
pub(crate) mod upload;

use crate::{CliError, was_interrupted};
use anyhow::Result;

/// Fail with a cancellation error once Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".to_string()).into())
    } else {
        Ok(())
    }
}
