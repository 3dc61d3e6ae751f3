// SPDX-License-Identifier: MIT OR Apache-2.0

/* ---------------------------------------------------------------------------------------------- */

use std::io;

use thiserror::Error;

/* ---------------------------------------------------------------------------------------------- */

/// Errors raised by the readout path.
///
/// Register-level primitives return [`io::Result`] directly; everything above them returns
/// [`Result`] and propagates through this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid caller-supplied configuration: misaligned pointer, bad buffer size, bad transfer
    /// unit. No hardware state has been changed.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A scatter-gather list does not fit into the hardware descriptor table. No partial table
    /// has been written.
    #[error("scatter-gather list has {entries} entries, hardware table holds {capacity}")]
    CapacityExceeded { entries: usize, capacity: usize },

    /// Residual enable bits were found in the DMA control register before first use. A previous
    /// owner of the channel did not shut down cleanly; the device needs an external reset.
    #[error("DMA engine already enabled, previous owner did not shut down cleanly")]
    AlreadyActive,

    /// A bounded wait elapsed. For channel teardown this is reported after teardown has
    /// completed anyway.
    #[error("timed out after {polls} polling iterations")]
    Timeout { polls: usize },

    /// A client violated the exchange protocol, e.g. posted a request while a previous one of
    /// the same kind was still unserviced. This is a programming error, not a runtime condition
    /// to recover from.
    #[error("shared-memory protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/* ---------------------------------------------------------------------------------------------- */
