// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared memory exchange between the device server and per-channel consumers.
//!
//! The server process owns the hardware; consumers attach to a named POSIX shared memory
//! segment that holds the exchange structures and the DMA buffers themselves, so microslice
//! content crosses no process boundary. Consumers post free-running read indices to release
//! buffer space; the server applies them to the card and publishes the hardware's write
//! indices back. One request per channel may be in flight at a time.
//!
//! See [`exchange`] for the segment layout and index semantics, [`server`] and [`client`] for
//! the two sides of the protocol.

/* ---------------------------------------------------------------------------------------------- */

pub mod client;
pub mod exchange;
pub mod segment;
pub mod server;
pub mod sync;

pub use client::{ChannelClient, DeviceClient, WriteIndexUpdate};
pub use exchange::{DualIndex, SegmentLayout};
pub use segment::ShmSegment;
pub use server::{ChannelBuffers, DeviceServer, ServerConfig};

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
pub(crate) fn test_name(tag: &str) -> String {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "cri-test-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/* ---------------------------------------------------------------------------------------------- */
