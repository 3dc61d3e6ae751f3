// SPDX-License-Identifier: MIT OR Apache-2.0

//! User-space readout for CBM FLES interface boards.
//!
//! The crate drives the readout path of the CRI PCIe card: per-channel scatter-gather DMA into
//! a pair of host ring buffers, a shared memory exchange that hands the buffers to consumer
//! processes, and content validators for the card's built-in pattern generators.
//!
//! A [`Device`](device::Device) is probed over a [`RegisterFile`](registers::RegisterFile)
//! covering BAR 0 and enumerates its [`Channel`](channel::Channel)s. Each channel owns two
//! hardware-filled rings:
//!
//! * the __data buffer__, receiving raw microslice content, and
//! * the __descriptor buffer__, receiving one 32-byte
//!   [`MicrosliceDescriptor`](microslice::MicrosliceDescriptor) per completed microslice.
//!
//! The [`DmaChannel`](dma::DmaChannel) controller programs the card's scatter-gather tables,
//! walks the channel through its configure/enable/disable lifecycle and exchanges ring
//! pointers with the hardware. On top of it, [`shm`] implements a server process that owns the
//! card and serves the buffers to single-consumer channel clients through a POSIX shared
//! memory segment, so content is consumed in place.
//!
//! ## Register access
//!
//! All hardware access goes through the [`RegisterFile`](registers::RegisterFile) trait over
//! 32-bit word addresses. [`BarRegisterFile`](registers::BarRegisterFile) wraps a mapped BAR;
//! [`WindowedRegisterFile`](registers::WindowedRegisterFile) carves out the per-channel
//! windows. Tests run against [`MemRegisterFile`](registers::MemRegisterFile) or the mockall
//! based [`MockRegisterFile`](mocks::MockRegisterFile), which the `test-mocks` feature also
//! exports to downstream crates.
//!
//! ## Validation
//!
//! [`pattern`] hosts the stateful checkers for the card's pattern generator formats. They are
//! the test oracle for the full path: generator, DMA, exchange, consumer.
//!
//! Example usage:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cri_readout::channel::DataSource;
//! use cri_readout::device::Device;
//! use cri_readout::registers::{BarRegisterFile, RegisterFile};
//!
//! # fn main() -> cri_readout::Result<()> {
//! # let bar0_ptr: *mut u32 = unimplemented!();
//! # let bar0_words: usize = unimplemented!();
//! let rf: Arc<dyn RegisterFile> =
//!     Arc::new(unsafe { BarRegisterFile::new_raw(bar0_ptr, bar0_words) });
//!
//! let device = Device::new(rf)?;
//! println!("{:?}", device.device_info()?);
//!
//! let channel = device.channel(0)?;
//! channel.set_data_source(DataSource::Pgen)?;
//! channel.enable_readout()?;
//! # Ok(())
//! # }
//! ```

/* ---------------------------------------------------------------------------------------------- */

pub mod channel;
pub mod device;
pub mod dma;
pub mod error;
pub mod microslice;
pub mod pattern;
pub mod registers;
pub mod ring;
pub mod sg;
pub mod shm;

#[cfg(any(test, feature = "test-mocks"))]
pub mod mocks;

pub use error::{Error, Result};

/* ---------------------------------------------------------------------------------------------- */
