// SPDX-License-Identifier: MIT OR Apache-2.0

//! The consuming side of the exchange: attaches to a server's segment and reads microslices.

/* ---------------------------------------------------------------------------------------------- */

use std::mem::size_of;
use std::sync::Arc;
use std::time::Duration;

use log::debug;

use crate::dma::DESC_ENTRY_SIZE;
use crate::error::{Error, Result};
use crate::microslice::MicrosliceDescriptor;
use crate::ring::RingBufferView;
use crate::shm::exchange::{
    ChannelExchange, DeviceExchange, DualIndex, SegmentLayout, EXCHANGE_MAGIC,
};
use crate::shm::segment::ShmSegment;

/* ---------------------------------------------------------------------------------------------- */

/// An attached exchange segment. Channel clients keep it alive through an [`Arc`].
#[derive(Debug)]
pub struct DeviceClient {
    segment: ShmSegment,
}

impl DeviceClient {
    /// Attach to a server's segment and verify that it speaks this protocol.
    pub fn attach(shm_name: &str) -> Result<DeviceClient> {
        let segment = ShmSegment::open(shm_name)?;
        if segment.len() < size_of::<DeviceExchange>() {
            return Err(Error::Protocol(format!(
                "segment {} too small for an exchange header",
                shm_name
            )));
        }

        let client = DeviceClient { segment };
        let dev = client.exchange();
        if dev.magic() != EXCHANGE_MAGIC {
            return Err(Error::Protocol(format!(
                "segment {} carries magic {:#010x}, expected {:#010x}",
                shm_name,
                dev.magic(),
                EXCHANGE_MAGIC
            )));
        }
        if client.segment.len() < SegmentLayout::exchange_offset(dev.num_channels() as usize) {
            return Err(Error::Protocol(format!(
                "segment {} too small for {} channel entries",
                shm_name,
                dev.num_channels()
            )));
        }

        debug!(
            "attached to exchange {} with {} channels",
            shm_name,
            dev.num_channels()
        );
        Ok(client)
    }

    pub fn num_channels(&self) -> u32 {
        self.exchange().num_channels()
    }

    fn exchange(&self) -> &DeviceExchange {
        unsafe { &*(self.segment.as_ptr() as *const DeviceExchange) }
    }

    fn channel_exchange(&self, index: usize) -> Result<&ChannelExchange> {
        if index >= self.num_channels() as usize {
            return Err(Error::Protocol(format!(
                "channel index {} out of range, exchange has {} channels",
                index,
                self.num_channels()
            )));
        }
        let ptr = self.segment.at_offset(SegmentLayout::exchange_offset(index))?;
        Ok(unsafe { &*(ptr as *const ChannelExchange) })
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// The write index a client observed, together with the end-of-stream flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WriteIndexUpdate {
    pub index: DualIndex,
    pub generation: u64,
    pub eof: bool,
}

/// The single consumer of one channel. Connects on construction, disconnects on drop.
#[derive(Debug)]
pub struct ChannelClient {
    device: Arc<DeviceClient>,
    index: usize,
    exchange: *const ChannelExchange,
    data_view: RingBufferView<u8>,
    desc_view: RingBufferView<MicrosliceDescriptor>,
}

// The exchange pointer targets the segment kept alive by the Arc.
unsafe impl Send for ChannelClient {}

impl ChannelClient {
    /// Connect to channel `index`. Fails if another client is already connected.
    pub fn connect(device: &Arc<DeviceClient>, index: usize) -> Result<ChannelClient> {
        let exchange = device.channel_exchange(index)?;
        let layout = exchange.layout();

        let data_end = layout
            .data_buffer_offset
            .saturating_add(1 << layout.data_buffer_size_exp);
        let desc_end = layout
            .desc_buffer_offset
            .saturating_add(1 << layout.desc_buffer_size_exp);
        if data_end > device.segment.len() as u64 || desc_end > device.segment.len() as u64 {
            return Err(Error::Protocol(format!(
                "channel {} buffers exceed the segment mapping",
                index
            )));
        }

        {
            let mut guard = device.exchange().mutex.lock();
            exchange.connect(&mut guard)?;
        }

        let data_view = unsafe {
            RingBufferView::new(
                device.segment.at_offset(layout.data_buffer_offset as usize)?,
                layout.data_buffer_size_exp,
            )
        };
        let desc_view = unsafe {
            RingBufferView::new(
                device.segment.at_offset(layout.desc_buffer_offset as usize)?
                    as *const MicrosliceDescriptor,
                layout.desc_buffer_size_exp - DESC_ENTRY_SIZE.trailing_zeros(),
            )
        };

        debug!("connected to exchange channel {}", index);
        Ok(ChannelClient {
            device: device.clone(),
            index,
            exchange: exchange as *const ChannelExchange,
            data_view,
            desc_view,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn exchange(&self) -> &ChannelExchange {
        unsafe { &*self.exchange }
    }

    /// Post the consumer's read index, releasing everything before it for reuse by the
    /// hardware. At most one post may be in flight; a second one before the server takes the
    /// first fails with [`Error::Protocol`].
    pub fn set_read_index(&self, index: DualIndex) -> Result<()> {
        {
            let mut guard = self.device.exchange().mutex.lock();
            self.exchange().post_read_index(&mut guard, index)?;
        }
        self.device.exchange().cond_req.notify_one();
        Ok(())
    }

    /// Ask the server to fetch a fresh write index from the hardware and wait for its
    /// publication. Returns `None` if the server does not respond within `timeout`; fails with
    /// [`Error::Protocol`] if a previous request of the same kind is still unserviced.
    pub fn get_write_index(&self, timeout: Duration) -> Result<Option<WriteIndexUpdate>> {
        let seen_generation = {
            let mut guard = self.device.exchange().mutex.lock();
            self.exchange().post_write_request(&mut guard)?;
            self.exchange().write_index(&guard).1
        };
        self.device.exchange().cond_req.notify_one();
        Ok(self.wait_write_index(seen_generation, timeout))
    }

    /// The most recently published write index.
    pub fn write_index(&self) -> WriteIndexUpdate {
        let guard = self.device.exchange().mutex.lock();
        let (index, generation) = self.exchange().write_index(&guard);
        WriteIndexUpdate {
            index,
            generation,
            eof: self.exchange().eof(&guard),
        }
    }

    /// Wait for a write index newer than `seen_generation`. Returns `None` if nothing newer
    /// was published within `timeout`.
    pub fn wait_write_index(
        &self,
        seen_generation: u64,
        timeout: Duration,
    ) -> Option<WriteIndexUpdate> {
        let dev = self.device.exchange();
        let mut guard = dev.mutex.lock();

        loop {
            let (index, generation) = self.exchange().write_index(&guard);
            if generation > seen_generation {
                return Some(WriteIndexUpdate {
                    index,
                    generation,
                    eof: self.exchange().eof(&guard),
                });
            }
            if !self.exchange().cond_served.timed_wait(&mut guard, timeout) {
                return None;
            }
        }
    }

    pub fn eof(&self) -> bool {
        let guard = self.device.exchange().mutex.lock();
        self.exchange().eof(&guard)
    }

    /// Byte view of the shared data ring.
    pub fn data_view(&self) -> &RingBufferView<u8> {
        &self.data_view
    }

    /// Entry view of the shared descriptor ring.
    pub fn desc_view(&self) -> &RingBufferView<MicrosliceDescriptor> {
        &self.desc_view
    }

    /// Read the descriptor at free-running entry index `desc_index`.
    pub fn descriptor(&self, desc_index: u64) -> MicrosliceDescriptor {
        self.desc_view.get(desc_index)
    }

    /// Copy one microslice's content out of the ring, following wraparound.
    pub fn read_content(&self, desc: &MicrosliceDescriptor) -> Vec<u8> {
        let mut content = vec![0u8; desc.size as usize];
        self.data_view.copy_into(desc.offset, &mut content);
        content
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        let mut guard = self.device.exchange().mutex.lock();
        self.exchange().disconnect(&mut guard);
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
