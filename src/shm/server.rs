// SPDX-License-Identifier: MIT OR Apache-2.0

//! The device server: owns the hardware channels and serves the shared memory exchange.
//!
//! One server thread multiplexes all channels of a device. Each cycle it waits for client
//! requests (bounded by a timed wait, so a stop signal is observed promptly), then for every
//! channel with a pending request:
//!
//! 1. takes the request off the exchange while holding the device mutex,
//! 2. releases the mutex and performs the hardware work,
//! 3. relocks, publishes the fresh write index and signals the channel's served condition.
//!
//! Clearing the request flag before unlocking keeps the one-request-in-flight protocol intact
//! while the hardware access runs without the lock.

/* ---------------------------------------------------------------------------------------------- */

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, trace};

use crate::dma::{DmaChannel, DESC_ENTRY_SIZE};
use crate::error::Result;
use crate::microslice::MicrosliceDescriptor;
use crate::ring::RingBufferView;
use crate::shm::exchange::{
    ChannelExchange, ChannelLayout, DeviceExchange, DualIndex, SegmentLayout,
};
use crate::shm::segment::ShmSegment;
use crate::shm::sync::MutexGuard;

/* ---------------------------------------------------------------------------------------------- */

/// Idle bound of the request wait; the shutdown flag is re-checked at least this often.
const REQUEST_WAIT: Duration = Duration::from_millis(100);

/// Poll iterations granted to each DMA engine on shutdown.
const DISABLE_TIMEOUT: usize = 10_000;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Shared memory segment name, without the leading slash.
    pub shm_name: String,
    pub num_channels: usize,
    pub data_buffer_size_exp: u32,
    pub desc_buffer_size_exp: u32,
}

/// Raw buffer locations inside the segment, handed to the channel factory.
#[derive(Clone, Copy, Debug)]
pub struct ChannelBuffers {
    pub data_ptr: *mut u8,
    pub data_size_exp: u32,
    pub desc_ptr: *mut u8,
    pub desc_size_exp: u32,
}

#[derive(Debug)]
struct ChannelServer {
    exchange: *const ChannelExchange,
    dma: DmaChannel,
    desc_view: RingBufferView<MicrosliceDescriptor>,
    data_size: u64,
    desc_entries: u64,
}

/// The serving side of one device's exchange segment.
#[derive(Debug)]
pub struct DeviceServer {
    segment: ShmSegment,
    channels: Vec<ChannelServer>,
}

// Raw exchange pointers target the segment owned by self.
unsafe impl Send for DeviceServer {}

impl DeviceServer {
    /// Create the exchange segment and bring up all channels.
    ///
    /// The factory receives each channel's buffer locations inside the segment and returns a
    /// running [`DmaChannel`] over them; buffer pinning and register access are its business.
    pub fn new<F>(config: &ServerConfig, mut init_channel: F) -> Result<DeviceServer>
    where
        F: FnMut(usize, ChannelBuffers) -> Result<DmaChannel>,
    {
        let layout = SegmentLayout::compute(
            config.num_channels,
            config.data_buffer_size_exp,
            config.desc_buffer_size_exp,
        );
        let segment = ShmSegment::create(&config.shm_name, layout.total_size)?;

        unsafe {
            DeviceExchange::init(
                segment.as_ptr() as *mut DeviceExchange,
                config.num_channels as u32,
            )?;
        }

        let mut channels = Vec::with_capacity(config.num_channels);
        for (index, ch_layout) in layout.channels.iter().enumerate() {
            let exchange =
                segment.at_offset(SegmentLayout::exchange_offset(index))? as *mut ChannelExchange;
            unsafe { ChannelExchange::init(exchange, *ch_layout)? };

            let buffers = ChannelBuffers {
                data_ptr: segment.at_offset(ch_layout.data_buffer_offset as usize)?,
                data_size_exp: ch_layout.data_buffer_size_exp,
                desc_ptr: segment.at_offset(ch_layout.desc_buffer_offset as usize)?,
                desc_size_exp: ch_layout.desc_buffer_size_exp,
            };
            let dma = init_channel(index, buffers)?;

            channels.push(ChannelServer::new(exchange, dma, *ch_layout));
        }

        info!(
            "exchange segment {} serving {} channels, {} bytes",
            config.shm_name, config.num_channels, layout.total_size
        );
        Ok(DeviceServer { segment, channels })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Direct access to a channel's DMA controller, for out-of-band management.
    pub fn dma_channel(&mut self, index: usize) -> &mut DmaChannel {
        &mut self.channels[index].dma
    }

    // The deref lifetime is detached from &self so channel state can be borrowed mutably
    // while a guard of this exchange is alive; the exchange lives in the segment owned by
    // self and is never moved.
    fn device_exchange<'a>(&self) -> &'a DeviceExchange {
        unsafe { &*(self.segment.as_ptr() as *const DeviceExchange) }
    }

    /// Serve until `shutdown` is raised, then tear the channels down and mark end of stream.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            self.poll_cycle()?;
        }
        self.finish()
    }

    /// One wait-and-serve iteration of the server loop.
    pub fn poll_cycle(&mut self) -> Result<()> {
        let dev = self.device_exchange();
        let mut guard = dev.mutex.lock();

        if !self.any_request_pending(&guard) {
            dev.cond_req.timed_wait(&mut guard, REQUEST_WAIT);
        }

        for index in 0..self.channels.len() {
            let pending = unsafe { &*self.channels[index].exchange }.request_pending(&guard);
            if pending {
                guard = self.serve_channel(index, guard)?;
            }
        }
        drop(guard);
        Ok(())
    }

    fn any_request_pending(&self, guard: &MutexGuard<'_>) -> bool {
        self.channels
            .iter()
            .any(|ch| unsafe { &*ch.exchange }.request_pending(guard))
    }

    fn serve_channel<'a>(
        &mut self,
        index: usize,
        mut guard: MutexGuard<'a>,
    ) -> Result<MutexGuard<'a>> {
        let exchange = unsafe { &*self.channels[index].exchange };
        let read_request = exchange.take_read_request(&mut guard);
        let write_requested = exchange.take_write_request(&mut guard);
        if read_request.is_none() && !write_requested {
            return Ok(guard);
        }

        // hardware work runs without the lock, the cleared flags block repeat requests
        drop(guard);
        if let Some(request) = read_request {
            trace!(
                "channel {}: read index request data {:#x} desc {}",
                index,
                request.data,
                request.desc
            );
            self.channels[index].apply_read_index(request)?;
        }
        let write_index = self.channels[index].hw_write_index()?;

        let mut guard = self.device_exchange().mutex.lock();
        exchange.publish_write_index(&mut guard, write_index);
        exchange.cond_served.notify_all();
        Ok(guard)
    }

    /// Disable all channels, publish their final write indices and raise end of stream.
    fn finish(&mut self) -> Result<()> {
        debug!("server loop ends, disabling {} channels", self.channels.len());

        let mut final_indices = Vec::with_capacity(self.channels.len());
        for ch in &mut self.channels {
            ch.dma.disable(DISABLE_TIMEOUT)?;
            final_indices.push(ch.hw_write_index()?);
        }

        let dev = self.device_exchange();
        let mut guard = dev.mutex.lock();
        for (ch, write_index) in self.channels.iter().zip(final_indices) {
            let exchange = unsafe { &*ch.exchange };
            exchange.publish_write_index(&mut guard, write_index);
            exchange.set_eof(&mut guard);
            exchange.cond_served.notify_all();
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------------------------------- */

impl ChannelServer {
    fn new(exchange: *const ChannelExchange, dma: DmaChannel, layout: ChannelLayout) -> Self {
        let desc_view = dma.desc_view();
        ChannelServer {
            exchange,
            dma,
            desc_view,
            data_size: 1 << layout.data_buffer_size_exp,
            desc_entries: 1 << (layout.desc_buffer_size_exp - DESC_ENTRY_SIZE.trailing_zeros()),
        }
    }

    /// Translate the client's free-running read index into hardware ring pointers and push
    /// them to the card.
    fn apply_read_index(&mut self, index: DualIndex) -> Result<()> {
        // the data pointer is additionally rounded down to the transfer unit; partially
        // consumed transfer units stay owned by software
        let data_offset =
            (index.data & (self.data_size - 1)) & !(self.dma.transfer_size() as u64 - 1);
        let desc_offset = (index.desc & (self.desc_entries - 1)) * DESC_ENTRY_SIZE as u64;
        self.dma.advance_read_pointers(data_offset, desc_offset)
    }

    /// The channel's current write index, derived from the hardware descriptor count: the data
    /// position is the end of the last completed microslice.
    fn hw_write_index(&self) -> Result<DualIndex> {
        let desc = self.dma.desc_index()?;
        let data = if desc == 0 {
            0
        } else {
            let last = self.desc_view.get(desc - 1);
            last.offset + u64::from(last.size)
        };
        Ok(DualIndex { data, desc })
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dma::DmaBuffer;
    use crate::registers::{pkt, MemRegisterFile, RegisterFile};
    use crate::sg::PhysicalSegment;
    use crate::shm::test_name;
    use std::sync::Arc;

    pub(crate) const DATA_EXP: u32 = 12;
    pub(crate) const DESC_EXP: u32 = 10;
    pub(crate) const TRANSFER_SIZE: usize = 128;

    pub(crate) fn config(tag: &str, num_channels: usize) -> ServerConfig {
        ServerConfig {
            shm_name: test_name(tag),
            num_channels,
            data_buffer_size_exp: DATA_EXP,
            desc_buffer_size_exp: DESC_EXP,
        }
    }

    pub(crate) fn channel_register_file() -> Arc<MemRegisterFile> {
        let rf = Arc::new(MemRegisterFile::new(0x40));
        rf.preload(pkt::EBDM_N_SG_CONFIG, 32 << 16);
        rf.preload(pkt::RBDM_N_SG_CONFIG, 32 << 16);
        // the capacity halves are read-only in hardware
        rf.read_only_bits(pkt::EBDM_N_SG_CONFIG, 0xffff_0000);
        rf.read_only_bits(pkt::RBDM_N_SG_CONFIG, 0xffff_0000);
        rf
    }

    pub(crate) fn build_channel(
        rf: &Arc<MemRegisterFile>,
        buffers: ChannelBuffers,
    ) -> Result<DmaChannel> {
        let data = unsafe {
            DmaBuffer::new(
                buffers.data_ptr,
                buffers.data_size_exp,
                vec![PhysicalSegment {
                    pointer: 0x10_0000,
                    length: 1 << buffers.data_size_exp,
                }],
            )?
        };
        let desc = unsafe {
            DmaBuffer::new(
                buffers.desc_ptr,
                buffers.desc_size_exp,
                vec![PhysicalSegment {
                    pointer: 0x20_0000,
                    length: 1 << buffers.desc_size_exp,
                }],
            )?
        };
        let mut dma = DmaChannel::new(
            rf.clone() as Arc<dyn RegisterFile>,
            data,
            desc,
            TRANSFER_SIZE,
        )?;
        dma.configure()?;
        dma.enable()?;
        Ok(dma)
    }

    #[test]
    fn server_brings_up_channels_inside_the_segment() {
        let rf = channel_register_file();
        let mut desc_ptr: *mut u8 = std::ptr::null_mut();
        let server = DeviceServer::new(&config("bringup", 1), |_, buffers| {
            desc_ptr = buffers.desc_ptr;
            build_channel(&rf, buffers)
        })
        .unwrap();

        assert_eq!(server.num_channels(), 1);
        // the descriptor buffer landed inside the mapping
        let base = server.segment.as_ptr() as usize;
        let desc = desc_ptr as usize;
        assert!(desc > base && desc < base + server.segment.len());
    }

    #[test]
    fn write_index_derives_from_the_descriptor_ring() {
        let rf = channel_register_file();
        let mut desc_ptr: *mut u8 = std::ptr::null_mut();
        let server = DeviceServer::new(&config("write-index", 1), |_, buffers| {
            desc_ptr = buffers.desc_ptr;
            build_channel(&rf, buffers)
        })
        .unwrap();

        assert_eq!(
            server.channels[0].hw_write_index().unwrap(),
            DualIndex::default()
        );

        let ring = desc_ptr as *mut MicrosliceDescriptor;
        unsafe {
            ring.write(MicrosliceDescriptor {
                idx: 1,
                size: 256,
                offset: 0,
                ..Default::default()
            });
            ring.add(1).write(MicrosliceDescriptor {
                idx: 2,
                size: 128,
                offset: 256,
                ..Default::default()
            });
        }
        rf.preload(pkt::DESC_CNT_L, 2);

        assert_eq!(
            server.channels[0].hw_write_index().unwrap(),
            DualIndex {
                data: 256 + 128,
                desc: 2
            }
        );
    }

    #[test]
    fn read_index_translates_to_masked_hardware_pointers() {
        let rf = channel_register_file();
        let mut server = DeviceServer::new(&config("read-index", 1), |_, buffers| {
            build_channel(&rf, buffers)
        })
        .unwrap();

        server.channels[0]
            .apply_read_index(DualIndex {
                data: (1 << DATA_EXP) + 512 + 17,
                desc: (1 << (DESC_EXP - 5)) + 3,
            })
            .unwrap();

        // free-running counts wrap into the rings, the data pointer rounds down to the
        // transfer unit
        assert_eq!(rf.stored(pkt::EBDM_SW_READ_POINTER_L), 512);
        assert_eq!(
            rf.stored(pkt::RBDM_SW_READ_POINTER_L),
            3 * DESC_ENTRY_SIZE as u32
        );
    }
}

/* ---------------------------------------------------------------------------------------------- */
