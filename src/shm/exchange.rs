// SPDX-License-Identifier: MIT OR Apache-2.0

//! The shared memory exchange structures and segment layout.
//!
//! The segment starts with one [`DeviceExchange`] followed directly by an array of
//! [`ChannelExchange`] entries, one per channel; the channel buffers follow at page-aligned
//! offsets recorded in the channel entries. All mutable exchange state is protected by the
//! single device mutex; the accessors demand a [`MutexGuard`] reference as proof, and the
//! mutating ones borrow it exclusively so no two state borrows of a channel can overlap.
//!
//! Indices exchanged through [`DualIndex`] are free-running: the descriptor index counts
//! entries, the data index counts bytes. Both follow next-element semantics, a read index names
//! the first element not yet consumed.

/* ---------------------------------------------------------------------------------------------- */

use std::cell::UnsafeCell;
use std::mem::size_of;

use crate::error::{Error, Result};
use crate::shm::sync::{MutexGuard, RawCond, RawMutex};

/* ---------------------------------------------------------------------------------------------- */

/// Identifies a segment as speaking this exchange protocol.
pub const EXCHANGE_MAGIC: u32 = 0x6372_6931;

/// A read or write position over a channel's buffer pair.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct DualIndex {
    /// Free-running byte count into the data buffer.
    pub data: u64,
    /// Free-running entry count into the descriptor buffer.
    pub desc: u64,
}

/* ---------------------------------------------------------------------------------------------- */

/// Head of the segment: identification plus the device-wide lock and request signal.
#[repr(C)]
#[derive(Debug)]
pub struct DeviceExchange {
    magic: u32,
    num_channels: u32,
    pub mutex: RawMutex,
    /// Signaled by clients after posting a request.
    pub cond_req: RawCond,
}

impl DeviceExchange {
    /// Initialize the exchange head in place over zeroed segment memory.
    ///
    /// # Safety
    ///
    /// `this` must point into a freshly created segment; call once, before publishing the
    /// segment name.
    pub unsafe fn init(this: *mut DeviceExchange, num_channels: u32) -> Result<()> {
        std::ptr::addr_of_mut!((*this).num_channels).write(num_channels);
        (*this).mutex.init()?;
        (*this).cond_req.init()?;
        // the magic goes last, an attaching client that sees it finds everything else set up
        std::ptr::addr_of_mut!((*this).magic).write(EXCHANGE_MAGIC);
        Ok(())
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn num_channels(&self) -> u32 {
        self.num_channels
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Static per-channel facts, written once at segment creation.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct ChannelLayout {
    pub data_buffer_offset: u64,
    pub desc_buffer_offset: u64,
    pub data_buffer_size_exp: u32,
    pub desc_buffer_size_exp: u32,
}

#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
struct ChannelState {
    read_index: DualIndex,
    read_request_pending: bool,
    write_request_pending: bool,
    connected: bool,
    eof: bool,
    write_index: DualIndex,
    /// Bumped on every write index publication, so clients can wait for news.
    write_generation: u64,
}

/// Per-channel exchange entry.
#[repr(C)]
#[derive(Debug)]
pub struct ChannelExchange {
    layout: ChannelLayout,
    state: UnsafeCell<ChannelState>,
    /// Signaled by the server after serving a request or publishing an index.
    pub cond_served: RawCond,
}

// State is only touched through the guard-token accessors below.
unsafe impl Sync for ChannelExchange {}

impl ChannelExchange {
    /// Initialize a channel entry in place over zeroed segment memory.
    ///
    /// # Safety
    ///
    /// Same contract as [`DeviceExchange::init`].
    pub unsafe fn init(this: *mut ChannelExchange, layout: ChannelLayout) -> Result<()> {
        std::ptr::addr_of_mut!((*this).layout).write(layout);
        (*this).cond_served.init()
    }

    pub fn layout(&self) -> ChannelLayout {
        self.layout
    }

    // The returned lifetimes are tied to the guard borrow, not to self: a mutable state
    // borrow keeps the guard exclusively borrowed for as long as it lives.
    fn state<'t>(&self, _token: &'t MutexGuard<'_>) -> &'t ChannelState {
        unsafe { &*self.state.get() }
    }

    fn state_mut<'t>(&self, _token: &'t mut MutexGuard<'_>) -> &'t mut ChannelState {
        unsafe { &mut *self.state.get() }
    }

    /// Register the single client of this channel.
    pub fn connect(&self, token: &mut MutexGuard<'_>) -> Result<()> {
        let state = self.state_mut(token);
        if state.connected {
            return Err(Error::Protocol(
                "channel already has a connected client".to_owned(),
            ));
        }
        state.connected = true;
        Ok(())
    }

    pub fn disconnect(&self, token: &mut MutexGuard<'_>) {
        self.state_mut(token).connected = false;
    }

    pub fn is_connected(&self, token: &MutexGuard<'_>) -> bool {
        self.state(token).connected
    }

    /// Post a new read index. Fails while the previous request has not been taken by the
    /// server; the protocol allows one request in flight per channel.
    pub fn post_read_index(&self, token: &mut MutexGuard<'_>, index: DualIndex) -> Result<()> {
        let state = self.state_mut(token);
        if state.read_request_pending {
            return Err(Error::Protocol(
                "previous read index request still pending".to_owned(),
            ));
        }
        state.read_index = index;
        state.read_request_pending = true;
        Ok(())
    }

    /// Take a pending read request off the channel, clearing the flag.
    pub fn take_read_request(&self, token: &mut MutexGuard<'_>) -> Option<DualIndex> {
        let state = self.state_mut(token);
        if state.read_request_pending {
            state.read_request_pending = false;
            Some(state.read_index)
        } else {
            None
        }
    }

    pub fn read_request_pending(&self, token: &MutexGuard<'_>) -> bool {
        self.state(token).read_request_pending
    }

    pub fn read_index(&self, token: &MutexGuard<'_>) -> DualIndex {
        self.state(token).read_index
    }

    /// Ask the server for a freshly fetched write index. Same one-in-flight rule as
    /// [`ChannelExchange::post_read_index`], independently per request kind.
    pub fn post_write_request(&self, token: &mut MutexGuard<'_>) -> Result<()> {
        let state = self.state_mut(token);
        if state.write_request_pending {
            return Err(Error::Protocol(
                "previous write index request still pending".to_owned(),
            ));
        }
        state.write_request_pending = true;
        Ok(())
    }

    /// Take a pending write index request, clearing the flag. Returns whether one was set.
    pub fn take_write_request(&self, token: &mut MutexGuard<'_>) -> bool {
        let state = self.state_mut(token);
        let pending = state.write_request_pending;
        state.write_request_pending = false;
        pending
    }

    pub fn request_pending(&self, token: &MutexGuard<'_>) -> bool {
        let state = self.state(token);
        state.read_request_pending || state.write_request_pending
    }

    /// Publish a new write index and bump the generation counter.
    pub fn publish_write_index(&self, token: &mut MutexGuard<'_>, index: DualIndex) {
        let state = self.state_mut(token);
        state.write_index = index;
        state.write_generation += 1;
    }

    /// The current write index together with its generation.
    pub fn write_index(&self, token: &MutexGuard<'_>) -> (DualIndex, u64) {
        let state = self.state(token);
        (state.write_index, state.write_generation)
    }

    pub fn set_eof(&self, token: &mut MutexGuard<'_>) {
        self.state_mut(token).eof = true;
    }

    pub fn eof(&self, token: &MutexGuard<'_>) -> bool {
        self.state(token).eof
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Where everything lives inside the segment.
#[derive(Clone, Debug)]
pub struct SegmentLayout {
    pub total_size: usize,
    pub channels: Vec<ChannelLayout>,
}

impl SegmentLayout {
    /// Offset of channel `index`'s exchange entry; fixed by the structure sizes alone, so
    /// attaching clients can recompute it without knowing the buffer geometry.
    pub fn exchange_offset(index: usize) -> usize {
        size_of::<DeviceExchange>() + index * size_of::<ChannelExchange>()
    }

    /// Compute the layout for `num_channels` channels with uniform buffer size exponents.
    /// Buffers start at page-aligned offsets.
    pub fn compute(
        num_channels: usize,
        data_buffer_size_exp: u32,
        desc_buffer_size_exp: u32,
    ) -> SegmentLayout {
        let page = page_size::get();
        let mut offset = align_up(SegmentLayout::exchange_offset(num_channels), page);

        let mut channels = Vec::with_capacity(num_channels);
        for _ in 0..num_channels {
            let data_buffer_offset = offset as u64;
            offset = align_up(offset + (1usize << data_buffer_size_exp), page);
            let desc_buffer_offset = offset as u64;
            offset = align_up(offset + (1usize << desc_buffer_size_exp), page);

            channels.push(ChannelLayout {
                data_buffer_offset,
                desc_buffer_offset,
                data_buffer_size_exp,
                desc_buffer_size_exp,
            });
        }

        SegmentLayout {
            total_size: offset,
            channels,
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_keeps_buffers_page_aligned_and_disjoint() {
        let layout = SegmentLayout::compute(2, 16, 12);
        let page = page_size::get() as u64;

        assert_eq!(layout.channels.len(), 2);
        let mut previous_end = SegmentLayout::exchange_offset(2) as u64;
        for ch in &layout.channels {
            assert_eq!(ch.data_buffer_offset % page, 0);
            assert_eq!(ch.desc_buffer_offset % page, 0);
            assert!(ch.data_buffer_offset >= previous_end);
            assert!(ch.desc_buffer_offset >= ch.data_buffer_offset + (1 << 16));
            previous_end = ch.desc_buffer_offset + (1 << 12);
        }
        assert!(layout.total_size as u64 >= previous_end);
    }

    #[test]
    fn request_handshake_is_single_entry() {
        let segment = crate::shm::segment::ShmSegment::create(
            &crate::shm::test_name("exchange"),
            4096,
        )
        .unwrap();
        let dev = segment.as_ptr() as *mut DeviceExchange;
        unsafe { DeviceExchange::init(dev, 1).unwrap() };
        let dev = unsafe { &*dev };
        assert_eq!(dev.magic(), EXCHANGE_MAGIC);

        let ch = unsafe { segment.as_ptr().add(SegmentLayout::exchange_offset(0)) }
            as *mut ChannelExchange;
        unsafe { ChannelExchange::init(ch, ChannelLayout::default()).unwrap() };
        let ch = unsafe { &*ch };

        let mut guard = dev.mutex.lock();
        let index = DualIndex { data: 512, desc: 3 };
        ch.post_read_index(&mut guard, index).unwrap();
        assert!(matches!(
            ch.post_read_index(&mut guard, index),
            Err(Error::Protocol(_))
        ));

        assert_eq!(ch.take_read_request(&mut guard), Some(index));
        assert_eq!(ch.take_read_request(&mut guard), None);
        // the slot is free again
        ch.post_read_index(&mut guard, index).unwrap();
    }

    #[test]
    fn write_index_publication_bumps_the_generation() {
        let segment = crate::shm::segment::ShmSegment::create(
            &crate::shm::test_name("generation"),
            4096,
        )
        .unwrap();
        let dev = segment.as_ptr() as *mut DeviceExchange;
        unsafe { DeviceExchange::init(dev, 1).unwrap() };
        let dev = unsafe { &*dev };

        let ch = unsafe { segment.as_ptr().add(SegmentLayout::exchange_offset(0)) }
            as *mut ChannelExchange;
        unsafe { ChannelExchange::init(ch, ChannelLayout::default()).unwrap() };
        let ch = unsafe { &*ch };

        let mut guard = dev.mutex.lock();
        assert_eq!(ch.write_index(&guard), (DualIndex::default(), 0));

        let index = DualIndex {
            data: 4096,
            desc: 16,
        };
        ch.publish_write_index(&mut guard, index);
        assert_eq!(ch.write_index(&guard), (index, 1));

        ch.publish_write_index(&mut guard, index);
        assert_eq!(ch.write_index(&guard), (index, 2));
    }
}

/* ---------------------------------------------------------------------------------------------- */
