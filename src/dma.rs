// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-channel DMA ring-buffer controller.
//!
//! Each channel owns a data buffer and a descriptor buffer, both power-of-two sized rings that
//! the card fills by scatter-gather DMA. [`DmaChannel`] drives the channel through its
//! lifecycle:
//!
//! ```text
//! Uninitialized --configure()--> Configured --enable()--> Enabled --disable()--> Disabled
//! ```
//!
//! The `DMA_CTRL` register is read once at construction and afterwards only written from a
//! software-cached copy; the pulse-only pointer-sync bit is never part of the cache. Software
//! read pointers for both buffers are pushed as a single 5-word block whose last word rewrites
//! `DMA_CTRL` with the sync bit set, so the hardware picks up both pointers atomically.

/* ---------------------------------------------------------------------------------------------- */

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::microslice::MicrosliceDescriptor;
use crate::registers::{bits, pkt, RegisterFile};
use crate::ring::{RingBufferView, RingIndex};
use crate::sg::{self, SgTable};

/* ---------------------------------------------------------------------------------------------- */

pub const DESC_ENTRY_SIZE: usize = std::mem::size_of::<MicrosliceDescriptor>();

/// A pinned, page-aligned host buffer together with its physical scatter-gather list, as
/// obtained from the physical buffer provider.
#[derive(Debug)]
pub struct DmaBuffer {
    base: *mut u8,
    size_exp: u32,
    segments: Vec<sg::PhysicalSegment>,
}

unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// # Safety
    ///
    /// `base` must point to `1 << size_exp` bytes of page-aligned, pinned memory that stays
    /// mapped for the lifetime of the buffer, and `segments` must be its physical layout.
    pub unsafe fn new(
        base: *mut u8,
        size_exp: u32,
        segments: Vec<sg::PhysicalSegment>,
    ) -> Result<DmaBuffer> {
        if size_exp == 0 || size_exp > 63 {
            return Err(Error::Configuration(format!(
                "invalid buffer size exponent {}",
                size_exp
            )));
        }
        let total: u64 = segments.iter().map(|s| s.length).sum();
        if total != 1u64 << size_exp {
            return Err(Error::Configuration(format!(
                "scatter-gather list covers {:#x} bytes, buffer size is {:#x}",
                total,
                1u64 << size_exp
            )));
        }
        Ok(DmaBuffer {
            base,
            size_exp,
            segments,
        })
    }

    pub fn base(&self) -> *mut u8 {
        self.base
    }

    pub fn size(&self) -> u64 {
        1 << self.size_exp
    }

    pub fn size_exp(&self) -> u32 {
        self.size_exp
    }

    pub fn segments(&self) -> &[sg::PhysicalSegment] {
        &self.segments
    }

    fn clear(&mut self) {
        unsafe { std::ptr::write_bytes(self.base, 0, self.size() as usize) };
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Uninitialized,
    Configured,
    Enabled,
    Disabled,
}

/// A microslice announced by the hardware: its descriptor and the masked byte offset of its
/// content in the data buffer. The content may wrap around the ring; use
/// [`DmaChannel::data_view`] to copy it out.
#[derive(Clone, Copy, Debug)]
pub struct PolledMicroslice {
    pub desc: MicrosliceDescriptor,
    pub data_offset: u64,
}

/// Controller for one DMA channel's buffer pair.
#[derive(Debug)]
pub struct DmaChannel {
    rf: Arc<dyn RegisterFile>,
    data: DmaBuffer,
    desc: DmaBuffer,
    transfer_size: usize,
    dmactrl_cached: u32,
    state: State,
    // consumer cursor over the descriptor ring
    read_index: RingIndex,
    last_slot: Option<u64>,
    ms_index_max: u64,
}

impl DmaChannel {
    /// Takes ownership of the channel's buffers and reads back the control register.
    ///
    /// Fails with [`Error::AlreadyActive`] if any enable bit is still set, which means a
    /// previous owner of the channel died without shutting down. The device then needs an
    /// external reset; retrying blindly risks corrupting an in-flight transfer.
    pub fn new(
        rf: Arc<dyn RegisterFile>,
        mut data: DmaBuffer,
        mut desc: DmaBuffer,
        transfer_size: usize,
    ) -> Result<DmaChannel> {
        // the read-pointer rounding masks with the transfer size, so it must be a power of two
        if !transfer_size.is_power_of_two() || transfer_size < 4 || (transfer_size >> 2) > 0x3ff
        {
            return Err(Error::Configuration(format!(
                "invalid DMA transfer size {}",
                transfer_size
            )));
        }
        if desc.size() as usize % DESC_ENTRY_SIZE != 0 || desc.size_exp() < 5 {
            return Err(Error::Configuration(
                "descriptor buffer smaller than one descriptor entry".to_owned(),
            ));
        }

        let dmactrl_cached = rf.get_reg(pkt::DMA_CTRL)?;
        let enable_mask = 1 << bits::DMACTRL_DMA_EN
            | 1 << bits::DMACTRL_EBDM_EN
            | 1 << bits::DMACTRL_RBDM_EN;
        if dmactrl_cached & enable_mask != 0 {
            return Err(Error::AlreadyActive);
        }

        // data cleared for debugging, descriptors cleared so polling starts blank
        data.clear();
        desc.clear();

        let desc_entries_exp = desc.size_exp() - DESC_ENTRY_SIZE.trailing_zeros();
        Ok(DmaChannel {
            rf,
            data,
            desc,
            transfer_size,
            dmactrl_cached,
            state: State::Uninitialized,
            read_index: RingIndex::new(desc_entries_exp),
            last_slot: None,
            ms_index_max: 0,
        })
    }

    /// Write both scatter-gather tables, the buffer size readback registers and the transfer
    /// size, and zero both software read pointers.
    ///
    /// Idempotent on an idle channel; fails on an enabled one.
    pub fn configure(&mut self) -> Result<()> {
        if self.state == State::Enabled {
            return Err(Error::Configuration(
                "channel is enabled, disable before reconfiguring".to_owned(),
            ));
        }

        sg::write_sg_list(
            &*self.rf,
            SgTable::Data,
            &sg::convert_sg_list(self.data.segments()),
        )?;
        sg::write_sg_list(
            &*self.rf,
            SgTable::Desc,
            &sg::convert_sg_list(self.desc.segments()),
        )?;

        // size registers are readback only, the DMA engine works off the sg tables
        self.rf.set_reg64(pkt::EBDM_BUFFER_SIZE_L, self.data.size())?;
        self.rf.set_reg64(pkt::RBDM_BUFFER_SIZE_L, self.desc.size())?;

        // transfer size is programmed as a DW count
        self.set_dmactrl(
            ((self.transfer_size as u32) >> 2) << bits::DMACTRL_TRANS_SIZE_LSB,
            0x3ff << bits::DMACTRL_TRANS_SIZE_LSB,
        )?;

        self.set_sw_read_pointers(0, 0)?;

        debug!(
            "channel configured: data {:#x} bytes, desc {:#x} bytes, transfer unit {}",
            self.data.size(),
            self.desc.size(),
            self.transfer_size
        );
        self.state = State::Configured;
        Ok(())
    }

    /// Release the datapath reset, then set the buffer and engine enables. The two steps are
    /// separate register writes; the logic needs the reset released before the enables arrive.
    pub fn enable(&mut self) -> Result<()> {
        if self.state != State::Configured && self.state != State::Disabled {
            return Err(Error::Configuration(
                "channel must be configured before enabling".to_owned(),
            ));
        }

        self.set_dmactrl(0, 1 << bits::DMACTRL_FIFO_RST)?;

        let enables = 1 << bits::DMACTRL_EBDM_EN
            | 1 << bits::DMACTRL_RBDM_EN
            | 1 << bits::DMACTRL_DMA_EN;
        self.set_dmactrl(enables, enables)?;

        self.state = State::Enabled;
        Ok(())
    }

    /// Stop the DMA engine and wait for an in-flight transfer to drain, polling the busy bit
    /// at ~100 µs intervals for at most `timeout` iterations. The buffer enables are cleared
    /// and the datapath reset is asserted in any case; a timeout is reported afterwards.
    pub fn disable(&mut self, timeout: usize) -> Result<()> {
        self.set_dmactrl(0, 1 << bits::DMACTRL_DMA_EN)?;

        let mut polls = 0;
        let mut timed_out = true;
        while polls < timeout {
            if !self.is_busy()? {
                timed_out = false;
                break;
            }
            thread::sleep(Duration::from_micros(100));
            polls += 1;
        }

        self.set_dmactrl(
            1 << bits::DMACTRL_FIFO_RST,
            1 << bits::DMACTRL_EBDM_EN
                | 1 << bits::DMACTRL_RBDM_EN
                | 1 << bits::DMACTRL_FIFO_RST,
        )?;
        self.state = State::Disabled;

        if timed_out {
            warn!("DMA engine still busy after {} polls, channel torn down anyway", polls);
            return Err(Error::Timeout { polls });
        }
        Ok(())
    }

    /// Whether any enable bit is set in the cached control register.
    pub fn is_enabled(&self) -> bool {
        let mask = 1 << bits::DMACTRL_DMA_EN
            | 1 << bits::DMACTRL_EBDM_EN
            | 1 << bits::DMACTRL_RBDM_EN;
        self.dmactrl_cached & mask != 0
    }

    pub fn is_busy(&self) -> Result<bool> {
        Ok(self.rf.get_bit(pkt::DMA_CTRL, bits::DMACTRL_BUSY)?)
    }

    /// Push both software read pointers to the hardware in one synchronized transaction.
    ///
    /// `data_offset` must be a multiple of the transfer unit and `desc_offset` a multiple of
    /// the descriptor entry size; a misaligned offset fails before any register is touched.
    pub fn advance_read_pointers(&mut self, data_offset: u64, desc_offset: u64) -> Result<()> {
        if data_offset % self.transfer_size as u64 != 0 {
            return Err(Error::Configuration(format!(
                "data read pointer {:#x} not aligned to transfer unit {}",
                data_offset, self.transfer_size
            )));
        }
        if desc_offset % DESC_ENTRY_SIZE as u64 != 0 {
            return Err(Error::Configuration(format!(
                "descriptor read pointer {:#x} not aligned to entry size {}",
                desc_offset, DESC_ENTRY_SIZE
            )));
        }
        self.set_sw_read_pointers(data_offset, desc_offset)
    }

    /// Non-blocking check for the next microslice announced in the descriptor ring.
    ///
    /// Returns `None` while the slot under the cursor has not been rewritten with a higher
    /// microslice index than everything seen so far.
    pub fn poll_next_descriptor(&mut self) -> Option<PolledMicroslice> {
        let desc = self.desc_view().get(self.read_index.index());
        if desc.idx <= self.ms_index_max {
            return None;
        }

        self.ms_index_max = desc.idx;
        self.last_slot = Some(self.read_index.offset());
        self.read_index.advance(1);

        let data_offset = desc.offset & (self.data.size() - 1);
        trace!(
            "microslice {} at data offset {:#x}, {} bytes",
            desc.idx,
            data_offset,
            desc.size
        );
        Some(PolledMicroslice { desc, data_offset })
    }

    /// Acknowledge everything consumed so far by moving both read pointers to the start of the
    /// most recently polled entry.
    ///
    /// The pointers deliberately stay one entry behind the consumer, which keeps the
    /// wraparound arithmetic of the next-element protocol well-defined. Callers batch
    /// acknowledgments to amortize the register transaction.
    pub fn ack_consumed(&mut self) -> Result<()> {
        let last_slot = match self.last_slot {
            Some(slot) => slot,
            None => return Ok(()),
        };

        let desc = self.desc_view().get(last_slot);
        let data_offset = (desc.offset & (self.data.size() - 1))
            & !(self.transfer_size as u64 - 1);
        let desc_offset = last_slot * DESC_ENTRY_SIZE as u64 & (self.desc.size() - 1);

        self.set_sw_read_pointers(data_offset, desc_offset)
    }

    /// Hardware's free-running byte count of data written to the data buffer.
    pub fn data_offset(&self) -> Result<u64> {
        Ok(self.rf.get_reg64(pkt::EBDM_OFFSET_L)?)
    }

    /// Hardware's free-running count of descriptor entries written.
    pub fn desc_index(&self) -> Result<u64> {
        Ok(self.rf.get_reg64(pkt::DESC_CNT_L)?)
    }

    pub fn transfer_size(&self) -> usize {
        self.transfer_size
    }

    pub fn data_buffer(&self) -> &DmaBuffer {
        &self.data
    }

    pub fn desc_buffer(&self) -> &DmaBuffer {
        &self.desc
    }

    /// Byte view of the data ring.
    pub fn data_view(&self) -> RingBufferView<u8> {
        unsafe { RingBufferView::new(self.data.base(), self.data.size_exp()) }
    }

    /// Entry view of the descriptor ring.
    pub fn desc_view(&self) -> RingBufferView<MicrosliceDescriptor> {
        let entries_exp = self.desc.size_exp() - DESC_ENTRY_SIZE.trailing_zeros();
        unsafe {
            RingBufferView::new(self.desc.base() as *const MicrosliceDescriptor, entries_exp)
        }
    }

    fn set_sw_read_pointers(&mut self, data_offset: u64, desc_offset: u64) -> Result<()> {
        // the last word rewrites DMA_CTRL with the pulse-only sync bit, making both pointers
        // visible to the hardware at once
        let block = [
            data_offset as u32,
            (data_offset >> 32) as u32,
            desc_offset as u32,
            (desc_offset >> 32) as u32,
            self.dmactrl_cached | 1 << bits::DMACTRL_SYNC_SWRDPTRS,
        ];
        self.rf.set_mem(pkt::EBDM_SW_READ_POINTER_L, &block)?;
        trace!(
            "read pointers advanced: data {:#x} desc {:#x}",
            data_offset,
            desc_offset
        );
        Ok(())
    }

    fn set_dmactrl(&mut self, value: u32, mask: u32) -> Result<()> {
        // the sync bit is pulse-only and must never end up in the cached copy
        let mask = mask & !(1 << bits::DMACTRL_SYNC_SWRDPTRS);
        self.dmactrl_cached = (self.dmactrl_cached & !mask) | (value & mask);
        self.rf.set_reg(pkt::DMA_CTRL, self.dmactrl_cached)?;
        Ok(())
    }
}

impl Drop for DmaChannel {
    fn drop(&mut self) {
        if self.state == State::Enabled {
            if let Err(e) = self.disable(1000) {
                warn!("disabling channel on drop failed: {}", e);
            }
        }
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::microslice::MicrosliceDescriptor;
    use crate::registers::MemRegisterFile;

    const DATA_EXP: u32 = 12; // 4 KiB
    const DESC_EXP: u32 = 10; // 32 descriptor entries
    const TRANSFER_SIZE: usize = 128;

    struct Backing {
        data: Vec<u64>,
        desc: Vec<MicrosliceDescriptor>,
    }

    fn backing() -> Backing {
        Backing {
            data: vec![0u64; (1 << DATA_EXP) / 8],
            desc: vec![MicrosliceDescriptor::default(); (1 << DESC_EXP) / DESC_ENTRY_SIZE],
        }
    }

    fn buffers(backing: &mut Backing) -> (DmaBuffer, DmaBuffer) {
        let data = unsafe {
            DmaBuffer::new(
                backing.data.as_mut_ptr() as *mut u8,
                DATA_EXP,
                vec![sg::PhysicalSegment {
                    pointer: 0x10_0000,
                    length: 1 << DATA_EXP,
                }],
            )
            .unwrap()
        };
        let desc = unsafe {
            DmaBuffer::new(
                backing.desc.as_mut_ptr() as *mut u8,
                DESC_EXP,
                vec![sg::PhysicalSegment {
                    pointer: 0x20_0000,
                    length: 1 << DESC_EXP,
                }],
            )
            .unwrap()
        };
        (data, desc)
    }

    fn register_file() -> Arc<MemRegisterFile> {
        let rf = Arc::new(MemRegisterFile::new(0x40));
        rf.preload(pkt::EBDM_N_SG_CONFIG, 32 << 16);
        rf.preload(pkt::RBDM_N_SG_CONFIG, 32 << 16);
        // the capacity halves are read-only in hardware
        rf.read_only_bits(pkt::EBDM_N_SG_CONFIG, 0xffff_0000);
        rf.read_only_bits(pkt::RBDM_N_SG_CONFIG, 0xffff_0000);
        rf
    }

    fn channel(rf: &Arc<MemRegisterFile>) -> DmaChannel {
        let mut backing = backing();
        let (data, desc) = buffers(&mut backing);
        // backing is leaked so the raw pointers stay valid for the channel's lifetime
        std::mem::forget(backing);
        DmaChannel::new(rf.clone(), data, desc, TRANSFER_SIZE).unwrap()
    }

    #[test]
    fn transfer_size_must_be_a_power_of_two() {
        let rf = register_file();

        for size in [0usize, 24, 4097] {
            let mut backing = backing();
            let (data, desc) = buffers(&mut backing);
            match DmaChannel::new(rf.clone() as Arc<dyn RegisterFile>, data, desc, size) {
                Err(Error::Configuration(_)) => {}
                other => panic!("transfer size {}: unexpected result: {:?}", size, other),
            }
        }
    }

    #[test]
    fn residual_enable_bits_refuse_construction() {
        let rf = register_file();
        rf.preload(pkt::DMA_CTRL, 1 << bits::DMACTRL_EBDM_EN);

        let mut backing = backing();
        let (data, desc) = buffers(&mut backing);
        match DmaChannel::new(rf.clone() as Arc<dyn RegisterFile>, data, desc, TRANSFER_SIZE) {
            Err(Error::AlreadyActive) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn configure_programs_tables_sizes_and_pointers() {
        let rf = register_file();
        let mut ch = channel(&rf);
        ch.configure().unwrap();

        // one segment each, count registers updated
        assert_eq!(rf.stored(pkt::EBDM_N_SG_CONFIG) & 0xffff, 1);
        assert_eq!(rf.stored(pkt::RBDM_N_SG_CONFIG) & 0xffff, 1);

        // buffer sizes written for readback
        assert_eq!(rf.stored(pkt::EBDM_BUFFER_SIZE_L), 1 << DATA_EXP);
        assert_eq!(rf.stored(pkt::RBDM_BUFFER_SIZE_L), 1 << DESC_EXP);

        // read pointers zeroed, sync bit pulsed via the control word
        assert_eq!(rf.stored(pkt::EBDM_SW_READ_POINTER_L), 0);
        assert_eq!(rf.stored(pkt::RBDM_SW_READ_POINTER_L), 0);
        assert_ne!(rf.stored(pkt::DMA_CTRL) & (1 << bits::DMACTRL_SYNC_SWRDPTRS), 0);

        // transfer size programmed as DWs
        let dws = (rf.stored(pkt::DMA_CTRL) >> bits::DMACTRL_TRANS_SIZE_LSB) & 0x3ff;
        assert_eq!(dws as usize, TRANSFER_SIZE >> 2);
    }

    #[test]
    fn configure_is_idempotent() {
        let rf = register_file();
        let mut ch = channel(&rf);

        ch.configure().unwrap();
        let first = (
            rf.stored(pkt::EBDM_N_SG_CONFIG),
            rf.stored(pkt::EBDM_BUFFER_SIZE_L),
            rf.stored(pkt::RBDM_BUFFER_SIZE_L),
        );

        ch.configure().unwrap();
        let second = (
            rf.stored(pkt::EBDM_N_SG_CONFIG),
            rf.stored(pkt::EBDM_BUFFER_SIZE_L),
            rf.stored(pkt::RBDM_BUFFER_SIZE_L),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn enable_releases_reset_before_setting_enables() {
        let rf = register_file();
        let mut ch = channel(&rf);
        ch.configure().unwrap();

        let writes_before = rf.write_count(pkt::DMA_CTRL);
        ch.enable().unwrap();
        // two separate control register writes
        assert_eq!(rf.write_count(pkt::DMA_CTRL) - writes_before, 2);

        let ctrl = rf.stored(pkt::DMA_CTRL);
        assert_eq!(ctrl & (1 << bits::DMACTRL_FIFO_RST), 0);
        assert_ne!(ctrl & (1 << bits::DMACTRL_DMA_EN), 0);
        assert_ne!(ctrl & (1 << bits::DMACTRL_EBDM_EN), 0);
        assert_ne!(ctrl & (1 << bits::DMACTRL_RBDM_EN), 0);
        assert!(ch.is_enabled());
    }

    #[test]
    fn misaligned_read_pointer_fails_without_register_writes() {
        let rf = register_file();
        let mut ch = channel(&rf);
        ch.configure().unwrap();

        let writes_before = rf.write_count(pkt::EBDM_SW_READ_POINTER_L);
        match ch.advance_read_pointers(TRANSFER_SIZE as u64 + 1, 0) {
            Err(Error::Configuration(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match ch.advance_read_pointers(0, 7) {
            Err(Error::Configuration(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(rf.write_count(pkt::EBDM_SW_READ_POINTER_L), writes_before);
    }

    #[test]
    fn disable_with_stuck_busy_bit_polls_exactly_timeout_times() {
        let rf = register_file();
        let mut ch = channel(&rf);
        ch.configure().unwrap();
        ch.enable().unwrap();

        rf.force_bits(pkt::DMA_CTRL, 1 << bits::DMACTRL_BUSY);

        let reads_before = rf.read_count(pkt::DMA_CTRL);
        match ch.disable(5) {
            Err(Error::Timeout { polls: 5 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(rf.read_count(pkt::DMA_CTRL) - reads_before, 5);

        // teardown completed regardless of the timeout
        let ctrl = rf.stored(pkt::DMA_CTRL);
        assert_eq!(ctrl & (1 << bits::DMACTRL_DMA_EN), 0);
        assert_eq!(ctrl & (1 << bits::DMACTRL_EBDM_EN), 0);
        assert_eq!(ctrl & (1 << bits::DMACTRL_RBDM_EN), 0);
        assert_ne!(ctrl & (1 << bits::DMACTRL_FIFO_RST), 0);
        assert!(!ch.is_enabled());
    }

    #[test]
    fn disable_returns_once_busy_clears() {
        let rf = register_file();
        let mut ch = channel(&rf);
        ch.configure().unwrap();
        ch.enable().unwrap();

        ch.disable(5).unwrap();
        assert!(!ch.is_enabled());
    }

    #[test]
    fn poll_and_ack_follow_the_descriptor_ring() {
        let rf = register_file();
        let mut backing = backing();
        let (data, desc) = buffers(&mut backing);
        let mut ch =
            DmaChannel::new(rf.clone() as Arc<dyn RegisterFile>, data, desc, TRANSFER_SIZE)
                .unwrap();
        ch.configure().unwrap();
        ch.enable().unwrap();

        assert!(ch.poll_next_descriptor().is_none());

        // hardware announces two microslices
        backing.desc[0] = MicrosliceDescriptor {
            idx: 1,
            size: 256,
            offset: 0,
            ..Default::default()
        };
        backing.desc[1] = MicrosliceDescriptor {
            idx: 2,
            size: 128,
            offset: 256,
            ..Default::default()
        };

        let first = ch.poll_next_descriptor().unwrap();
        assert_eq!(first.desc.idx, 1);
        assert_eq!(first.data_offset, 0);

        let second = ch.poll_next_descriptor().unwrap();
        assert_eq!(second.desc.idx, 2);
        assert_eq!(second.data_offset, 256);

        // slot 2 still blank, nothing new
        assert!(ch.poll_next_descriptor().is_none());

        ch.ack_consumed().unwrap();
        // pointers land at the start of the last consumed entry, one entry behind
        assert_eq!(rf.stored(pkt::EBDM_SW_READ_POINTER_L), 256);
        assert_eq!(rf.stored(pkt::RBDM_SW_READ_POINTER_L), DESC_ENTRY_SIZE as u32);
    }

    #[test]
    fn ack_without_consumption_is_a_no_op() {
        let rf = register_file();
        let mut ch = channel(&rf);
        ch.configure().unwrap();

        let writes_before = rf.write_count(pkt::EBDM_SW_READ_POINTER_L);
        ch.ack_consumed().unwrap();
        assert_eq!(rf.write_count(pkt::EBDM_SW_READ_POINTER_L), writes_before);
    }
}

/* ---------------------------------------------------------------------------------------------- */
