// SPDX-License-Identifier: MIT OR Apache-2.0

//! Register-level access to the card's readout window.
//!
//! All hardware access in this crate goes through [`trait RegisterFile`](RegisterFile), which
//! models the card's 32-bit register bus. Addresses are *word* addresses, relative to the
//! beginning of the register file.
//!
//! - [`BarRegisterFile`] is the real implementation, backed by a mapped BAR. The mapping itself
//!   comes from an external capability (VFIO, a kernel driver, ...); this crate only consumes
//!   the raw pointer.
//! - [`WindowedRegisterFile`] presents a sub-window at a fixed base address, used for
//!   channel-relative addressing.
//! - [`MemRegisterFile`] (tests and `test-mocks` only) is RAM-backed, for driving the DMA
//!   controller against fake hardware state.

/* ---------------------------------------------------------------------------------------------- */

use std::fmt::Debug;
use std::io::{self, ErrorKind};
use std::sync::Arc;

/// A word address into a register file.
pub type RegAddr = u32;

/* ---------------------------------------------------------------------------------------------- */

/// Device-global registers, at the beginning of the BAR.
pub mod dev {
    use super::RegAddr;

    pub const HARDWARE_INFO: RegAddr = 0;
    pub const BUILD_FLAGS: RegAddr = 1;
    pub const BUILD_REV_0: RegAddr = 2;
    pub const BUILD_DATE_L: RegAddr = 7;
    pub const BUILD_DATE_H: RegAddr = 8;
    pub const N_CHANNELS: RegAddr = 17;
    pub const TESTREG_DEVICE: RegAddr = 18;
    pub const UPTIME: RegAddr = 30;

    /// Expected value of `HARDWARE_INFO[15:0]`.
    pub const HARDWARE_ID: u32 = 0xf1e5;
    /// Supported value of `HARDWARE_INFO[31:16]`.
    pub const HARDWARE_VERSION: u32 = 4;

    /// Channel n's register window starts at `(n + 1) << CH_ADDR_SEL`.
    pub const CH_ADDR_SEL: u32 = 15;
    /// The data-path (GTX) window sits at `channel_base + (1 << DMA_ADDR_SEL)`.
    pub const DMA_ADDR_SEL: u32 = 14;
}

/// Per-channel DMA (packetizer) registers, relative to the channel base.
pub mod pkt {
    use super::RegAddr;

    pub const EBDM_N_SG_CONFIG: RegAddr = 0;
    pub const EBDM_BUFFER_SIZE_L: RegAddr = 1;
    pub const RBDM_N_SG_CONFIG: RegAddr = 3;
    pub const RBDM_BUFFER_SIZE_L: RegAddr = 4;
    pub const EBDM_SW_READ_POINTER_L: RegAddr = 6;
    pub const RBDM_SW_READ_POINTER_L: RegAddr = 8;
    pub const DMA_CTRL: RegAddr = 10;
    pub const EBDM_FPGA_WRITE_POINTER_L: RegAddr = 11;
    pub const RBDM_FPGA_WRITE_POINTER_L: RegAddr = 13;
    pub const TESTREG_DMA: RegAddr = 15;
    pub const SGENTRY_ADDR_LOW: RegAddr = 16;
    pub const SGENTRY_ADDR_HIGH: RegAddr = 17;
    pub const SGENTRY_LEN: RegAddr = 18;
    pub const SGENTRY_CTRL: RegAddr = 19;
    pub const EBDM_OFFSET_L: RegAddr = 22;
    pub const DESC_CNT_L: RegAddr = 24;
    pub const MAX_MC_WORDS: RegAddr = 36;
}

/// Per-channel data-path (GTX) registers, relative to the GTX window base.
pub mod gtx {
    use super::RegAddr;

    pub const TESTREG_DATA: RegAddr = 0;
    pub const DATAPATH_CFG: RegAddr = 1;
    pub const MC_PGEN_CFG_L: RegAddr = 2;
}

/// Bit positions within individual registers.
pub mod bits {
    pub const DMACTRL_DMA_EN: u32 = 0;
    pub const DMACTRL_FIFO_RST: u32 = 1;
    pub const DMACTRL_EBDM_EN: u32 = 2;
    pub const DMACTRL_RBDM_EN: u32 = 3;
    pub const DMACTRL_BUSY: u32 = 7;
    pub const DMACTRL_TRANS_SIZE_LSB: u32 = 16;
    /// Pulse-only, must never be cached in the software copy of `DMA_CTRL`.
    pub const DMACTRL_SYNC_SWRDPTRS: u32 = 31;

    pub const SGENTRY_CTRL_TARGET: u32 = 30;
    pub const SGENTRY_CTRL_WRITE_EN: u32 = 31;

    pub const DATAPATH_CFG_READY_FOR_DATA: u32 = 2;
}

/* ---------------------------------------------------------------------------------------------- */

pub(crate) use private::Sealed;
mod private {
    /// Seals [`super::RegisterFile`] for forward-compatibility reasons.
    pub trait Sealed {}
}

/// A 32-bit register bus window.
///
/// Registers do not have RAM semantics: values can change between reads, writes can have side
/// effects. Implementations must be safe to share between threads; the card tolerates concurrent
/// accesses to distinct registers.
///
/// This trait is _sealed_ and cannot be implemented by users of the crate.
pub trait RegisterFile: Debug + Send + Sync + Sealed {
    /// Read the register at word address `addr`.
    fn get_reg(&self, addr: RegAddr) -> io::Result<u32>;

    /// Write the register at word address `addr`.
    fn set_reg(&self, addr: RegAddr, value: u32) -> io::Result<()>;

    /// Read `out.len()` consecutive registers starting at `addr`.
    fn get_mem(&self, addr: RegAddr, out: &mut [u32]) -> io::Result<()>;

    /// Write `values` to consecutive registers starting at `addr`.
    ///
    /// The whole block is written in address order; hardware treats the write of the last word
    /// as the commit point for multi-word register sets.
    fn set_mem(&self, addr: RegAddr, values: &[u32]) -> io::Result<()>;

    /// Read a 64-bit value spread over two consecutive registers, low word first.
    fn get_reg64(&self, addr: RegAddr) -> io::Result<u64> {
        let mut words = [0u32; 2];
        self.get_mem(addr, &mut words)?;
        Ok(u64::from(words[0]) | u64::from(words[1]) << 32)
    }

    /// Write a 64-bit value to two consecutive registers, low word first.
    fn set_reg64(&self, addr: RegAddr, value: u64) -> io::Result<()> {
        self.set_mem(addr, &[value as u32, (value >> 32) as u32])
    }

    /// Read a single bit of the register at `addr`.
    fn get_bit(&self, addr: RegAddr, bit: u32) -> io::Result<bool> {
        Ok(self.get_reg(addr)? & (1 << bit) != 0)
    }

    /// Read-modify-write a single bit of the register at `addr`.
    fn set_bit(&self, addr: RegAddr, bit: u32, enable: bool) -> io::Result<()> {
        let value = self.get_reg(addr)?;
        let value = if enable {
            value | (1 << bit)
        } else {
            value & !(1 << bit)
        };
        self.set_reg(addr, value)
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// A [`RegisterFile`] backed by a memory-mapped BAR.
#[derive(Debug)]
pub struct BarRegisterFile {
    base: *mut u32,
    words: usize,
}

// Raw BAR access is safe to share: each access is a single volatile word transaction.
unsafe impl Send for BarRegisterFile {}
unsafe impl Sync for BarRegisterFile {}

impl BarRegisterFile {
    /// # Safety
    ///
    /// `base` must point to a live mapping of at least `words` 32-bit registers, 4-byte aligned,
    /// and the mapping must outlive the returned `BarRegisterFile`.
    pub unsafe fn new_raw(base: *mut u32, words: usize) -> BarRegisterFile {
        BarRegisterFile { base, words }
    }

    fn get_ptr(&self, addr: RegAddr, len: usize) -> io::Result<*mut u32> {
        if addr as usize + len > self.words {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "Register access [{:#x}, {:#x}) falls outside BAR of {:#x} words",
                    addr,
                    addr as usize + len,
                    self.words
                ),
            ));
        }

        Ok(unsafe { self.base.add(addr as usize) })
    }
}

impl Sealed for BarRegisterFile {}
impl RegisterFile for BarRegisterFile {
    fn get_reg(&self, addr: RegAddr) -> io::Result<u32> {
        let v = unsafe { self.get_ptr(addr, 1)?.read_volatile() };
        Ok(u32::from_le(v))
    }

    fn set_reg(&self, addr: RegAddr, value: u32) -> io::Result<()> {
        unsafe { self.get_ptr(addr, 1)?.write_volatile(value.to_le()) };
        Ok(())
    }

    fn get_mem(&self, addr: RegAddr, out: &mut [u32]) -> io::Result<()> {
        let ptr = self.get_ptr(addr, out.len())?;
        for (i, word) in out.iter_mut().enumerate() {
            *word = u32::from_le(unsafe { ptr.add(i).read_volatile() });
        }
        Ok(())
    }

    fn set_mem(&self, addr: RegAddr, values: &[u32]) -> io::Result<()> {
        let ptr = self.get_ptr(addr, values.len())?;
        for (i, word) in values.iter().enumerate() {
            unsafe { ptr.add(i).write_volatile(word.to_le()) };
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// A [`RegisterFile`] that redirects accesses into a sub-window of another register file,
/// offset by a fixed base address. Used for channel-relative addressing.
#[derive(Clone, Debug)]
pub struct WindowedRegisterFile {
    inner: Arc<dyn RegisterFile>,
    base: RegAddr,
}

impl WindowedRegisterFile {
    pub fn new(inner: Arc<dyn RegisterFile>, base: RegAddr) -> WindowedRegisterFile {
        WindowedRegisterFile { inner, base }
    }

    pub fn base(&self) -> RegAddr {
        self.base
    }
}

impl Sealed for WindowedRegisterFile {}
impl RegisterFile for WindowedRegisterFile {
    fn get_reg(&self, addr: RegAddr) -> io::Result<u32> {
        self.inner.get_reg(self.base + addr)
    }

    fn set_reg(&self, addr: RegAddr, value: u32) -> io::Result<()> {
        self.inner.set_reg(self.base + addr, value)
    }

    fn get_mem(&self, addr: RegAddr, out: &mut [u32]) -> io::Result<()> {
        self.inner.get_mem(self.base + addr, out)
    }

    fn set_mem(&self, addr: RegAddr, values: &[u32]) -> io::Result<()> {
        self.inner.set_mem(self.base + addr, values)
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(any(test, feature = "test-mocks"))]
pub use self::mem::MemRegisterFile;

#[cfg(any(test, feature = "test-mocks"))]
mod mem {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct MemRegs {
        regs: Vec<u32>,
        stuck: Vec<u32>,
        ro: Vec<u32>,
        reads: Vec<usize>,
        writes: Vec<usize>,
    }

    /// A RAM-backed [`RegisterFile`] for tests.
    ///
    /// Reads return the stored value OR-ed with a per-register stuck mask, so hardware status
    /// bits that software never clears (e.g. the DMA busy bit) can be pinned. A per-register
    /// read-only mask makes writes leave the masked bits unchanged, like the capacity halves
    /// of the scatter-gather count registers. Per-register read/write counters support
    /// polling-loop assertions.
    #[derive(Debug)]
    pub struct MemRegisterFile {
        inner: Mutex<MemRegs>,
    }

    impl MemRegisterFile {
        pub fn new(words: usize) -> MemRegisterFile {
            MemRegisterFile {
                inner: Mutex::new(MemRegs {
                    regs: vec![0; words],
                    stuck: vec![0; words],
                    ro: vec![0; words],
                    reads: vec![0; words],
                    writes: vec![0; words],
                }),
            }
        }

        /// Pin the given bits of a register to 1, regardless of writes.
        pub fn force_bits(&self, addr: RegAddr, mask: u32) {
            self.inner.lock().unwrap().stuck[addr as usize] |= mask;
        }

        /// Mark the given bits of a register as read-only; writes leave them unchanged.
        pub fn read_only_bits(&self, addr: RegAddr, mask: u32) {
            self.inner.lock().unwrap().ro[addr as usize] |= mask;
        }

        /// Preload a register value without counting a write.
        pub fn preload(&self, addr: RegAddr, value: u32) {
            self.inner.lock().unwrap().regs[addr as usize] = value;
        }

        /// The stored (not stuck-masked) value of a register.
        pub fn stored(&self, addr: RegAddr) -> u32 {
            self.inner.lock().unwrap().regs[addr as usize]
        }

        pub fn read_count(&self, addr: RegAddr) -> usize {
            self.inner.lock().unwrap().reads[addr as usize]
        }

        pub fn write_count(&self, addr: RegAddr) -> usize {
            self.inner.lock().unwrap().writes[addr as usize]
        }
    }

    impl Sealed for MemRegisterFile {}
    impl RegisterFile for MemRegisterFile {
        fn get_reg(&self, addr: RegAddr) -> io::Result<u32> {
            let mut inner = self.inner.lock().unwrap();
            check_range(addr, 1, inner.regs.len())?;
            inner.reads[addr as usize] += 1;
            Ok(inner.regs[addr as usize] | inner.stuck[addr as usize])
        }

        fn set_reg(&self, addr: RegAddr, value: u32) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            check_range(addr, 1, inner.regs.len())?;
            let a = addr as usize;
            inner.writes[a] += 1;
            inner.regs[a] = (inner.regs[a] & inner.ro[a]) | (value & !inner.ro[a]);
            Ok(())
        }

        fn get_mem(&self, addr: RegAddr, out: &mut [u32]) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            check_range(addr, out.len(), inner.regs.len())?;
            for (i, word) in out.iter_mut().enumerate() {
                let a = addr as usize + i;
                inner.reads[a] += 1;
                *word = inner.regs[a] | inner.stuck[a];
            }
            Ok(())
        }

        fn set_mem(&self, addr: RegAddr, values: &[u32]) -> io::Result<()> {
            let mut inner = self.inner.lock().unwrap();
            check_range(addr, values.len(), inner.regs.len())?;
            for (i, word) in values.iter().enumerate() {
                let a = addr as usize + i;
                inner.writes[a] += 1;
                inner.regs[a] = (inner.regs[a] & inner.ro[a]) | (*word & !inner.ro[a]);
            }
            Ok(())
        }
    }

    fn check_range(addr: RegAddr, len: usize, words: usize) -> io::Result<()> {
        if addr as usize + len > words {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "Register access falls outside register file",
            ));
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windowed_access_offsets_addresses() {
        let mem = Arc::new(MemRegisterFile::new(0x100));
        mem.preload(0x42, 0xdead_beef);

        let window = WindowedRegisterFile::new(mem.clone(), 0x40);
        assert_eq!(window.get_reg(0x02).unwrap(), 0xdead_beef);

        window.set_reg64(0x10, 0x1_0000_0002).unwrap();
        assert_eq!(mem.stored(0x50), 0x2);
        assert_eq!(mem.stored(0x51), 0x1);
    }

    #[test]
    fn bit_helpers_read_modify_write() {
        let mem = MemRegisterFile::new(0x10);
        mem.preload(3, 0b0100);

        assert!(mem.get_bit(3, 2).unwrap());
        assert!(!mem.get_bit(3, 0).unwrap());

        mem.set_bit(3, 0, true).unwrap();
        mem.set_bit(3, 2, false).unwrap();
        assert_eq!(mem.stored(3), 0b0001);
    }

    #[test]
    fn stuck_bits_survive_writes() {
        let mem = MemRegisterFile::new(0x10);
        mem.force_bits(5, 1 << 7);

        mem.set_reg(5, 0).unwrap();
        assert!(mem.get_bit(5, 7).unwrap());
    }

    #[test]
    fn read_only_bits_survive_writes() {
        let mem = MemRegisterFile::new(0x10);
        mem.preload(2, 0x0020_0000);
        mem.read_only_bits(2, 0xffff_0000);

        mem.set_reg(2, 0x0001_0005).unwrap();
        assert_eq!(mem.stored(2), 0x0020_0005);

        mem.set_mem(2, &[0x0000_0007]).unwrap();
        assert_eq!(mem.stored(2), 0x0020_0007);
    }

    #[test]
    fn out_of_range_access_fails() {
        let mem = MemRegisterFile::new(0x10);
        assert!(mem.get_reg(0x10).is_err());
        assert!(mem.set_mem(0x0f, &[0, 0]).is_err());
    }
}

/* ---------------------------------------------------------------------------------------------- */
