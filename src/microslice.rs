// SPDX-License-Identifier: MIT OR Apache-2.0

//! The microslice wire format.
//!
//! Hardware writes one 32-byte [`MicrosliceDescriptor`] per microslice into the descriptor
//! buffer, and the variable-length content into the data buffer at the descriptor's byte
//! `offset`. The descriptor layout is fixed in hardware; all fields are little-endian.

/* ---------------------------------------------------------------------------------------------- */

use crc::{Crc, CRC_32_ISCSI};

/* ---------------------------------------------------------------------------------------------- */

/// Value of [`MicrosliceDescriptor::hdr_id`] for all valid descriptors.
pub const HDR_ID: u8 = 0xdd;
/// Value of [`MicrosliceDescriptor::hdr_ver`] for the descriptor revision handled here.
pub const HDR_VER: u8 = 0x01;

/// Bits of [`MicrosliceDescriptor::flags`].
pub mod flags {
    /// The `crc` field holds a valid CRC-32C of the content.
    pub const CRC_VALID: u16 = 1;
    /// The microslice was truncated by the front-end because it exceeded the size limit.
    pub const OVERFLOW_FLIM: u16 = 2;
}

/// Subsystem identifiers and format versions used to select a stream validator.
pub mod subsystem {
    /// The readout system's own equipment (pattern generators, front-end emulation).
    pub const ID_FLES: u8 = 0x40;

    pub const FMT_BASIC_RAMP: u8 = 1;
    pub const FMT_CBMNET: u8 = 2;
    pub const FMT_CBMNET_FRONTEND: u8 = 3;
    pub const FMT_FLIB_PATTERN: u8 = 4;
    pub const FMT_FLIM_PATTERN: u8 = 5;
    pub const FMT_PGEN_DPB: u8 = 6;
}

/* ---------------------------------------------------------------------------------------------- */

/// Descriptor record written by hardware into the descriptor buffer. Exactly 32 bytes, all
/// fields naturally aligned.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct MicrosliceDescriptor {
    pub hdr_id: u8,
    pub hdr_ver: u8,
    pub eq_id: u16,
    pub flags: u16,
    pub sys_id: u8,
    pub sys_ver: u8,
    /// Microslice index (start time); strictly increasing along a channel's stream.
    pub idx: u64,
    pub crc: u32,
    /// Content size in bytes.
    pub size: u32,
    /// Free-running byte offset of the content in the data buffer.
    pub offset: u64,
}

impl MicrosliceDescriptor {
    /// Whether the fixed header fields hold the expected identifier and version.
    pub fn has_valid_header(&self) -> bool {
        self.hdr_id == HDR_ID && self.hdr_ver == HDR_VER
    }

    /// The first 16 descriptor bytes, as they appear embedded in some content formats.
    pub fn head_bytes(&self) -> [u8; 16] {
        let mut head = [0u8; 16];
        head[0] = self.hdr_id;
        head[1] = self.hdr_ver;
        head[2..4].copy_from_slice(&self.eq_id.to_le_bytes());
        head[4..6].copy_from_slice(&self.flags.to_le_bytes());
        head[6] = self.sys_id;
        head[7] = self.sys_ver;
        head[8..16].copy_from_slice(&self.idx.to_le_bytes());
        head
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// One decoded microslice: its descriptor plus a contiguous copy of (or view into) its content.
#[derive(Clone, Copy, Debug)]
pub struct Microslice<'a> {
    pub desc: MicrosliceDescriptor,
    pub content: &'a [u8],
}

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

impl Microslice<'_> {
    /// CRC-32C (Castagnoli) of the content.
    pub fn compute_crc(&self) -> u32 {
        CRC32C.checksum(self.content)
    }

    /// Whether the descriptor CRC matches the content. Only meaningful if
    /// [`flags::CRC_VALID`] is set.
    pub fn check_crc(&self) -> bool {
        self.compute_crc() == self.desc.crc
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_32_bytes() {
        assert_eq!(std::mem::size_of::<MicrosliceDescriptor>(), 32);
        assert_eq!(std::mem::align_of::<MicrosliceDescriptor>(), 8);
    }

    #[test]
    fn head_bytes_match_in_memory_layout() {
        let desc = MicrosliceDescriptor {
            hdr_id: HDR_ID,
            hdr_ver: HDR_VER,
            eq_id: 0xe003,
            flags: flags::CRC_VALID,
            sys_id: subsystem::ID_FLES,
            sys_ver: subsystem::FMT_FLIM_PATTERN,
            idx: 0x0102_0304_0506_0708,
            crc: 0,
            size: 64,
            offset: 128,
        };

        let raw = unsafe {
            std::slice::from_raw_parts(&desc as *const _ as *const u8, 16)
        };
        assert_eq!(&desc.head_bytes()[..], raw);
    }

    #[test]
    fn crc32c_known_value() {
        // "123456789" is the standard CRC check input; CRC-32C yields 0xe3069283.
        let ms = Microslice {
            desc: MicrosliceDescriptor {
                crc: 0xe306_9283,
                ..Default::default()
            },
            content: b"123456789",
        };
        assert_eq!(ms.compute_crc(), 0xe306_9283);
        assert!(ms.check_crc());
    }
}

/* ---------------------------------------------------------------------------------------------- */
