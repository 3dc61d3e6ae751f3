// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stateful validators for generated microslice streams.
//!
//! The card's pattern generators emit self-describing content; these checkers are the test
//! oracle for the whole readout path. Microslices of one channel are treated as a consecutive
//! stream: counters embedded in the content (frame numbers, packet numbers) must continue
//! across microslice boundaries.
//!
//! A checker is selected once per stream from the first descriptor's `(sys_id, sys_ver)` pair.
//! Counters start *untrained*: the first record trains them and is exempt from continuity
//! checks. On a failed check the diagnostic is logged and `false` is returned; checker state is
//! not rolled back, so an immediately following inconsistent record is reported independently.

/* ---------------------------------------------------------------------------------------------- */

use log::error;

use crate::microslice::{flags, subsystem, Microslice, MicrosliceDescriptor};

/* ---------------------------------------------------------------------------------------------- */

fn u16_at(c: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([c[i], c[i + 1]])
}

fn u32_at(c: &[u8], i: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&c[i..i + 4]);
    u32::from_le_bytes(b)
}

fn u64_at(c: &[u8], i: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&c[i..i + 8]);
    u64::from_le_bytes(b)
}

/* ---------------------------------------------------------------------------------------------- */

/// Validator for one channel's microslice stream, dispatched by
/// [`PatternChecker::create`].
#[derive(Debug)]
pub enum PatternChecker {
    /// Unknown subsystem; accepts everything.
    Generic,
    /// CBMnet frames from the FLIB generation of the card.
    FlibLegacy(FlibLegacyChecker),
    /// The FLIB pattern generator.
    Flib(FlibChecker),
    /// The FLIM pattern generator.
    Flim(FlimChecker),
    /// The DPB prototype pattern generator.
    PgenDpb(PgenDpbChecker),
}

impl PatternChecker {
    /// Select the checker for a stream from its first descriptor.
    pub fn create(sys_id: u8, sys_ver: u8) -> PatternChecker {
        match (sys_id, sys_ver) {
            (subsystem::ID_FLES, subsystem::FMT_CBMNET)
            | (subsystem::ID_FLES, subsystem::FMT_CBMNET_FRONTEND) => {
                PatternChecker::FlibLegacy(FlibLegacyChecker::default())
            }
            (subsystem::ID_FLES, subsystem::FMT_FLIB_PATTERN) => {
                PatternChecker::Flib(FlibChecker::default())
            }
            (subsystem::ID_FLES, subsystem::FMT_FLIM_PATTERN) => {
                PatternChecker::Flim(FlimChecker::default())
            }
            (subsystem::ID_FLES, subsystem::FMT_PGEN_DPB) => {
                PatternChecker::PgenDpb(PgenDpbChecker::default())
            }
            _ => PatternChecker::Generic,
        }
    }

    pub fn check(&mut self, m: &Microslice) -> bool {
        if m.content.len() < m.desc.size as usize {
            error!(
                "microslice {}: content is {} bytes, descriptor says {}",
                m.desc.idx,
                m.content.len(),
                m.desc.size
            );
            return false;
        }
        match self {
            PatternChecker::Generic => true,
            PatternChecker::FlibLegacy(c) => c.check(m),
            PatternChecker::Flib(c) => c.check(m),
            PatternChecker::Flim(c) => c.check(m),
            PatternChecker::PgenDpb(c) => c.check(m),
        }
    }

    /// Forget all trained counters, as at the start of an independent stream partition.
    pub fn reset(&mut self) {
        match self {
            PatternChecker::Generic => {}
            PatternChecker::FlibLegacy(c) => *c = FlibLegacyChecker::default(),
            PatternChecker::Flib(c) => *c = FlibChecker::default(),
            PatternChecker::Flim(c) => *c = FlimChecker::default(),
            PatternChecker::PgenDpb(c) => *c = PgenDpbChecker::default(),
        }
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// FLIB pattern generator content: a last-word-size trailer byte, a `0xBBFF` header word, an
/// incrementing 32-bit packet number, 64-bit ramp words and a `0xFA`-filled last word.
#[derive(Debug, Default)]
pub struct FlibChecker {
    packet_number: Option<u32>,
}

impl FlibChecker {
    fn check(&mut self, m: &Microslice) -> bool {
        let size = m.desc.size as usize;
        let content = m.content;

        if let Some(n) = self.packet_number {
            self.packet_number = Some(n.wrapping_add(1));
        }

        let mut last_word_size = 0usize;
        if size >= 1 {
            last_word_size = content[0] as usize;
            if last_word_size > 8 {
                error!("flib pgen: last word size {} out of bounds", last_word_size);
                return false;
            }
            if m.desc.flags & flags::OVERFLOW_FLIM == 0 {
                if size & 0x7 != last_word_size & 0x7 {
                    error!(
                        "flib pgen: last word size {} inconsistent with content size {}",
                        last_word_size, size
                    );
                    return false;
                }
            } else {
                // truncated, skip the last word checks below
                last_word_size = 0;
            }
        }

        if size >= 4 && u16_at(content, 2) != 0xbbff {
            error!("flib pgen: bad header word {:#06x}", u16_at(content, 2));
            return false;
        }

        if size >= 8 {
            let packet_number = u32_at(content, 4);
            match self.packet_number {
                Some(expected) if expected != packet_number => {
                    error!(
                        "flib pgen: packet number {:#x}, expected {:#x}",
                        packet_number, expected
                    );
                    return false;
                }
                Some(_) => {}
                None => self.packet_number = Some(packet_number),
            }
        }

        // the ramp covers everything from the second word up to the last word; with an empty
        // last word the final full word is still a ramp word
        if size > 8 {
            let ramp_limit = if last_word_size == 0 { 8 } else { 9 };
            let mut ramp: u64 = 0xabcd_0000_0000_0000;
            let mut pos = 1usize;
            while pos <= (size - ramp_limit) / 8 {
                let word = u64_at(content, pos * 8);
                if word != ramp {
                    error!("flib pgen: ramp word {:#x}, expected {:#x}", word, ramp);
                    return false;
                }
                ramp += 1;
                pos += 1;
            }

            let last_word_start = pos * 8;
            for i in 0..last_word_size {
                if content[last_word_start + i] != 0xfa {
                    error!("flib pgen: bad last word byte at {}", i);
                    return false;
                }
            }
        }

        true
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// FLIM pattern generator content: like the FLIB pattern but with 256-bit words, a 64-bit
/// timestamp equal to the descriptor index and an `0xA0 + pos` last word.
#[derive(Debug, Default)]
pub struct FlimChecker {
    packet_number: Option<u32>,
}

impl FlimChecker {
    fn check(&mut self, m: &Microslice) -> bool {
        let size = m.desc.size as usize;
        let content = m.content;

        if let Some(n) = self.packet_number {
            self.packet_number = Some(n.wrapping_add(1));
        }

        let mut last_word_size = 0usize;
        if size >= 1 {
            last_word_size = content[0] as usize;
            if last_word_size > 32 {
                error!("flim pgen: last word size {} out of bounds", last_word_size);
                return false;
            }
            if m.desc.flags & flags::OVERFLOW_FLIM == 0 {
                if size & 0x1f != last_word_size & 0x1f {
                    error!(
                        "flim pgen: last word size {} inconsistent with content size {}",
                        last_word_size, size
                    );
                    return false;
                }
            } else {
                last_word_size = 0;
            }
        }

        if size >= 4 && u16_at(content, 2) != 0xbbff {
            error!("flim pgen: bad header word {:#06x}", u16_at(content, 2));
            return false;
        }

        if size >= 8 {
            let packet_number = u32_at(content, 4);
            match self.packet_number {
                Some(expected) if expected != packet_number => {
                    error!(
                        "flim pgen: packet number {:#x}, expected {:#x}",
                        packet_number, expected
                    );
                    return false;
                }
                Some(_) => {}
                None => self.packet_number = Some(packet_number),
            }
        }

        if size >= 16 {
            let timestamp = u64_at(content, 8);
            if timestamp != m.desc.idx {
                error!(
                    "flim pgen: timestamp {:#x}, expected {:#x}",
                    timestamp, m.desc.idx
                );
                return false;
            }
        }

        // number of full 256-bit words from the ramp generator
        let mut size256 = size / 32;
        if last_word_size == 32 && size256 > 0 {
            // the last full 256-bit word is the generator's trailer, not ramp
            size256 -= 1;
        }
        let mut size64 = size256 * 4;
        if size < 32 {
            // header word doubles as a truncated last word
            size64 = size / 8;
        }

        for pos in 2..size64 {
            let expected = 0xabcd_0000_0000_0000u64 + (pos as u64 - 2);
            let word = u64_at(content, pos * 8);
            if word != expected {
                error!(
                    "flim pgen: ramp word {} is {:#x}, expected {:#x}",
                    pos - 2,
                    word,
                    expected
                );
                return false;
            }
        }

        if size > 32 {
            let last_word_start = size256 * 32;
            for pos in 0..last_word_size {
                let byte = content[last_word_start + pos];
                let expected = 0xa0 + pos as u8;
                if byte != expected {
                    error!(
                        "flim pgen: last word byte {} is {:#04x}, expected {:#04x}",
                        pos, byte, expected
                    );
                    return false;
                }
            }
        }

        true
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// CBMnet frame content from the FLIB hardware generation: the descriptor head repeated in the
/// first 16 content bytes, then 16-bit frame words with modulo-256 frame numbers; the pgen
/// format additionally carries `0xBCnn` filler words and a modulo-2^16 sequence number.
#[derive(Debug, Default)]
pub struct FlibLegacyChecker {
    frame_number: Option<u8>,
    pgen_sequence_number: Option<u16>,
}

impl FlibLegacyChecker {
    fn check(&mut self, m: &Microslice) -> bool {
        if m.desc.size < 16 || m.content[..16] != m.desc.head_bytes() {
            error!("flib legacy: descriptor head not repeated in content");
            return false;
        }

        let words: Vec<u16> = m.content[16..m.desc.size as usize]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        self.check_cbmnet_frames(&words, m.desc.sys_id, m.desc.sys_ver)
    }

    fn check_cbmnet_frames(&mut self, words: &[u16], sys_id: u8, sys_ver: u8) -> bool {
        let mut i = 0usize;
        while i < words.len() {
            let frame_number = (words[i] >> 8) as u8;
            let word_count = (words[i] & 0xff) as usize + 1;
            let padding_count = (4 - ((word_count + 1) & 0x3)) & 0x3;
            i += 1;

            if let Some(previous) = self.frame_number {
                let expected = previous.wrapping_add(1);
                if frame_number != expected {
                    error!(
                        "flib legacy: frame number {}, expected {}",
                        frame_number, expected
                    );
                    return false;
                }
            }
            self.frame_number = Some(frame_number);

            if !(4..=64).contains(&word_count) || i + word_count + padding_count > words.len() {
                error!("flib legacy: invalid frame word count {}", word_count);
                return false;
            }

            if sys_id == subsystem::ID_FLES && sys_ver == subsystem::FMT_CBMNET {
                if !self.check_content_pgen(&words[i..i + word_count]) {
                    return false;
                }
            }
            i += word_count + padding_count;
        }

        true
    }

    fn check_content_pgen(&mut self, words: &[u16]) -> bool {
        if words[0] != 0 {
            error!("flib legacy: unexpected source address {:#x}", words[0]);
            return false;
        }

        for (i, word) in words.iter().enumerate().take(words.len() - 1).skip(1) {
            let low = (word & 0xff) as u8;
            let high = (word >> 8) as u8;
            if high != 0xbc || low != (i - 1) as u8 {
                error!("flib legacy: unexpected filler word {:#06x}", word);
                return false;
            }
        }

        let sequence_number = words[words.len() - 1];
        if let Some(previous) = self.pgen_sequence_number {
            let expected = previous.wrapping_add(1);
            if sequence_number != expected {
                error!(
                    "flib legacy: pgen sequence number {}, expected {}",
                    sequence_number, expected
                );
                self.pgen_sequence_number = Some(sequence_number);
                return false;
            }
        }
        self.pgen_sequence_number = Some(sequence_number);

        true
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Expected top byte of every DPB pgen word.
const PGEN_DPB_DATA_HEAD: u64 = 0xab;
/// Upper bound for the front-end id field.
const PGEN_DPB_MAX_FLIM_ID: u64 = 16;
/// Number of interleaved per-fifo ramps.
const PGEN_DPB_FIFOS: usize = 16;

/// DPB prototype pattern: 64-bit words carrying a constant head byte, a per-stream front-end
/// id and interleaved per-fifo 40-bit ramps.
#[derive(Debug, Default)]
pub struct PgenDpbChecker {
    flim_id: Option<u8>,
}

impl PgenDpbChecker {
    fn check(&mut self, m: &Microslice) -> bool {
        let size = m.desc.size as usize;
        if size % 8 != 0 {
            error!(
                "dpb pgen: content size {} not a multiple of 8 (microslice {})",
                size, m.desc.idx
            );
            return false;
        }
        if size < 8 {
            return true;
        }

        let first = u64_at(m.content, 0);

        let data_head = first >> 56;
        if data_head != PGEN_DPB_DATA_HEAD {
            error!("dpb pgen: bad data head {:#x}", data_head);
            return false;
        }

        let flim_id = (first & 0x00ff_0000_0000_0000) >> 48;
        if flim_id >= PGEN_DPB_MAX_FLIM_ID {
            error!("dpb pgen: front-end id {:#x} out of range", flim_id);
            return false;
        }
        match self.flim_id {
            Some(id) if u64::from(id) != flim_id => {
                error!("dpb pgen: front-end id changed to {:#x}", flim_id);
                return false;
            }
            Some(_) => {}
            None => self.flim_id = Some(flim_id as u8),
        }

        let mut fifo_ramps = [0u64; PGEN_DPB_FIFOS];
        for (i, ramp) in fifo_ramps.iter_mut().enumerate() {
            *ramp = (first & 0xffff_0000_0000_0000) + ((i as u64) << 40);
        }

        for pos in 0..size / 8 {
            let word = u64_at(m.content, pos * 8);
            let fifo_id = ((word & 0x0000_ff00_0000_0000) >> 40) as usize;
            if fifo_id >= PGEN_DPB_FIFOS {
                error!("dpb pgen: fifo id {:#x} out of range", fifo_id);
                return false;
            }
            if word != fifo_ramps[fifo_id] {
                error!(
                    "dpb pgen: ramp word {:#x}, expected {:#x}",
                    word, fifo_ramps[fifo_id]
                );
                return false;
            }
            // 40-bit counter with explicit wrap
            if fifo_ramps[fifo_id] & 0x0000_00ff_ffff_ffff == 0xff_ffff_ffff {
                fifo_ramps[fifo_id] &= 0xffff_ff00_0000_0000;
            } else {
                fifo_ramps[fifo_id] += 1;
            }
        }

        true
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Per-stream validator: fixes the checker and the reference descriptor on the first
/// microslice, then applies descriptor, pattern and CRC checks to every record.
#[derive(Debug, Default)]
pub struct StreamValidator {
    checker: Option<PatternChecker>,
    reference: Option<MicrosliceDescriptor>,
    microslice_count: u64,
    error_count: u64,
}

impl StreamValidator {
    pub fn new() -> StreamValidator {
        StreamValidator::default()
    }

    /// Check one microslice against the stream. Never aborts the stream; inconsistencies are
    /// counted and logged.
    pub fn put(&mut self, m: &Microslice) -> bool {
        self.microslice_count += 1;

        let reference = *self.reference.get_or_insert(m.desc);
        let checker = self
            .checker
            .get_or_insert_with(|| PatternChecker::create(m.desc.sys_id, m.desc.sys_ver));

        let mut ok = true;

        if !m.desc.has_valid_header() {
            error!("microslice {}: unknown descriptor header format", m.desc.idx);
            ok = false;
        }

        if m.desc.eq_id != reference.eq_id
            || m.desc.sys_id != reference.sys_id
            || m.desc.sys_ver != reference.sys_ver
        {
            error!("microslice {}: descriptor fields changed mid-stream", m.desc.idx);
            ok = false;
        }

        if m.desc.flags & flags::OVERFLOW_FLIM != 0 {
            error!("microslice {}: truncated by the front-end", m.desc.idx);
            ok = false;
        }

        if !checker.check(m) {
            error!("microslice {}: pattern error", m.desc.idx);
            ok = false;
        }

        if m.desc.flags & flags::CRC_VALID != 0 && !m.check_crc() {
            error!("microslice {}: crc failure", m.desc.idx);
            ok = false;
        }

        if !ok {
            self.error_count += 1;
        }
        ok
    }

    /// Reset the pattern checker at the start of an independent stream partition. The checker
    /// selection and reference descriptor are kept.
    pub fn reset(&mut self) {
        if let Some(checker) = &mut self.checker {
            checker.reset();
        }
    }

    pub fn microslice_count(&self) -> u64 {
        self.microslice_count
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
