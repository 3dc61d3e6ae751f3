// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scatter-gather descriptor translation.
//!
//! The card walks its DMA buffers through an on-board descriptor table per buffer. Each table
//! entry maps one physically contiguous segment; the hardware address field is 64 bits but the
//! length field is 32 bits, so host segments of 4 GiB or more are split before being written.
//!
//! Entries are staged in a three-word mailbox and committed to the selected table through the
//! control register. The table is terminated by an all-zero entry; the `N_SG_CONFIG` register
//! mirrors the configured entry count (bits [15:0]) and exposes the table capacity
//! (bits [31:16], read-only).

/* ---------------------------------------------------------------------------------------------- */

use log::debug;

use crate::error::{Error, Result};
use crate::registers::{bits, pkt, RegAddr, RegisterFile};

/* ---------------------------------------------------------------------------------------------- */

/// One physically contiguous segment of a pinned host buffer, as reported by the physical
/// buffer provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PhysicalSegment {
    pub pointer: u64,
    pub length: u64,
}

/// One hardware descriptor table entry, 12 bytes, written verbatim to the mailbox.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct HwSgEntry {
    pub addr_low: u32,
    pub addr_high: u32,
    pub length: u32,
}

/// Selects which of the channel's two descriptor tables an operation targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SgTable {
    /// The data (event) buffer table.
    Data = 0,
    /// The descriptor (report) buffer table.
    Desc = 1,
}

impl SgTable {
    fn n_sg_config(self) -> RegAddr {
        match self {
            SgTable::Data => pkt::EBDM_N_SG_CONFIG,
            SgTable::Desc => pkt::RBDM_N_SG_CONFIG,
        }
    }
}

/* ---------------------------------------------------------------------------------------------- */

/// Length of a split-off entry: one page short of 4 GiB, so the follow-up entry stays
/// page-aligned.
pub fn max_entry_length() -> u64 {
    (1 << 32) - page_size::get() as u64
}

/// Convert a physical scatter-gather list into hardware table entries, splitting every segment
/// whose length does not fit the 32-bit length field.
pub fn convert_sg_list(segments: &[PhysicalSegment]) -> Vec<HwSgEntry> {
    let mut entries = Vec::with_capacity(segments.len());

    for segment in segments {
        let mut addr = segment.pointer;
        let mut length = segment.length;

        while length >> 32 != 0 {
            let chunk = max_entry_length();
            entries.push(HwSgEntry {
                addr_low: addr as u32,
                addr_high: (addr >> 32) as u32,
                length: chunk as u32,
            });
            addr += chunk;
            length -= chunk;
        }
        entries.push(HwSgEntry {
            addr_low: addr as u32,
            addr_high: (addr >> 32) as u32,
            length: length as u32,
        });
    }

    entries
}

/* ---------------------------------------------------------------------------------------------- */

/// Capacity of the selected hardware table, in entries.
pub fn max_sg_entries(rf: &dyn RegisterFile, table: SgTable) -> Result<usize> {
    Ok((rf.get_reg(table.n_sg_config())? >> 16) as usize)
}

/// Number of entries currently configured in the selected table.
pub fn configured_sg_entries(rf: &dyn RegisterFile, table: SgTable) -> Result<usize> {
    Ok((rf.get_reg(table.n_sg_config())? & 0xffff) as usize)
}

/// Write a converted entry list into the selected table, append the zero terminator and update
/// the configured-entry count.
///
/// Fails with [`Error::CapacityExceeded`] before any mailbox write if the list does not fit.
/// Re-invocation fully overwrites the previous table.
pub fn write_sg_list(
    rf: &dyn RegisterFile,
    table: SgTable,
    entries: &[HwSgEntry],
) -> Result<()> {
    let capacity = max_sg_entries(rf, table)?;
    if entries.len() > capacity {
        return Err(Error::CapacityExceeded {
            entries: entries.len(),
            capacity,
        });
    }

    debug!(
        "writing {} sg entries to {:?} table (capacity {})",
        entries.len(),
        table,
        capacity
    );

    for (buf_addr, entry) in entries.iter().enumerate() {
        write_sg_entry(rf, table, buf_addr as u32, *entry)?;
    }
    // trailing zero entry marks the end of the table
    write_sg_entry(rf, table, entries.len() as u32, HwSgEntry::default())?;

    // count register is informational, the DMA engine stops at the terminator
    rf.set_reg(table.n_sg_config(), entries.len() as u32)?;
    Ok(())
}

fn write_sg_entry(
    rf: &dyn RegisterFile,
    table: SgTable,
    buf_addr: u32,
    entry: HwSgEntry,
) -> Result<()> {
    rf.set_mem(
        pkt::SGENTRY_ADDR_LOW,
        &[entry.addr_low, entry.addr_high, entry.length],
    )?;

    let sg_ctrl = (1 << bits::SGENTRY_CTRL_WRITE_EN)
        | ((table as u32) << bits::SGENTRY_CTRL_TARGET)
        | buf_addr;
    rf.set_reg(pkt::SGENTRY_CTRL, sg_ctrl)?;
    Ok(())
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockRegisterFile;
    use crate::registers::MemRegisterFile;
    use mockall::predicate::eq;
    use mockall::Sequence;

    #[test]
    fn small_segments_pass_through() {
        let segments = [
            PhysicalSegment {
                pointer: 0x1000,
                length: 0x2000,
            },
            PhysicalSegment {
                pointer: 0x4000,
                length: 0x1000,
            },
        ];

        let entries = convert_sg_list(&segments);
        assert_eq!(
            entries,
            [
                HwSgEntry {
                    addr_low: 0x1000,
                    addr_high: 0,
                    length: 0x2000
                },
                HwSgEntry {
                    addr_low: 0x4000,
                    addr_high: 0,
                    length: 0x1000
                },
            ]
        );
    }

    #[test]
    fn oversized_segment_is_split() {
        let length = 0x1_0000_0001u64;
        let entries = convert_sg_list(&[PhysicalSegment {
            pointer: 0x10_0000,
            length,
        }]);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].length as u64, max_entry_length());
        assert_eq!(
            entries[1].length as u64 + entries[0].length as u64,
            length
        );
        let second_addr =
            u64::from(entries[1].addr_low) | u64::from(entries[1].addr_high) << 32;
        assert_eq!(second_addr, 0x10_0000 + max_entry_length());
    }

    #[test]
    fn split_conserves_total_length() {
        let segments = [
            PhysicalSegment {
                pointer: 0,
                length: 0x2_0000_0000,
            },
            PhysicalSegment {
                pointer: 0x4_0000_0000,
                length: 0x8000,
            },
        ];

        let entries = convert_sg_list(&segments);
        let total: u64 = entries.iter().map(|e| u64::from(e.length)).sum();
        assert_eq!(total, 0x2_0000_0000 + 0x8000);
    }

    #[test]
    fn table_write_commits_entries_terminator_and_count() {
        let mut rf = MockRegisterFile::new();
        let mut seq = Sequence::new();

        rf.expect_get_reg()
            .with(eq(pkt::EBDM_N_SG_CONFIG))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(32 << 16));

        let mailbox = [
            [0x1000u32, 0, 0x2000],
            [0x4000, 0, 0x1000],
            [0, 0, 0], // terminator
        ];
        for (i, words) in mailbox.iter().enumerate() {
            let words = *words;
            rf.expect_set_mem()
                .withf(move |addr, values| {
                    *addr == pkt::SGENTRY_ADDR_LOW && values == words
                })
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
            rf.expect_set_reg()
                .with(
                    eq(pkt::SGENTRY_CTRL),
                    eq((1u32 << bits::SGENTRY_CTRL_WRITE_EN) | i as u32),
                )
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        rf.expect_set_reg()
            .with(eq(pkt::EBDM_N_SG_CONFIG), eq(2))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let entries = convert_sg_list(&[
            PhysicalSegment {
                pointer: 0x1000,
                length: 0x2000,
            },
            PhysicalSegment {
                pointer: 0x4000,
                length: 0x1000,
            },
        ]);
        write_sg_list(&rf, SgTable::Data, &entries).unwrap();
    }

    #[test]
    fn rewriting_the_table_keeps_the_capacity_readable() {
        let rf = MemRegisterFile::new(0x20);
        rf.preload(pkt::EBDM_N_SG_CONFIG, 8 << 16);
        rf.read_only_bits(pkt::EBDM_N_SG_CONFIG, 0xffff_0000);

        let entries = [HwSgEntry {
            addr_low: 0x1000,
            addr_high: 0,
            length: 0x1000,
        }];
        write_sg_list(&rf, SgTable::Data, &entries).unwrap();
        assert_eq!(max_sg_entries(&rf, SgTable::Data).unwrap(), 8);
        assert_eq!(configured_sg_entries(&rf, SgTable::Data).unwrap(), 1);

        // the count write must not have clobbered the capacity for a second pass
        write_sg_list(&rf, SgTable::Data, &entries).unwrap();
    }

    #[test]
    fn capacity_overflow_commits_nothing() {
        let mut rf = MockRegisterFile::new();
        rf.expect_get_reg()
            .with(eq(pkt::RBDM_N_SG_CONFIG))
            .returning(|_| Ok(1 << 16));
        // no set_mem/set_reg expectations: any mailbox write would fail the test

        let entries = [HwSgEntry::default(); 2];
        match write_sg_list(&rf, SgTable::Desc, &entries) {
            Err(Error::CapacityExceeded { entries: 2, capacity: 1 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

/* ---------------------------------------------------------------------------------------------- */
