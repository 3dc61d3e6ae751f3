// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel register windows and data-path control.
//!
//! Channel n owns two register windows inside BAR 0: the DMA (packetizer) window at
//! `(n + 1) << CH_ADDR_SEL` and the data-path (GTX) window at a fixed offset above it.

/* ---------------------------------------------------------------------------------------------- */

use std::sync::Arc;

use log::debug;

use crate::dma::{DmaBuffer, DmaChannel};
use crate::error::{Error, Result};
use crate::registers::{bits, dev, gtx, RegisterFile, WindowedRegisterFile};

/* ---------------------------------------------------------------------------------------------- */

/// What feeds the channel's data path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataSource {
    /// Data path off.
    Disable = 0,
    /// The front-end interface module.
    Flim = 1,
    /// The embedded pattern generator.
    Pgen = 2,
}

/// One readout channel of a probed device.
#[derive(Debug)]
pub struct Channel {
    index: usize,
    rf_pkt: Arc<WindowedRegisterFile>,
    rf_gtx: WindowedRegisterFile,
}

impl Channel {
    pub(crate) fn new(index: usize, rf: Arc<dyn RegisterFile>) -> Channel {
        let base = ((index as u32) + 1) << dev::CH_ADDR_SEL;
        Channel {
            index,
            rf_pkt: Arc::new(WindowedRegisterFile::new(rf.clone(), base)),
            rf_gtx: WindowedRegisterFile::new(rf, base + (1 << dev::DMA_ADDR_SEL)),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_data_source(&self, source: DataSource) -> Result<()> {
        let cfg = self.rf_gtx.get_reg(gtx::DATAPATH_CFG)?;
        self.rf_gtx
            .set_reg(gtx::DATAPATH_CFG, (cfg & !0x3) | source as u32)?;
        debug!("channel {}: data source set to {:?}", self.index, source);
        Ok(())
    }

    pub fn data_source(&self) -> Result<DataSource> {
        Ok(match self.rf_gtx.get_reg(gtx::DATAPATH_CFG)? & 0x3 {
            0 => DataSource::Disable,
            1 => DataSource::Flim,
            2 => DataSource::Pgen,
            other => {
                return Err(Error::Configuration(format!(
                    "invalid data source selector {}",
                    other
                )))
            }
        })
    }

    /// Tell the data path that host buffers are ready to receive.
    pub fn set_ready_for_data(&self, enable: bool) -> Result<()> {
        Ok(self
            .rf_gtx
            .set_bit(gtx::DATAPATH_CFG, bits::DATAPATH_CFG_READY_FOR_DATA, enable)?)
    }

    pub fn ready_for_data(&self) -> Result<bool> {
        Ok(self
            .rf_gtx
            .get_bit(gtx::DATAPATH_CFG, bits::DATAPATH_CFG_READY_FOR_DATA)?)
    }

    pub fn enable_readout(&self) -> Result<()> {
        self.set_ready_for_data(true)
    }

    pub fn disable_readout(&self) -> Result<()> {
        self.set_ready_for_data(false)
    }

    /// Set up the channel's DMA controller over the given buffer pair and bring it to the
    /// enabled state.
    pub fn init_dma(
        &self,
        data: DmaBuffer,
        desc: DmaBuffer,
        transfer_size: usize,
    ) -> Result<DmaChannel> {
        let rf: Arc<dyn RegisterFile> = self.rf_pkt.clone();
        let mut dma = DmaChannel::new(rf, data, desc, transfer_size)?;
        dma.configure()?;
        dma.enable()?;
        Ok(dma)
    }
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
