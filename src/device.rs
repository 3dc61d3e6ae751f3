// SPDX-License-Identifier: MIT OR Apache-2.0

//! Device-level probing and channel enumeration.

/* ---------------------------------------------------------------------------------------------- */

use std::sync::Arc;

use log::info;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::registers::{dev, RegisterFile};

/* ---------------------------------------------------------------------------------------------- */

/// Hardware versions this crate knows how to drive.
const SUPPORTED_HW_VERSIONS: [u32; 1] = [dev::HARDWARE_VERSION];

/// Build information read back from the card's static registers.
#[derive(Clone, Copy, Debug)]
pub struct DeviceInfo {
    pub hardware_version: u16,
    /// Unix timestamp of the firmware build.
    pub build_date: u64,
    /// Whether the firmware was built from a clean working tree.
    pub build_clean: bool,
    /// Seconds since the card came out of reset.
    pub uptime: u32,
}

/// A probed readout card, addressed through BAR 0.
#[derive(Debug)]
pub struct Device {
    rf: Arc<dyn RegisterFile>,
    hardware_version: u16,
}

impl Device {
    /// Probe the card behind the given register file.
    ///
    /// Enforces the hardware magic number and a supported hardware version before anything
    /// else touches the device.
    pub fn new(rf: Arc<dyn RegisterFile>) -> Result<Device> {
        let hardware_info = rf.get_reg(dev::HARDWARE_INFO)?;

        let magic = hardware_info & 0xffff;
        if magic != dev::HARDWARE_ID {
            return Err(Error::Configuration(format!(
                "hardware magic number mismatch: read {:#06x}, expected {:#06x}",
                magic,
                dev::HARDWARE_ID
            )));
        }

        let hardware_version = hardware_info >> 16;
        if !SUPPORTED_HW_VERSIONS.contains(&hardware_version)
            || hardware_version > dev::HARDWARE_VERSION
        {
            return Err(Error::Configuration(format!(
                "unsupported hardware version {}",
                hardware_version
            )));
        }

        info!("probed readout card, hardware version {}", hardware_version);
        Ok(Device {
            rf,
            hardware_version: hardware_version as u16,
        })
    }

    pub fn hardware_version(&self) -> u16 {
        self.hardware_version
    }

    pub fn num_channels(&self) -> Result<u8> {
        Ok((self.rf.get_reg(dev::N_CHANNELS)? & 0xff) as u8)
    }

    pub fn device_info(&self) -> Result<DeviceInfo> {
        let build_date = u64::from(self.rf.get_reg(dev::BUILD_DATE_L)?)
            | u64::from(self.rf.get_reg(dev::BUILD_DATE_H)?) << 32;
        Ok(DeviceInfo {
            hardware_version: self.hardware_version,
            build_date,
            build_clean: self.rf.get_reg(dev::BUILD_FLAGS)? & 0x1 != 0,
            uptime: self.rf.get_reg(dev::UPTIME)?,
        })
    }

    /// The channel at `index`, with its own register windows.
    pub fn channel(&self, index: usize) -> Result<Channel> {
        let num_channels = self.num_channels()?;
        if index >= num_channels as usize {
            return Err(Error::Configuration(format!(
                "channel index {} out of range, device has {} channels",
                index, num_channels
            )));
        }
        Ok(Channel::new(index, self.rf.clone()))
    }
}

/* ---------------------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::MemRegisterFile;

    fn probed_register_file() -> Arc<MemRegisterFile> {
        let rf = Arc::new(MemRegisterFile::new(0x20000));
        rf.preload(
            dev::HARDWARE_INFO,
            dev::HARDWARE_VERSION << 16 | dev::HARDWARE_ID,
        );
        rf.preload(dev::N_CHANNELS, 2);
        rf
    }

    #[test]
    fn probe_accepts_matching_magic_and_version() {
        let rf = probed_register_file();
        let device = Device::new(rf).unwrap();
        assert_eq!(device.hardware_version(), 4);
        assert_eq!(device.num_channels().unwrap(), 2);
    }

    #[test]
    fn probe_rejects_wrong_magic() {
        let rf = Arc::new(MemRegisterFile::new(0x100));
        rf.preload(dev::HARDWARE_INFO, dev::HARDWARE_VERSION << 16 | 0xbeef);
        assert!(matches!(Device::new(rf), Err(Error::Configuration(_))));
    }

    #[test]
    fn probe_rejects_unsupported_version() {
        let rf = Arc::new(MemRegisterFile::new(0x100));
        rf.preload(dev::HARDWARE_INFO, 99 << 16 | dev::HARDWARE_ID);
        assert!(matches!(Device::new(rf), Err(Error::Configuration(_))));
    }

    #[test]
    fn channel_index_is_bounds_checked() {
        let rf = probed_register_file();
        let device = Device::new(rf).unwrap();
        assert!(device.channel(1).is_ok());
        assert!(matches!(device.channel(2), Err(Error::Configuration(_))));
    }

    #[test]
    fn device_info_combines_build_registers() {
        let rf = probed_register_file();
        rf.preload(dev::BUILD_DATE_L, 0x5678_0000);
        rf.preload(dev::BUILD_DATE_H, 0x1);
        rf.preload(dev::BUILD_FLAGS, 0x1);
        rf.preload(dev::UPTIME, 42);

        let info = Device::new(rf).unwrap().device_info().unwrap();
        assert_eq!(info.build_date, 0x1_5678_0000);
        assert!(info.build_clean);
        assert_eq!(info.uptime, 42);
    }
}

/* ---------------------------------------------------------------------------------------------- */
