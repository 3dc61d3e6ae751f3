// SPDX-License-Identifier: MIT OR Apache-2.0

/* ---------------------------------------------------------------------------------------------- */

use std::io;

use mockall::mock;

use crate::registers::RegAddr;
use crate::registers::RegisterFile;
use crate::registers::Sealed;

/* ---------------------------------------------------------------------------------------------- */

mock! {
    /// Since the RegisterFile trait is sealed and cannot be implemented by users of the crate,
    /// we provide a convenient MockRegisterFile struct to facilitate crate user's testing.
    ///
    /// The bit and 64-bit helpers are not mocked; they fall back to the trait's default
    /// implementations on top of the mocked word accessors.
    #[derive(Debug)]
    pub RegisterFile {}

    impl RegisterFile for RegisterFile {
        fn get_reg(&self, addr: RegAddr) -> io::Result<u32>;
        fn set_reg(&self, addr: RegAddr, value: u32) -> io::Result<()>;
        fn get_mem(&self, addr: RegAddr, out: &mut [u32]) -> io::Result<()>;
        fn set_mem(&self, addr: RegAddr, values: &[u32]) -> io::Result<()>;
    }

    impl Sealed for RegisterFile {}
}

/* ---------------------------------------------------------------------------------------------- */
