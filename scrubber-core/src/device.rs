// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The block-device contract the engine requires, plus the one real
//! collaborator: a Linux `SG_IO` pass-through channel.

use std::time::Duration;

use crate::error::Result;
use crate::scsi::PtResult;

/// Everything the engine needs from a block device: capacity, a sector
/// size assumption, and a raw SCSI pass-through primitive. Implemented by
/// [`sys::SgIoDevice`] for real hardware and by [`fakedevice::FakeBlockDevice`]
/// for tests.
pub trait BlockDevice: Send + Sync {
    /// Device capacity in 512-byte sectors.
    fn capacity_sectors(&self) -> u64;

    /// Submits a CDB via the pass-through channel and returns the raw
    /// status/sense result prior to classification.
    fn scsi_pt(&self, cdb: &[u8], timeout: Duration) -> Result<PtResult>;
}

pub const SECTOR_SIZE: u64 = 512;

#[cfg(unix)]
pub mod sys {
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::time::Duration;

    use super::BlockDevice;
    use crate::error::{Result, ScrubError};
    use crate::scsi::PtResult;

    const SG_IO: libc::c_ulong = 0x2285;
    const BLKGETSIZE64: libc::c_ulong = 0x80081272;

    const SG_DXFER_NONE: i32 = -1;
    const SG_LIB_DRIVER_SENSE: u8 = 0x08;

    /// Mirrors Linux's `sg_io_hdr_t` (`<scsi/sg.h>`), used exactly as the
    /// retrieved ATA/SCSI pass-through reference code builds it: a fixed
    /// layout handed to the kernel via `ioctl(fd, SG_IO, &hdr)`.
    #[repr(C)]
    struct SgIoHdr {
        interface_id: i32,
        dxfer_direction: i32,
        cmd_len: u8,
        mx_sb_len: u8,
        iovec_count: u16,
        dxfer_len: u32,
        dxferp: *mut libc::c_void,
        cmdp: *mut u8,
        sbp: *mut u8,
        timeout: u32,
        flags: u32,
        pack_id: i32,
        usr_ptr: *mut libc::c_void,
        status: u8,
        masked_status: u8,
        msg_status: u8,
        sb_len_wr: u8,
        host_status: u16,
        driver_status: u16,
        resid: i32,
        duration: u32,
        info: u32,
    }

    /// A SCSI device or block device node opened for `SG_IO` pass-through.
    pub struct SgIoDevice {
        file: File,
        capacity_sectors: u64,
    }

    impl SgIoDevice {
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|source| ScrubError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
            let capacity_sectors = read_capacity(&file)?;
            Ok(Self {
                file,
                capacity_sectors,
            })
        }
    }

    fn read_capacity(file: &File) -> Result<u64> {
        let mut bytes: u64 = 0;
        let ret =
            unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut bytes as *mut u64) };
        if ret < 0 {
            return Err(ScrubError::Capacity(std::io::Error::last_os_error()));
        }
        Ok(bytes / super::SECTOR_SIZE)
    }

    impl BlockDevice for SgIoDevice {
        fn capacity_sectors(&self) -> u64 {
            self.capacity_sectors
        }

        fn scsi_pt(&self, cdb: &[u8], timeout: Duration) -> Result<PtResult> {
            let mut cdb_buf = cdb.to_vec();
            let mut sense = [0u8; 32];
            let hdr = SgIoHdr {
                interface_id: 'S' as i32,
                dxfer_direction: SG_DXFER_NONE,
                cmd_len: cdb_buf.len() as u8,
                mx_sb_len: sense.len() as u8,
                iovec_count: 0,
                dxfer_len: 0,
                dxferp: std::ptr::null_mut(),
                cmdp: cdb_buf.as_mut_ptr(),
                sbp: sense.as_mut_ptr(),
                timeout: timeout.as_millis() as u32,
                flags: 0,
                pack_id: 0,
                usr_ptr: std::ptr::null_mut(),
                status: 0,
                masked_status: 0,
                msg_status: 0,
                sb_len_wr: 0,
                host_status: 0,
                driver_status: 0,
                resid: 0,
                duration: 0,
                info: 0,
            };

            let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO, &hdr) };
            if ret < 0 {
                return Err(ScrubError::Ioctl(std::io::Error::last_os_error()));
            }

            Ok(PtResult {
                os_error: false,
                host_status: hdr.host_status,
                driver_status: hdr.driver_status,
                scsi_status: hdr.status,
                sense,
                sense_len: hdr.sb_len_wr as usize,
            })
        }
    }

    // Silences an unused-const warning on targets where SG_LIB_DRIVER_SENSE
    // isn't referenced outside sense classification (kept here for parity
    // with the constant's origin alongside SG_IO).
    const _: u8 = SG_LIB_DRIVER_SENSE;
}

#[cfg(unix)]
pub use sys::SgIoDevice;

/// An in-memory [`BlockDevice`] for tests: a fixed capacity and a
/// table-driven map from LBA to the [`PtResult`] that should be returned
/// for any VERIFY touching it. Unlisted LBAs return a good status.
pub mod fakedevice {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::BlockDevice;
    use crate::error::Result;
    use crate::scsi::PtResult;

    #[derive(Default)]
    pub struct FakeBlockDevice {
        capacity_sectors: u64,
        /// Canned responses keyed by the CDB's starting LBA.
        responses: Mutex<BTreeMap<u32, PtResult>>,
        /// Every CDB submitted, in order, for assertions on call count/shape.
        pub calls: Mutex<Vec<(u32, u16)>>,
    }

    impl FakeBlockDevice {
        pub fn new(capacity_sectors: u64) -> Self {
            Self {
                capacity_sectors,
                responses: Mutex::new(BTreeMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn fail_at(&self, lba: u32, result: PtResult) {
            self.responses.lock().unwrap().insert(lba, result);
        }
    }

    impl BlockDevice for FakeBlockDevice {
        fn capacity_sectors(&self) -> u64 {
            self.capacity_sectors
        }

        fn scsi_pt(&self, cdb: &[u8], _timeout: Duration) -> Result<PtResult> {
            let lba = u32::from_be_bytes(cdb[2..6].try_into().unwrap());
            let count = u16::from_be_bytes(cdb[7..9].try_into().unwrap());
            self.calls.lock().unwrap().push((lba, count));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .get(&lba)
                .copied()
                .unwrap_or_default())
        }
    }
}
