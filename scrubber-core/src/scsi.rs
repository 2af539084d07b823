// Copyright 2026 The Scrubber Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! VERIFY(10) CDB construction and SCSI sense-data classification.
//!
//! CDB layout and sense-key taxonomy follow SPC-4.

/// VERIFY(10) opcode (SPC-4 / SBC-3).
pub const VERIFY10_OPCODE: u8 = 0x2F;
/// Maximum transfer length of a single SCSI call, in sectors.
pub const MAX_TRANSFER_LEN: u32 = 0xFFFF;

pub const CHECK_CONDITION: u8 = 0x02;
pub const COMMAND_TERMINATED: u8 = 0x22;

/// Builds the 10-byte VERIFY(10) CDB.
///
/// `count` must fit in 16 bits and `lba` in 32 bits; callers (the worker
/// loop) are responsible for splitting requests larger than
/// [`MAX_TRANSFER_LEN`] before calling this.
pub fn build_cdb(lba: u32, count: u16, vrprotect: u8, dpo: bool, bytechk: bool) -> [u8; 10] {
    let mut cdb = [0u8; 10];
    cdb[0] = VERIFY10_OPCODE;
    cdb[1] = ((vrprotect & 0x7) << 5) | ((dpo as u8) << 4) | ((bytechk as u8) << 1);
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[6] = 0;
    cdb[7..9].copy_from_slice(&count.to_be_bytes());
    cdb[9] = 0;
    cdb
}

/// Decodes a CDB built by [`build_cdb`] back into its fields. Used by tests
/// to assert the encode/decode round-trip.
pub fn decode_cdb(cdb: &[u8; 10]) -> (u32, u16, u8, bool, bool) {
    let lba = u32::from_be_bytes(cdb[2..6].try_into().unwrap());
    let count = u16::from_be_bytes(cdb[7..9].try_into().unwrap());
    let vrprotect = (cdb[1] >> 5) & 0x7;
    let dpo = (cdb[1] >> 4) & 1 != 0;
    let bytechk = (cdb[1] >> 1) & 1 != 0;
    (lba, count, vrprotect, dpo, bytechk)
}

/// Canonical outcome of one SCSI VERIFY(10) call, folding OS/transport
/// errors and the sense-key taxonomy into one enum the worker can log,
/// count, and (for `Fixed`) use to decide whether to abort the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Good status, or a sense key of NoSense/Recovered.
    Good,
    NotReady,
    /// Medium, hardware, or blank-check sense key with no usable info field.
    MediumHard,
    /// As above, but the sense data carried a bad LBA in its info field.
    MediumHardWithInfo { lba: u64 },
    /// Illegal Request, asc=0x20 ascq=0x00 (unsupported command).
    InvalidOp,
    /// Illegal Request, any other asc/ascq.
    IllegalReq,
    UnitAttention,
    AbortedCommand,
    /// Sense data present but not one of the categories above.
    Sense,
    /// OS-level error, transport error, or a SCSI status with no sense data.
    Other,
}

impl VerifyOutcome {
    /// Whether this outcome should be counted as a read error for
    /// `read_errs` purposes. `Good` is the only non-error outcome.
    pub fn is_error(self) -> bool {
        !matches!(self, VerifyOutcome::Good)
    }

    /// Whether this outcome, observed while running the `Fixed` strategy,
    /// terminates the round immediately (the command is outright
    /// unsupported by the target).
    pub fn aborts_fixed_round(self) -> bool {
        matches!(self, VerifyOutcome::InvalidOp)
    }
}

/// SCSI status / host / driver status returned by a pass-through submission,
/// prior to sense interpretation.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtResult {
    pub os_error: bool,
    pub host_status: u16,
    pub driver_status: u16,
    pub scsi_status: u8,
    pub sense: [u8; 32],
    pub sense_len: usize,
}

/// Sense-key categories from SPC-4, prior to further classification by
/// additional sense code (asc/ascq).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenseKey {
    NoSense,
    Recovered,
    NotReady,
    MediumHard,
    IllegalRequest,
    UnitAttention,
    AbortedCommand,
    Other,
}

fn classify_sense_key(key: u8) -> SenseKey {
    match key {
        0x0 => SenseKey::NoSense,
        0x1 => SenseKey::Recovered,
        0x2 => SenseKey::NotReady,
        0x3 | 0x4 | 0x8 => SenseKey::MediumHard,
        0x5 => SenseKey::IllegalRequest,
        0x6 => SenseKey::UnitAttention,
        0xB => SenseKey::AbortedCommand,
        _ => SenseKey::Other,
    }
}

/// Typed summary of a parsed sense buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenseReport {
    pub response_code: u8,
    pub sense_key: u8,
    pub asc: u8,
    pub ascq: u8,
    pub info: Option<u64>,
}

/// Parses a raw sense buffer (fixed format 0x70/0x71, or descriptor format
/// 0x72/0x73) into a typed [`SenseReport`]. Normalization is idempotent:
/// calling it twice on the same bytes yields the same report.
pub fn parse_sense(buf: &[u8]) -> SenseReport {
    if buf.is_empty() {
        return SenseReport::default();
    }
    let response_code = buf[0] & 0x7F;
    match response_code {
        0x70 | 0x71 => parse_fixed_sense(buf, response_code),
        0x72 | 0x73 => parse_descriptor_sense(buf, response_code),
        _ => SenseReport {
            response_code,
            ..Default::default()
        },
    }
}

fn parse_fixed_sense(buf: &[u8], response_code: u8) -> SenseReport {
    let sense_key = buf.get(2).copied().unwrap_or(0) & 0x0F;
    let asc = buf.get(12).copied().unwrap_or(0);
    let ascq = buf.get(13).copied().unwrap_or(0);
    // Byte 0 bit 7 is the "valid" bit for the 4-byte big-endian info field
    // at offset 3..7, but the original tool reads a wider 8-byte info value
    // starting at offset 0x80 of an extended fixed-sense buffer; our 32-byte
    // buffer only carries the standard 4-byte field.
    let valid = buf.first().map(|b| b & 0x80 != 0).unwrap_or(false);
    let info = if valid && buf.len() >= 7 {
        Some(u32::from_be_bytes(buf[3..7].try_into().unwrap()) as u64)
    } else {
        None
    };
    SenseReport {
        response_code,
        sense_key,
        asc,
        ascq,
        info,
    }
}

fn parse_descriptor_sense(buf: &[u8], response_code: u8) -> SenseReport {
    let sense_key = buf.get(1).copied().unwrap_or(0) & 0x0F;
    let asc = buf.get(2).copied().unwrap_or(0);
    let ascq = buf.get(3).copied().unwrap_or(0);
    let additional_len = buf.get(7).copied().unwrap_or(0) as usize;
    let descriptors_end = (8 + additional_len).min(buf.len());
    let mut info = None;
    let mut i = 8;
    while i + 1 < descriptors_end {
        let desc_type = buf[i];
        let desc_len = buf.get(i + 1).copied().unwrap_or(0) as usize;
        let body_start = i + 2;
        let body_end = (body_start + desc_len).min(buf.len());
        if desc_type == 0x00 && body_end - body_start >= 10 {
            // Information descriptor body: VALID/reserved byte, reserved byte,
            // then an 8-byte big-endian info value.
            let info_start = body_start + 2;
            if body_end >= info_start + 8 {
                info = Some(u64::from_be_bytes(
                    buf[info_start..info_start + 8].try_into().unwrap(),
                ));
            }
        }
        if desc_len == 0 {
            break;
        }
        i = body_end;
    }
    SenseReport {
        response_code,
        sense_key,
        asc,
        ascq,
        info,
    }
}

/// Interprets a completed pass-through submission into a [`VerifyOutcome`],
/// following this decision order: OS error, then transport error,
/// then sense/status, then residual non-good status.
pub fn classify(pt: &PtResult) -> VerifyOutcome {
    if pt.os_error {
        return VerifyOutcome::Other;
    }
    // Nonzero host status, or a driver status whose low nibble flags a
    // transport-level problem, both mean the command never completed on
    // the wire.
    const SG_LIB_DRIVER_MASK: u16 = 0x0F;
    const SG_LIB_DRIVER_SENSE: u16 = 0x08;
    let driver_result = pt.driver_status & SG_LIB_DRIVER_MASK;
    if pt.host_status != 0 && driver_result != SG_LIB_DRIVER_SENSE {
        return VerifyOutcome::Other;
    }

    let sense_present = driver_result == SG_LIB_DRIVER_SENSE
        || pt.scsi_status == CHECK_CONDITION
        || pt.scsi_status == COMMAND_TERMINATED;

    if sense_present {
        let report = parse_sense(&pt.sense[..pt.sense_len.min(pt.sense.len())]);
        return classify_sense(&report);
    }

    if pt.scsi_status != 0 {
        return VerifyOutcome::Other;
    }

    VerifyOutcome::Good
}

fn classify_sense(report: &SenseReport) -> VerifyOutcome {
    match classify_sense_key(report.sense_key) {
        SenseKey::NoSense | SenseKey::Recovered => VerifyOutcome::Good,
        SenseKey::NotReady => VerifyOutcome::NotReady,
        SenseKey::MediumHard => match report.info {
            Some(lba) => VerifyOutcome::MediumHardWithInfo { lba },
            None => VerifyOutcome::MediumHard,
        },
        SenseKey::IllegalRequest => {
            if report.asc == 0x20 && report.ascq == 0x00 {
                VerifyOutcome::InvalidOp
            } else {
                VerifyOutcome::IllegalReq
            }
        }
        SenseKey::UnitAttention => VerifyOutcome::UnitAttention,
        SenseKey::AbortedCommand => VerifyOutcome::AbortedCommand,
        SenseKey::Other => VerifyOutcome::Sense,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdb_round_trips() {
        let cdb = build_cdb(0xDEAD_BEEF, 0x1234, 5, true, false);
        assert_eq!(decode_cdb(&cdb), (0xDEAD_BEEF, 0x1234, 5, true, false));
    }

    #[test]
    fn cdb_fields_are_at_expected_offsets() {
        let cdb = build_cdb(1, 2, 7, true, true);
        assert_eq!(cdb[0], VERIFY10_OPCODE);
        // vrprotect=7 -> 0b111_0_0_0_0_0 = 0xE0, dpo=1 -> bit4, bytechk=1 -> bit1
        assert_eq!(cdb[1], 0xE0 | 0x10 | 0x02);
        assert_eq!(cdb[6], 0);
        assert_eq!(cdb[9], 0);
    }

    #[test]
    fn fixed_sense_medium_error() {
        let mut buf = [0u8; 32];
        buf[0] = 0x70;
        buf[2] = 0x03; // MEDIUM ERROR
        buf[12] = 0x0A;
        let report = parse_sense(&buf);
        assert_eq!(report.sense_key, 0x03);
        assert_eq!(classify_sense(&report), VerifyOutcome::MediumHard);
    }

    #[test]
    fn fixed_sense_with_valid_info_field() {
        let mut buf = [0u8; 32];
        buf[0] = 0x80 | 0x70; // valid bit set + response code 0x70
        buf[2] = 0x04; // HARDWARE ERROR
        buf[3..7].copy_from_slice(&0x1234u32.to_be_bytes());
        let report = parse_sense(&buf);
        assert_eq!(
            classify_sense(&report),
            VerifyOutcome::MediumHardWithInfo { lba: 0x1234 }
        );
    }

    #[test]
    fn descriptor_sense_with_info_descriptor() {
        let mut buf = [0u8; 32];
        buf[0] = 0x72;
        buf[1] = 0x03; // MEDIUM ERROR
        buf[2] = 0x11;
        buf[3] = 0x04;
        buf[7] = 0x0C; // additional sense length (one 12-byte descriptor)
        buf[8] = 0x00; // information descriptor type
        buf[9] = 0x0A; // descriptor additional length
        buf[12..20].copy_from_slice(&0x0000000000001234u64.to_be_bytes());
        let report = parse_sense(&buf);
        assert_eq!(report.sense_key, 0x03);
        assert_eq!(
            classify_sense(&report),
            VerifyOutcome::MediumHardWithInfo { lba: 0x1234 }
        );
    }

    #[test]
    fn invalid_op_vs_illegal_req() {
        let mut buf = [0u8; 32];
        buf[0] = 0x70;
        buf[2] = 0x05; // ILLEGAL REQUEST
        buf[12] = 0x20;
        buf[13] = 0x00;
        assert_eq!(classify_sense(&parse_sense(&buf)), VerifyOutcome::InvalidOp);

        buf[12] = 0x24; // invalid field in cdb
        buf[13] = 0x00;
        assert_eq!(classify_sense(&parse_sense(&buf)), VerifyOutcome::IllegalReq);
    }

    #[test]
    fn no_sense_and_recovered_are_success() {
        let mut buf = [0u8; 32];
        buf[0] = 0x70;
        buf[2] = 0x00;
        assert_eq!(classify_sense(&parse_sense(&buf)), VerifyOutcome::Good);
        buf[2] = 0x01;
        assert_eq!(classify_sense(&parse_sense(&buf)), VerifyOutcome::Good);
    }

    #[test]
    fn sense_normalization_is_idempotent() {
        let mut buf = [0u8; 32];
        buf[0] = 0x72;
        buf[1] = 0x06;
        let once = parse_sense(&buf);
        let twice = parse_sense(&buf);
        assert_eq!(once, twice);
    }

    #[test]
    fn good_status_with_no_sense_present() {
        let pt = PtResult::default();
        assert_eq!(classify(&pt), VerifyOutcome::Good);
    }

    #[test]
    fn os_error_short_circuits() {
        let pt = PtResult {
            os_error: true,
            ..Default::default()
        };
        assert_eq!(classify(&pt), VerifyOutcome::Other);
    }

    #[test]
    fn check_condition_drives_sense_parse() {
        let mut pt = PtResult {
            scsi_status: CHECK_CONDITION,
            sense_len: 32,
            ..Default::default()
        };
        pt.sense[0] = 0x70;
        pt.sense[2] = 0x03;
        assert_eq!(classify(&pt), VerifyOutcome::MediumHard);
    }
}
