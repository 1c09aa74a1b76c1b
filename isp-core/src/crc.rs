//! CRC32 (zlib/IEEE 802.3 polynomial), as used by the `ReadCRC` ISP
//! command and by the flash-write pipeline's RAM/flash verification
//! steps.
//!
//! Ported from `tools.py`'s `calc_crc`, which delegates to Python's
//! `zlib.crc32`. There's no `crc32fast`/`crc` dependency anywhere in the
//! examples pack for this exact algorithm, and a table-driven
//! implementation is small enough to carry directly.

use thiserror::Error;

const POLYNOMIAL: u32 = 0xEDB88320;

/// The CRC32 implementation must reproduce this value for a 1024-byte
/// all-0xFF buffer (a blank flash sector); `ISPConnection.py` asserts the
/// same vector at module-load time, before any hardware I/O runs.
const SELF_CHECK_EXPECTED: u32 = 3_090_874_356;

#[derive(Debug, Error)]
#[error("CRC32 self-check failed: expected {expected:#x}, got {got:#x} for a 1024-byte 0xFF buffer")]
pub struct CrcSelfCheckError {
    pub expected: u32,
    pub got: u32,
}

/// Verifies the CRC32 implementation against the blank-sector vector
/// (spec.md §4.5 step 1, §8 Invariant 2). Callers run this once, at
/// startup, before trusting `crc32` to validate anything written to
/// flash.
pub fn self_check() -> Result<(), CrcSelfCheckError> {
    let blank = vec![0xFFu8; 1024];
    let got = crc32(&blank);
    if got == SELF_CHECK_EXPECTED {
        Ok(())
    } else {
        Err(CrcSelfCheckError { expected: SELF_CHECK_EXPECTED, got })
    }
}

fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut byte = 0u32;
    while byte < 256 {
        let mut crc = byte;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[byte as usize] = crc;
        byte += 1;
    }
    table
}

/// Computes the zlib-polynomial CRC32 of `data`, matching
/// `zlib.crc32(data) & 0xFFFFFFFF`.
pub fn crc32(data: &[u8]) -> u32 {
    let table = build_table();
    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ table[index];
    }
    crc ^ 0xFFFFFFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn known_ascii_vector() {
        // zlib.crc32(b"123456789") == 0xCBF43926, the standard CRC-32/ISO-HDLC
        // check value used to validate implementations.
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }

    #[test]
    fn blank_sector_vector() {
        // ISPConnection.py asserts calc_crc(bytes([0xFF] * 1024)) == 3090874356
        // at import time; kept here as a regression check on the port.
        let blank = vec![0xFFu8; 1024];
        assert_eq!(crc32(&blank), 3_090_874_356);
    }

    #[test]
    fn self_check_passes() {
        assert!(self_check().is_ok());
    }
}
