//! Vector-table checksum handling, making a raw binary "bootable" in
//! the sense the LPC boot ROM requires.
//!
//! Ported from `nxp.py`'s `GetCheckSumedVectorTable`/`MakeBootable`/
//! `RemoveBootableCheckSum`/`FillDataToFitSector`. The boot ROM checks
//! that the first eight words of flash (the Cortex-M vector table) sum
//! to zero mod 2^32 before it will jump to the application; the
//! checksum word itself lives at word index
//! [`crate::catalog::CHECKSUM_WORD_INDEX`] (byte offset 0x1C).

use crate::catalog::{CHECKSUM_WORD_INDEX, WORD_SIZE};

const VECTOR_TABLE_WORDS: usize = 8;
const VECTOR_TABLE_BYTES: usize = VECTOR_TABLE_WORDS * WORD_SIZE as usize;

/// Two's-complement checksum over a slice of 32-bit words, matching
/// `CalculateCheckSum`'s `(1<<32) - (sum % (1<<32))`.
fn two_s_complement_checksum(words: &[u32]) -> u32 {
    let sum: u64 = words.iter().map(|&w| w as u64).sum();
    (0u64.wrapping_sub(sum) & 0xFFFF_FFFF) as u32
}

/// Returns the first [`VECTOR_TABLE_BYTES`] of `image` with the
/// checksum word recomputed and inserted, leaving every other word
/// unchanged. Panics if `image` is shorter than the vector table —
/// callers are expected to have already range-checked the image
/// against the chip's flash size.
pub fn checksummed_vector_table(image: &[u8]) -> [u8; VECTOR_TABLE_BYTES] {
    assert!(
        image.len() >= VECTOR_TABLE_BYTES,
        "image shorter than the vector table"
    );

    let mut words = [0u32; VECTOR_TABLE_WORDS];
    for (i, word) in words.iter_mut().enumerate() {
        let start = i * WORD_SIZE as usize;
        *word = u32::from_le_bytes(image[start..start + 4].try_into().unwrap());
    }
    words[CHECKSUM_WORD_INDEX] = 0;
    words[CHECKSUM_WORD_INDEX] = two_s_complement_checksum(&words);

    let mut out = [0u8; VECTOR_TABLE_BYTES];
    for (i, word) in words.iter().enumerate() {
        out[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    out
}

/// Returns a copy of `image` with the vector-table checksum word
/// inserted so the boot ROM will accept it as a valid application.
pub fn make_bootable(image: &[u8]) -> Vec<u8> {
    let table = checksummed_vector_table(image);
    let mut out = Vec::with_capacity(image.len());
    out.extend_from_slice(&table);
    out.extend_from_slice(&image[VECTOR_TABLE_BYTES..]);
    out
}

/// Returns a copy of `image` that is bootable except the checksum word
/// itself is zeroed, guaranteeing the next reset re-enters ISP mode
/// rather than running potentially-corrupt code.
pub fn remove_bootable_checksum(image: &[u8]) -> Vec<u8> {
    let mut out = make_bootable(image);
    let start = CHECKSUM_WORD_INDEX * WORD_SIZE as usize;
    out[start..start + WORD_SIZE as usize].fill(0);
    out
}

/// Pads `data` with trailing `0xFF` bytes up to `size`. Used to top up
/// a partial final sector before staging it to RAM, since
/// [`crate::flash::FlashWriter`] always transfers whole sectors.
pub fn fill_to_sector_size(mut data: Vec<u8>, size: usize) -> Vec<u8> {
    if data.len() < size {
        data.resize(size, 0xFF);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image(len: usize) -> Vec<u8> {
        let mut image = vec![0xAAu8; len];
        for (i, word) in image.chunks_mut(4).take(VECTOR_TABLE_WORDS).enumerate() {
            word.copy_from_slice(&(i as u32 + 1).to_le_bytes());
        }
        image
    }

    #[test]
    fn checksum_word_makes_vector_table_sum_to_zero() {
        let image = sample_image(128);
        let bootable = make_bootable(&image);
        let sum: u64 = bootable[..VECTOR_TABLE_BYTES]
            .chunks(4)
            .map(|w| u32::from_le_bytes(w.try_into().unwrap()) as u64)
            .sum();
        assert_eq!(sum & 0xFFFF_FFFF, 0);
    }

    #[test]
    fn make_bootable_preserves_trailing_bytes() {
        let image = sample_image(128);
        let bootable = make_bootable(&image);
        assert_eq!(&bootable[VECTOR_TABLE_BYTES..], &image[VECTOR_TABLE_BYTES..]);
    }

    #[test]
    fn remove_bootable_checksum_zeroes_just_the_checksum_word() {
        let image = sample_image(128);
        let bootable = make_bootable(&image);
        let stripped = remove_bootable_checksum(&image);
        let start = CHECKSUM_WORD_INDEX * 4;
        assert_eq!(&stripped[start..start + 4], &[0, 0, 0, 0]);
        assert_eq!(&stripped[..start], &bootable[..start]);
        assert_eq!(&stripped[start + 4..], &bootable[start + 4..]);
    }

    #[test]
    fn fill_to_sector_size_pads_with_0xff() {
        let padded = fill_to_sector_size(vec![1, 2, 3], 8);
        assert_eq!(padded, vec![1, 2, 3, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn fill_to_sector_size_is_noop_when_already_big_enough() {
        let data = vec![1u8; 16];
        assert_eq!(fill_to_sector_size(data.clone(), 8), data);
    }
}
