//! The safe sector-write pipeline: stage to RAM, verify, erase,
//! blank-check, copy, re-verify.
//!
//! Ported near line-for-line from `ISPConnection.py`'s
//! `WriteFlashSector`/`WriteSector` — see spec.md §4.5 for the step
//! order, which is load-bearing: every step exists to catch a specific
//! way the bootloader can silently fail to do what it was told.

use std::thread;

use log::{debug, error, info};

use crate::catalog::ChipDescription;
use crate::crc;
use crate::error::{CrcStage, IspError};
use crate::framer::ByteChannel;
use crate::image::fill_to_sector_size;
use crate::protocol::IspProtocol;
use crate::retry::retry;

/// Number of attempts [`write_flash_sector`] gives a CRC read before
/// treating it as failed, matching `tools.retry(..., count=5)` at both
/// call sites in `WriteFlashSector`.
const CRC_RETRY_COUNT: u32 = 5;

/// Tunables for the sector pipeline.
#[derive(Debug, Clone, Copy)]
pub struct FlashWriteSettings {
    /// When true, a sector whose flash content already matches the
    /// staged RAM buffer is left untouched instead of erased and
    /// rewritten (spec.md §4.5 step 5; `fast-write-image`'s whole-image
    /// precheck is this same idea one level up, in `ops::write_image`).
    pub safe_write: bool,
}

impl Default for FlashWriteSettings {
    fn default() -> Self {
        Self { safe_write: true }
    }
}

/// Writes one full sector's worth of data to flash at `sector`,
/// verifying at every step. `data` must be exactly `chip.sector_bytes()`
/// long — callers pad the final partial sector before calling this (see
/// [`write_sector`]).
pub fn write_flash_sector<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
    settings: FlashWriteSettings,
    sector: u32,
    data: &[u8],
) -> Result<(), IspError> {
    assert_eq!(data.len() as u32, chip.sector_bytes(), "sector data must be sector-sized");

    let ram_address = chip.ram_start_write;
    let flash_address = chip.flash_range.0 + sector * chip.sector_bytes();
    info!("flash: writing sector {sector} (flash {flash_address:#x}, ram {ram_address:#x})");

    let data_crc = crc::crc32(data);
    let timing = *protocol.timing();

    protocol.write_to_ram(chip, ram_address, data)?;
    thread::sleep(timing.ram_write_sleep);
    protocol.reset();
    thread::sleep(timing.ram_write_sleep);

    // RAM CRC mismatch is diagnostic only (spec.md §9, resolved): logged,
    // never fatal, never retried beyond the budget below. The sector
    // still gets committed to flash; the pipeline's real guarantee comes
    // from the flash-side CRC and readback checks at the end.
    match retry(
        "ReadCRC",
        CRC_RETRY_COUNT,
        || protocol.read_crc(ram_address, data.len() as u32),
    ) {
        Ok(ram_crc) if ram_crc == data_crc => debug!("flash: RAM CRC matches ({ram_crc:#x})"),
        Ok(ram_crc) => protocol.log_ram_crc_mismatch(data_crc, ram_crc),
        Err(err) => error!("flash: RAM CRC read failed, continuing anyway: {err}"),
    }
    protocol.reset();

    if settings.safe_write
        && protocol.memory_locations_equal(flash_address, ram_address, chip.sector_bytes())?
    {
        debug!("flash: sector {sector} already matches RAM, skipping erase/copy");
        return Ok(());
    }

    protocol.prep_sectors_for_write(sector, sector)?;
    protocol.erase_sector(sector, sector)?;
    thread::sleep(timing.flash_write_sleep);

    if !protocol.check_sectors_blank(sector, sector)? {
        return Err(IspError::ReturnCode {
            code: crate::return_code::ReturnCode::SectorNotBlank,
            call: "CheckSectorsBlank".into(),
        });
    }

    // NXP parts require a prep immediately before every copy; the one
    // above is consumed by the erase.
    protocol.prep_sectors_for_write(sector, sector)?;
    protocol.copy_ram_to_flash(chip, flash_address, ram_address, chip.sector_bytes())?;
    thread::sleep(timing.readcrc_sleep);

    let flash_crc = retry(
        "ReadCRC",
        CRC_RETRY_COUNT,
        || protocol.read_crc(flash_address, chip.sector_bytes()),
    )?;
    if flash_crc != data_crc {
        return Err(IspError::CrcMismatch {
            expected: data_crc,
            got: flash_crc,
            stage: CrcStage::Flash,
        });
    }
    if !protocol.memory_locations_equal(flash_address, ram_address, chip.sector_bytes())? {
        return Err(IspError::VerifyReadback);
    }
    Ok(())
}

/// Pads `data` to a full sector with `0xFF` (the flash-erased value)
/// before handing it to [`write_flash_sector`].
pub fn write_sector<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
    settings: FlashWriteSettings,
    sector: u32,
    data: &[u8],
) -> Result<(), IspError> {
    assert!(!data.is_empty(), "sector write with no data");
    let padded = fill_to_sector_size(data.to_vec(), chip.sector_bytes() as usize);
    write_flash_sector(protocol, chip, settings, sector, &padded)
}
