//! High-level operations composed from [`crate::protocol::IspProtocol`],
//! [`crate::flash`], and [`crate::image`]: the free functions a CLI
//! front-end actually calls (spec.md §4.8). None of these hold state of
//! their own; they're thin compositions over a borrowed protocol and
//! chip description, matching `ISPConnection.py`'s free-function style.

use log::{debug, info};

use crate::catalog::ChipDescription;
use crate::error::IspError;
use crate::flash::{self, FlashWriteSettings};
use crate::framer::ByteChannel;
use crate::image;
use crate::protocol::IspProtocol;

/// `MassErase` (spec.md §4.8): reset, unlock, prep every sector, erase
/// every sector.
pub fn mass_erase<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
) -> Result<(), IspError> {
    let last_sector = chip.sector_count - 1;
    protocol.reset();
    protocol.unlock()?;
    protocol.prep_sectors_for_write(0, last_sector)?;
    protocol.erase_sector(0, last_sector)
}

/// `ReadSector`: reads exactly one sector's worth of flash starting at
/// `sector`'s base address.
pub fn read_sector<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
    sector: u32,
) -> Result<Vec<u8>, IspError> {
    let start = chip.flash_range.0 + sector * chip.sector_bytes();
    protocol.read_memory(chip, start, chip.sector_bytes())
}

/// `FindFirstBlankSector`: a linear scan asking the bootloader whether
/// `[sector, last]` is entirely blank; the first sector that answers
/// yes is the first blank one. Falls back to the last sector if no
/// blank run is found, matching the source exactly.
pub fn find_first_blank_sector<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
) -> Result<u32, IspError> {
    let last_sector = chip.sector_count - 1;
    for sector in 0..chip.sector_count {
        let blank = protocol.check_sectors_blank(sector, last_sector)?;
        debug!("ops: sector {sector} blank: {blank}");
        if blank {
            return Ok(sector);
        }
    }
    Ok(last_sector)
}

/// `ReadImage`: concatenates every sector up to (not including) the
/// first blank one.
pub fn read_image<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
) -> Result<Vec<u8>, IspError> {
    let blank_sector = find_first_blank_sector(protocol, chip)?;
    debug!("ops: first blank sector {blank_sector}");
    let mut image = Vec::with_capacity(blank_sector as usize * chip.sector_bytes() as usize);
    for sector in 0..blank_sector {
        image.extend_from_slice(&read_sector(protocol, chip, sector)?);
    }
    Ok(image)
}

/// `WriteBinaryToFlash`: breaks `image` into sectors starting at
/// `start_sector` and writes them in reverse order (spec.md §4.5's
/// bricking-resistance rationale — see [`write_image`] for why this
/// matters at sector 0 specifically).
///
/// `on_sector(done, total)` is called after each sector commits, so a
/// caller can drive a progress bar; pass `|_, _| {}` to ignore.
pub fn write_binary_to_flash<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
    settings: FlashWriteSettings,
    image: &[u8],
    start_sector: u32,
    mut on_sector: impl FnMut(u32, u32),
) -> Result<(), IspError> {
    let sector_bytes = chip.sector_bytes() as usize;
    let sector_count = image.len().div_ceil(sector_bytes) as u32;
    if start_sector + sector_count > chip.sector_count {
        return Err(IspError::CapacityExceeded {
            need: start_sector + sector_count,
            have: chip.sector_count,
        });
    }

    protocol.unlock()?;
    for sector in (start_sector..start_sector + sector_count).rev() {
        let offset = (sector - start_sector) as usize * sector_bytes;
        let end = (offset + sector_bytes).min(image.len());
        info!(
            "ops: writing sector {sector} ({}/{sector_count})",
            sector - start_sector + 1
        );
        flash::write_sector(protocol, chip, settings, sector, &image[offset..end])?;
        on_sector(sector - start_sector + 1, sector_count);
    }
    Ok(())
}

/// `WriteImage` (spec.md §4.5): corrupts sector 0 first so a crash
/// mid-write can never leave a bootable-but-partial image on flash,
/// then writes the checksummed image starting from sector 0, which
/// (via [`write_binary_to_flash`]'s reverse order) lands sector 0 last.
pub fn write_image<C: ByteChannel>(
    protocol: &mut IspProtocol<C>,
    chip: &ChipDescription,
    settings: FlashWriteSettings,
    raw_image: &[u8],
    mut on_sector: impl FnMut(u32, u32),
) -> Result<(), IspError> {
    protocol.unlock()?;

    let corrupt = vec![0xDEu8; chip.sector_bytes() as usize];
    flash::write_sector(protocol, chip, settings, 0, &corrupt)?;

    let bootable = image::make_bootable(raw_image);
    write_binary_to_flash(protocol, chip, settings, &bootable, 0, |done, total| {
        on_sector(done, total)
    })
}

/// The trio `cli.py`'s `QueryChip` command reads, in that order: boot
/// code version, UID, then part ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipQuery {
    pub boot_code_version: (u32, u32),
    pub uid: [u32; 4],
    pub part_id: u32,
}

pub fn query_chip<C: ByteChannel>(protocol: &mut IspProtocol<C>) -> Result<ChipQuery, IspError> {
    Ok(ChipQuery {
        boot_code_version: protocol.read_boot_code_version()?,
        uid: protocol.read_uid()?,
        part_id: protocol.read_part_id()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PartsCatalog;
    use std::collections::VecDeque;
    use std::time::Duration;

    const SAMPLE_CATALOG: &str =
        "0x00008041,lpc810,0x00000000,0x1000,4,0x1c,0x10000000,0x600,0x200,0x400,0\n";

    fn chip() -> ChipDescription {
        PartsCatalog::parse(SAMPLE_CATALOG)
            .unwrap()
            .find(0x00008041)
            .unwrap()
            .clone()
    }

    struct ScriptedChannel {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl ScriptedChannel {
        fn new(script: &[u8]) -> Self {
            Self {
                inbound: script.iter().copied().collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl ByteChannel for ScriptedChannel {
        fn write_all(&mut self, data: &[u8]) -> Result<(), IspError> {
            self.outbound.extend_from_slice(data);
            Ok(())
        }

        // One byte per call, so a `reset()`/buffer clear between two
        // commands can never discard a reply the script intended for
        // a later call.
        fn read_some(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, IspError> {
            if buf.is_empty() {
                return Ok(0);
            }
            match self.inbound.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> Result<(), IspError> {
            Ok(())
        }

        fn set_baud_rate(&mut self, _baud: u32) -> Result<(), IspError> {
            Ok(())
        }
    }

    #[test]
    fn mass_erase_sends_unlock_prep_erase() {
        let channel = ScriptedChannel::new(b"0\r\n0\r\n0\r\n");
        // `mass_erase`'s leading `protocol.reset()` must not drain any of
        // this script: `ScriptedChannel::read_some` ignores its timeout
        // argument, so a non-zero `reset_drain_timeout` would let that
        // reset swallow the unlock return code before `unlock()` ever runs.
        let timing = crate::sync::TimingProfile {
            reset_drain_timeout: Duration::ZERO,
            ..crate::sync::TimingProfile::default()
        };
        let mut protocol = IspProtocol::new(channel, timing);
        mass_erase(&mut protocol, &chip()).unwrap();
    }

    #[test]
    fn find_first_blank_sector_falls_back_to_last() {
        let chip = chip();
        // every sector reports not-blank (code 8 + two diagnostic lines)
        let mut script = Vec::new();
        for _ in 0..chip.sector_count {
            script.extend_from_slice(b"8\r\n0\r\n0\r\n");
        }
        let channel = ScriptedChannel::new(&script);
        let mut protocol = IspProtocol::new(channel, crate::sync::TimingProfile::default());
        let sector = find_first_blank_sector(&mut protocol, &chip).unwrap();
        assert_eq!(sector, chip.sector_count - 1);
    }

    #[test]
    fn write_binary_to_flash_rejects_oversized_image() {
        let chip = chip();
        let channel = ScriptedChannel::new(b"");
        let mut protocol = IspProtocol::new(channel, crate::sync::TimingProfile::default());
        let huge = vec![0u8; (chip.sector_count as usize + 1) * chip.sector_bytes() as usize];
        let err = write_binary_to_flash(
            &mut protocol,
            &chip,
            FlashWriteSettings::default(),
            &huge,
            0,
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, IspError::CapacityExceeded { .. }));
    }
}
