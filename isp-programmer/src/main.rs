//! Command-line front-end for the ISP protocol engine: subcommand
//! dispatch, serial port setup, image loading, and logging/progress
//! plumbing (spec.md §6's "external collaborator" layer, made
//! concrete). All protocol and flash-writing logic lives in
//! `isp-core`; this binary only wires it to a real transport and a
//! real terminal.

mod cli;
mod image_file;
mod serial;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use isp_core::{ops, setup_chip, FlashWriteSettings, PartsCatalog, Session, TimingProfile};

use cli::{Cli, Command, DEFAULT_BAUD};
use serial::SerialByteChannel;

fn timing_profile(cli: &Cli) -> TimingProfile {
    TimingProfile {
        return_code_sleep: Duration::from_secs_f64(cli.sleep_time),
        serial_sleep: Duration::from_secs_f64(cli.serial_sleep),
        ..TimingProfile::default()
    }
}

fn load_catalog(path: &str) -> Result<PartsCatalog> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading parts catalog {path}"))?;
    PartsCatalog::parse(&text).with_context(|| format!("parsing parts catalog {path}"))
}

/// Opens the serial device at the baud rate a fresh handshake expects:
/// `--baud` itself under `--no-sync` (the caller asserts the device is
/// already there), or the bootloader's fixed autobaud rate otherwise.
fn open_channel(cli: &Cli) -> Result<SerialByteChannel> {
    let starting_baud = if cli.no_sync { cli.baud } else { DEFAULT_BAUD };
    SerialByteChannel::open(&cli.device, starting_baud)
        .with_context(|| format!("opening serial device {}", cli.device))
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Sync => {
            let channel = open_channel(cli)?;
            let mut session = Session::new(channel, timing_profile(cli));
            session.synchronize().context("synchronizing with device")?;
            log::info!("Synchronized.");
        }

        Command::QueryChip => {
            let channel = open_channel(cli)?;
            let mut session = Session::new(channel, timing_profile(cli));
            if cli.no_sync {
                session.assume_synced();
            } else {
                session.synchronize().context("synchronizing with device")?;
            }
            let query = ops::query_chip(session.protocol_mut()).context("querying chip")?;
            log::info!(
                "Part ID: {:#x}\tBoot Code Version: {}.{}\tUID: {:08x}-{:08x}-{:08x}-{:08x}",
                query.part_id,
                query.boot_code_version.1,
                query.boot_code_version.0,
                query.uid[0],
                query.uid[1],
                query.uid[2],
                query.uid[3],
            );
        }

        Command::Erase => {
            let (mut session, chip) = setup(cli)?;
            ops::mass_erase(session.protocol_mut(), &chip).context("mass erase")?;
            log::info!("Mass erase successful.");
        }

        Command::WriteFlash { imagein, start_sector } => {
            let (mut session, chip) = setup(cli)?;
            let image = image_file::load_image(Path::new(imagein))?;
            let bar = ProgressBar::new(image.len().div_ceil(chip.sector_bytes() as usize) as u64);
            ops::write_binary_to_flash(
                session.protocol_mut(),
                &chip,
                FlashWriteSettings::default(),
                &image,
                *start_sector,
                |done, _total| bar.set_position(done as u64),
            )
            .context("writing flash")?;
            bar.finish();
            log::info!("Write complete.");
        }

        Command::WriteImage { imagein } => {
            let (mut session, chip) = setup(cli)?;
            let image = image_file::load_image(Path::new(imagein))?;
            let bar = ProgressBar::new(image.len().div_ceil(chip.sector_bytes() as usize) as u64);
            ops::write_image(
                session.protocol_mut(),
                &chip,
                FlashWriteSettings::default(),
                &image,
                |done, _total| bar.set_position(done as u64),
            )
            .context("writing image")?;
            bar.finish();
            session.protocol_mut().go(chip.flash_range.0, false).context("starting image")?;
            log::info!("Write complete.");
        }

        Command::FastWriteImage { imagein } => {
            let (mut session, chip) = setup(cli)?;
            let image = image_file::load_image(Path::new(imagein))?;
            let programmed = ops::read_image(session.protocol_mut(), &chip)
                .context("reading back existing image")?;
            if programmed.len() >= image.len() && programmed[..image.len()] == image[..] {
                log::info!("Chip already programmed with this image, skipping write.");
            } else {
                let bar =
                    ProgressBar::new(image.len().div_ceil(chip.sector_bytes() as usize) as u64);
                ops::write_image(
                    session.protocol_mut(),
                    &chip,
                    FlashWriteSettings::default(),
                    &image,
                    |done, _total| bar.set_position(done as u64),
                )
                .context("writing image")?;
                bar.finish();
                session.protocol_mut().go(chip.flash_range.0, false).context("starting image")?;
                log::info!("Write complete.");
            }
        }

        Command::ReadImage { imageout } => {
            let (mut session, chip) = setup(cli)?;
            let image = ops::read_image(session.protocol_mut(), &chip).context("reading image")?;
            image_file::save_image(Path::new(imageout), &image)?;
            log::info!("Read {} bytes to {imageout}.", image.len());
        }
    }

    Ok(())
}

/// `SetupChip` (spec.md §4.3): opens the serial device, synchronizes
/// (unless `--no-sync`), negotiates `--baud`, and resolves the
/// target's part ID against `--config-file`.
fn setup(cli: &Cli) -> Result<(Session<SerialByteChannel>, isp_core::ChipDescription)> {
    let channel = open_channel(cli)?;
    let catalog = load_catalog(&cli.config_file)?;
    setup_chip(
        channel,
        cli.baud,
        cli.crystal_frequency,
        &catalog,
        cli.no_sync,
        timing_profile(cli),
    )
    .context("setting up chip")
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    simplelog::TermLogger::init(
        cli.verbose.log_level_filter(),
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
    .expect("failed to initialize logger");

    // Mirrors `ISPConnection.py`'s module-load-time assert on the same
    // vector: fail fast if the CRC implementation has regressed, before
    // it's ever trusted to validate a flash write.
    if let Err(err) = isp_core::crc::self_check() {
        log::error!("{err}");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if log::log_enabled!(log::Level::Debug) {
                log::error!("{err:?}");
            } else {
                log::error!("{err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
