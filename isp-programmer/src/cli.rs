//! Argument parsing: subcommands and shared flags (spec.md §6).
//!
//! Grounded on `silicagel777-SN8Flash`'s `clap` derive layout and the
//! teacher's own `clap`-based `spitransport-tool/src/main.rs`; the
//! subcommand names and flag defaults themselves come straight from
//! `cli.py`'s `click` group.

use clap::{Parser, Subcommand};

/// The default starting baud rate for a cold sync (spec.md §6:
/// "Initial baud is always 9600 unless caller asserts no_sync=true").
pub const DEFAULT_BAUD: u32 = 9_600;

#[derive(Parser, Debug)]
#[command(name = "isp-programmer", version, about = "Flash NXP LPC microcontrollers over the ISP bootloader", long_about = None)]
pub struct Cli {
    /// Serial device the target is attached to.
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    pub device: String,

    /// Baud rate to negotiate with the bootloader after sync.
    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,

    /// Crystal frequency of the target's oscillator, in kHz, reported
    /// to the bootloader (not calibrated — spec.md's Non-goals).
    #[arg(short = 'c', long, default_value_t = 12_000)]
    pub crystal_frequency: u32,

    /// Parts-definition file mapping part IDs to chip descriptions.
    #[arg(short = 'f', long, default_value = "/etc/lpctools_parts.def")]
    pub config_file: String,

    /// Skip the autobaud handshake; assumes the device is already
    /// talking at `--baud`.
    #[arg(long, default_value_t = false)]
    pub no_sync: bool,

    /// Delay between ISP commands, in seconds.
    #[arg(short, long, default_value_t = 0.25)]
    pub sleep_time: f64,

    /// Delay between individual bytes written to the wire, in seconds.
    #[arg(long, default_value_t = 0.0)]
    pub serial_sleep: f64,

    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the autobaud handshake and exit.
    Sync,

    /// Read and print the part ID, boot code version, and UID.
    QueryChip,

    /// Erase every sector on the chip.
    Erase,

    /// Write an image starting at an arbitrary sector, with no
    /// vector-table checksum rewrite.
    WriteFlash {
        /// Path to the image to program (Intel HEX or raw binary).
        #[arg(long)]
        imagein: String,
        /// First sector to write; sectors below this are untouched.
        #[arg(long, default_value_t = 0)]
        start_sector: u32,
    },

    /// Write a bootable image: corrupts sector 0 first, writes in
    /// reverse order, and restores a valid vector-table checksum only
    /// once every other sector has landed.
    WriteImage {
        /// Path to the image to program (Intel HEX or raw binary).
        #[arg(long)]
        imagein: String,
    },

    /// Like `write-image`, but reads the chip back first and skips the
    /// write entirely if the image already matches what's programmed.
    FastWriteImage {
        /// Path to the image to program (Intel HEX or raw binary).
        #[arg(long)]
        imagein: String,
    },

    /// Read the programmed image back from the chip (up to the first
    /// blank sector) and save it as raw binary.
    ReadImage {
        /// Path to write the raw image to.
        #[arg(long)]
        imageout: String,
    },
}
