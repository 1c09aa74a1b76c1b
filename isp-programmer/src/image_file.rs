//! Loads a firmware image from disk as a contiguous byte sequence,
//! dispatching on file extension between Intel HEX and raw binary.
//!
//! Ported from `read_image_file_to_bin`'s extension dispatch
//! (`IntelHex().fromfile(image_file, format=extension)`); the `intelhex`
//! package's record assembly is replaced here by the `ihex` crate, the
//! dependency `silicagel777-SN8Flash` uses for the same role.

use std::path::Path;

use anyhow::{bail, Context, Result};
use ihex::Record;

/// Gap filler for addresses an Intel HEX file never mentions between
/// its lowest and highest data record — flash's erased value, so any
/// untouched byte in the assembled image reads the same as unprogrammed
/// flash.
const GAP_FILL: u8 = 0xFF;

pub fn load_image(path: &Path) -> Result<Vec<u8>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "hex" | "ihex" => load_intel_hex(path),
        _ => std::fs::read(path).with_context(|| format!("reading {}", path.display())),
    }
}

fn load_intel_hex(path: &Path) -> Result<Vec<u8>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut image = Vec::new();
    let mut upper_linear_address: u32 = 0;
    let mut upper_segment_address: u32 = 0;

    for record in ihex::Reader::new(&text) {
        match record.with_context(|| format!("parsing Intel HEX record in {}", path.display()))? {
            Record::Data { offset, value } => {
                let base = upper_linear_address | upper_segment_address;
                let address = (base + offset as u32) as usize;
                if address + value.len() > image.len() {
                    image.resize(address + value.len(), GAP_FILL);
                }
                image[address..address + value.len()].copy_from_slice(&value);
            }
            Record::ExtendedLinearAddress(upper) => {
                upper_linear_address = (upper as u32) << 16;
                upper_segment_address = 0;
            }
            Record::ExtendedSegmentAddress(segment) => {
                upper_segment_address = (segment as u32) << 4;
                upper_linear_address = 0;
            }
            Record::StartLinearAddress(_) | Record::StartSegmentAddress { .. } => {}
            Record::EndOfFile => break,
        }
    }

    if image.is_empty() {
        bail!("{} contained no data records", path.display());
    }
    Ok(image)
}

/// Writes `image` back out as a raw binary file (spec.md §6's
/// `read-image` subcommand only ever produces raw binary — the source
/// does not round-trip back to Intel HEX).
pub fn save_image(path: &Path, image: &[u8]) -> Result<()> {
    std::fs::write(path, image).with_context(|| format!("writing {}", path.display()))
}
