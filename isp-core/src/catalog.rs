//! Chip descriptions and the parts-catalog file format.
//!
//! Ported from `parts_definitions.py`'s `read_lpcparts_string` /
//! `GetPartDescriptor`: a line-oriented CSV format with `#` comment
//! lines, described in spec.md §6.

use crate::error::CatalogError;

/// Cortex-M word size in bytes.
pub const WORD_SIZE: u32 = 4;
/// Flash page size in bytes.
pub const PAGE_BYTES: u32 = 64;
/// Pages per erase sector.
pub const SECTOR_PAGES: u32 = 16;
/// Bytes per erase sector (`PAGE_BYTES * SECTOR_PAGES`).
pub const SECTOR_BYTES: u32 = PAGE_BYTES * SECTOR_PAGES;
/// Index of the checksum word in the Cortex-M vector table (address 0x1C).
pub const CHECKSUM_WORD_INDEX: usize = 7;

/// An immutable description of one LPC part: memory map, sector layout,
/// and the RAM staging-buffer parameters used by the flash-write pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipDescription {
    pub part_id: u32,
    pub name: String,
    pub flash_range: (u32, u32),
    pub ram_range: (u32, u32),
    pub sector_count: u32,
    pub ram_start_write: u32,
    pub ram_buffer_size: u32,
    pub crystal_frequency_khz: u32,
}

impl ChipDescription {
    /// Builds and validates a chip description, checking spec.md §3's
    /// invariants. Untrusted catalog input can violate these, so this
    /// returns a `Result` rather than asserting as the source does.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        part_id: u32,
        name: String,
        flash_range: (u32, u32),
        ram_range: (u32, u32),
        sector_count: u32,
        ram_start_write: u32,
        ram_buffer_size: u32,
        crystal_frequency_khz: u32,
    ) -> Result<Self, CatalogError> {
        if SECTOR_BYTES % WORD_SIZE != 0 {
            return Err(CatalogError::InvalidDescription(
                "sector_bytes must be word-aligned".into(),
            ));
        }
        if SECTOR_BYTES > ram_buffer_size {
            return Err(CatalogError::InvalidDescription(format!(
                "sector size {SECTOR_BYTES} exceeds RAM buffer size {ram_buffer_size}"
            )));
        }
        if ram_range.1 < ram_range.0 {
            return Err(CatalogError::InvalidDescription(
                "RAM range end before start".into(),
            ));
        }
        if flash_range.1 <= flash_range.0 {
            return Err(CatalogError::InvalidDescription(
                "flash range end must be after start".into(),
            ));
        }
        if sector_count == 0 {
            return Err(CatalogError::InvalidDescription(
                "sector count must be non-zero".into(),
            ));
        }
        Ok(Self {
            part_id,
            name,
            flash_range,
            ram_range,
            sector_count,
            ram_start_write,
            ram_buffer_size,
            crystal_frequency_khz,
        })
    }

    pub fn sector_bytes(&self) -> u32 {
        SECTOR_BYTES
    }

    pub fn ram_size(&self) -> u32 {
        self.ram_range.1 - self.ram_range.0 + 1
    }

    pub fn flash_address_legal(&self, addr: u32) -> bool {
        self.flash_range.0 <= addr && addr <= self.flash_range.1
    }

    pub fn ram_address_legal(&self, addr: u32) -> bool {
        self.ram_range.0 <= addr && addr <= self.ram_range.1
    }

    /// A flash `(addr, len)` is legal iff both endpoints lie in
    /// `flash_range`, `len` fits the range span, and `addr` is page
    /// aligned.
    pub fn flash_range_legal(&self, addr: u32, len: u32) -> bool {
        if len == 0 {
            return false;
        }
        let span = self.flash_range.1 - self.flash_range.0;
        self.flash_address_legal(addr)
            && self.flash_address_legal(addr + len - 1)
            && len <= span
            && addr % PAGE_BYTES == 0
    }

    /// A RAM `(addr, len)` is legal iff both endpoints lie in `ram_range`,
    /// `len` fits the range span, and `addr` is word aligned.
    pub fn ram_range_legal(&self, addr: u32, len: u32) -> bool {
        if len == 0 {
            return false;
        }
        let span = self.ram_range.1 - self.ram_range.0;
        self.ram_address_legal(addr)
            && self.ram_address_legal(addr + len - 1)
            && len <= span
            && addr % WORD_SIZE == 0
    }

    /// `read_memory`'s preflight (see spec.md §9, resolved): accepts
    /// either a legal RAM range or a legal flash range, since callers such
    /// as `read_sector` pass flash addresses.
    pub fn ram_or_flash_range_legal(&self, addr: u32, len: u32) -> bool {
        self.ram_range_legal(addr, len) || self.flash_range_legal(addr, len)
    }
}

/// A loaded parts catalog: maps part IDs to their chip description.
#[derive(Debug, Clone, Default)]
pub struct PartsCatalog {
    parts: Vec<ChipDescription>,
}

impl PartsCatalog {
    pub fn find(&self, part_id: u32) -> Result<&ChipDescription, CatalogError> {
        self.parts
            .iter()
            .find(|c| c.part_id == part_id)
            .ok_or(CatalogError::PartNotFound { part_id })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChipDescription> {
        self.parts.iter()
    }

    /// Parses the lpctools-style catalog text. Column order, in order:
    /// `part_id (hex), name, flash_start (hex), flash_size (hex),
    /// sector_count (dec), reset_vector_offset (hex), ram_start (hex),
    /// ram_size (hex), ram_buffer_offset (hex), ram_buffer_size (hex),
    /// uuencode_flag`. Lines starting with `#` and blank lines are
    /// skipped.
    pub fn parse(text: &str) -> Result<Self, CatalogError> {
        const EXPECTED_COLUMNS: usize = 11;
        let mut parts = Vec::new();

        for (line_no, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split(',').map(str::trim).collect();
            if columns.len() != EXPECTED_COLUMNS {
                return Err(CatalogError::ColumnCount {
                    line: line_no + 1,
                    expected: EXPECTED_COLUMNS,
                    found: columns.len(),
                });
            }

            let part_id = parse_int(line_no + 1, "part_id", columns[0])?;
            let name = columns[1].to_string();
            let flash_start = parse_int(line_no + 1, "flash_start", columns[2])?;
            let flash_size = parse_int(line_no + 1, "flash_size", columns[3])?;
            let sector_count = parse_int(line_no + 1, "sector_count", columns[4])?;
            let _reset_vector_offset = parse_int(line_no + 1, "reset_vector_offset", columns[5])?;
            let ram_start = parse_int(line_no + 1, "ram_start", columns[6])?;
            let ram_size = parse_int(line_no + 1, "ram_size", columns[7])?;
            let ram_buffer_offset = parse_int(line_no + 1, "ram_buffer_offset", columns[8])?;
            let ram_buffer_size = parse_int(line_no + 1, "ram_buffer_size", columns[9])?;
            let _uuencode_flag = columns[10];

            let flash_end = flash_start + flash_size - 1;
            let ram_end = ram_start + ram_size - 1;
            let ram_start_write = ram_start + ram_buffer_offset;

            let chip = ChipDescription::new(
                part_id,
                name,
                (flash_start, flash_end),
                (ram_start, ram_end),
                sector_count,
                ram_start_write,
                ram_buffer_size,
                12_000,
            )
            .map_err(|e| match e {
                CatalogError::InvalidDescription(msg) => CatalogError::InvalidDescription(
                    format!("line {}: {msg}", line_no + 1),
                ),
                other => other,
            })?;
            parts.push(chip);
        }

        Ok(Self { parts })
    }
}

fn parse_int(line: usize, column: &'static str, text: &str) -> Result<u32, CatalogError> {
    let text = text.trim();
    let (digits, radix) = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        (hex, 16)
    } else {
        (text, 10)
    };
    u32::from_str_radix(digits, radix).map_err(|_| CatalogError::InvalidInteger {
        line,
        column,
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# part id, name, flash_start, flash_size, sector_count, reset_vector_offset, ram_start, ram_size, ram_buffer_offset, ram_buffer_size, uuencode
0x00008041,lpc810,0x00000000,0x1000,4,0x1c,0x10000000,0x400,0x200,0x400,0
";

    #[test]
    fn parses_sample_catalog() {
        let catalog = PartsCatalog::parse(SAMPLE).unwrap();
        let chip = catalog.find(0x00008041).unwrap();
        assert_eq!(chip.name, "lpc810");
        assert_eq!(chip.flash_range, (0, 0x0FFF));
        assert_eq!(chip.ram_range, (0x10000000, 0x100003FF));
        assert_eq!(chip.ram_start_write, 0x10000200);
        assert_eq!(chip.sector_count, 4);
    }

    #[test]
    fn unknown_part_errors() {
        let catalog = PartsCatalog::parse(SAMPLE).unwrap();
        assert_eq!(
            catalog.find(0xDEAD).unwrap_err(),
            CatalogError::PartNotFound { part_id: 0xDEAD }
        );
    }

    #[test]
    fn wrong_column_count_errors() {
        let err = PartsCatalog::parse("0x1,only,two\n").unwrap_err();
        assert!(matches!(err, CatalogError::ColumnCount { line: 1, .. }));
    }

    #[test]
    fn ram_size_invariant_holds() {
        let catalog = PartsCatalog::parse(SAMPLE).unwrap();
        let chip = catalog.find(0x00008041).unwrap();
        assert_eq!(chip.ram_range.1 - chip.ram_range.0 + 1, chip.ram_size());
    }

    #[test]
    fn flash_range_legality() {
        let catalog = PartsCatalog::parse(SAMPLE).unwrap();
        let chip = catalog.find(0x00008041).unwrap();
        assert!(chip.flash_range_legal(0, 64));
        assert!(!chip.flash_range_legal(1, 64)); // not page aligned
        assert!(!chip.flash_range_legal(0, 0x2000)); // exceeds span
    }
}
