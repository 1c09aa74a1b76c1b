//! The NXP ISP return-code table.
//!
//! Every ISP command's response begins with a decimal return code on its
//! own line. The numeric mapping below is fixed by the bootloader and must
//! not be reordered.

use std::fmt;

/// A status code reported by the bootloader, or the internal
/// [`ReturnCode::NoStatusResponse`] pseudo-code used when the device times
/// out instead of answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReturnCode {
    Success = 0x0,
    InvalidCommand = 0x1,
    SrcAddrError = 0x2,
    DstAddrError = 0x3,
    SrcNotMapped = 0x4,
    DstNotMapped = 0x5,
    CountError = 0x6,
    InvalidSector = 0x7,
    SectorNotBlank = 0x8,
    SectorNotPrepared = 0x9,
    CompareError = 0xA,
    Busy = 0xB,
    ParamError = 0xC,
    AddrError = 0xD,
    AddrNotMapped = 0xE,
    CmdLocked = 0xF,
    InvalidCode = 0x10,
    InvalidBaudRate = 0x11,
    InvalidStopBit = 0x12,
    CodeReadProtectionEnabled = 0x13,
    UserCodeChecksum = 0x15,
    EfroNoPower = 0x17,
    FlashNoPower = 0x18,
    FlashNoClock = 0x1B,
    ReinvokeIspConfig = 0x1C,
    NoValidImage = 0x1D,
    FaimNoPower = 0x1E,
    FaimNoClock = 0x1F,
    /// Internal pseudo-code: the device did not answer before the read
    /// timeout elapsed. Never appears on the wire.
    NoStatusResponse = 0xFF,
}

impl ReturnCode {
    /// The NXP mnemonic for this code, as used in bootloader documentation
    /// and in the original Python implementation's error table.
    pub fn name(self) -> &'static str {
        use ReturnCode::*;
        match self {
            Success => "CMD_SUCCESS",
            InvalidCommand => "INVALID_COMMAND",
            SrcAddrError => "SRC_ADDR_ERROR",
            DstAddrError => "DST_ADDR_ERROR",
            SrcNotMapped => "SRC_ADDR_NOT_MAPPED",
            DstNotMapped => "DST_ADDR_NOT_MAPPED",
            CountError => "COUNT_ERROR",
            InvalidSector => "INVALID_SECTOR",
            SectorNotBlank => "SECTOR_NOT_BLANK",
            SectorNotPrepared => "SECTOR_NOT_PREPARED_FOR_WRITE_OPERATION",
            CompareError => "COMPARE_ERROR",
            Busy => "BUSY",
            ParamError => "PARAM_ERROR",
            AddrError => "ADDR_ERROR",
            AddrNotMapped => "ADDR_NOT_MAPPED",
            CmdLocked => "CMD_LOCKED",
            InvalidCode => "INVALID_CODE",
            InvalidBaudRate => "INVALID_BAUD_RATE",
            InvalidStopBit => "INVALID_STOP_BIT",
            CodeReadProtectionEnabled => "CODE_READ_PROTECTION_ENABLED",
            UserCodeChecksum => "USER_CODE_CHECKSUM",
            EfroNoPower => "EFRO_NO_POWER",
            FlashNoPower => "FLASH_NO_POWER",
            FlashNoClock => "FLASH_NO_CLOCK",
            ReinvokeIspConfig => "REINVOKE_ISP_CONFIG",
            NoValidImage => "NO_VALID_IMAGE",
            FaimNoPower => "FAIM_NO_POWER",
            FaimNoClock => "FAIM_NO_CLOCK",
            NoStatusResponse => "NoStatusResponse",
        }
    }

    /// Parses a decimal return code as received on the wire. Unknown codes
    /// are preserved as [`ReturnCode::NoStatusResponse`] rather than
    /// rejected, matching the leniency of `_get_return_code`'s source.
    pub fn from_wire_decimal(value: u32) -> ReturnCode {
        ReturnCode::try_from(value).unwrap_or(ReturnCode::NoStatusResponse)
    }

    pub fn is_success(self) -> bool {
        matches!(self, ReturnCode::Success)
    }
}

impl TryFrom<u32> for ReturnCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        use ReturnCode::*;
        Ok(match value {
            0x0 => Success,
            0x1 => InvalidCommand,
            0x2 => SrcAddrError,
            0x3 => DstAddrError,
            0x4 => SrcNotMapped,
            0x5 => DstNotMapped,
            0x6 => CountError,
            0x7 => InvalidSector,
            0x8 => SectorNotBlank,
            0x9 => SectorNotPrepared,
            0xA => CompareError,
            0xB => Busy,
            0xC => ParamError,
            0xD => AddrError,
            0xE => AddrNotMapped,
            0xF => CmdLocked,
            0x10 => InvalidCode,
            0x11 => InvalidBaudRate,
            0x12 => InvalidStopBit,
            0x13 => CodeReadProtectionEnabled,
            0x15 => UserCodeChecksum,
            0x17 => EfroNoPower,
            0x18 => FlashNoPower,
            0x1B => FlashNoClock,
            0x1C => ReinvokeIspConfig,
            0x1D => NoValidImage,
            0x1E => FaimNoPower,
            0x1F => FaimNoClock,
            0xFF => NoStatusResponse,
            other => return Err(other),
        })
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.name(), *self as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_named_code() {
        let codes = [
            ReturnCode::Success,
            ReturnCode::InvalidCommand,
            ReturnCode::SectorNotBlank,
            ReturnCode::CompareError,
            ReturnCode::FaimNoClock,
            ReturnCode::NoStatusResponse,
        ];
        for code in codes {
            let value = code as u32;
            assert_eq!(ReturnCode::try_from(value).unwrap(), code);
        }
    }

    #[test]
    fn unknown_wire_value_maps_to_no_status_response() {
        assert_eq!(
            ReturnCode::from_wire_decimal(0x99),
            ReturnCode::NoStatusResponse
        );
    }

    #[test]
    fn success_is_zero() {
        assert_eq!(ReturnCode::Success as u32, 0);
        assert!(ReturnCode::Success.is_success());
        assert!(!ReturnCode::Busy.is_success());
    }
}
