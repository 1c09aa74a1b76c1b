//! NXP LPC ISP serial protocol engine and flash-write pipeline.
//!
//! This crate implements the framed ASCII command protocol spoken by the
//! factory ISP bootloader on NXP LPC-series Cortex-M parts, plus the
//! sector-by-sector flash-write pipeline built on top of it. It owns no
//! serial port: callers implement [`framer::ByteChannel`] over whatever
//! transport they have (a real UART, a mock for tests, ...).

pub mod catalog;
pub mod crc;
pub mod error;
pub mod flash;
pub mod framer;
pub mod image;
pub mod ops;
pub mod protocol;
pub mod retry;
pub mod return_code;
pub mod sync;

pub use catalog::{ChipDescription, PartsCatalog};
pub use error::{CatalogError, IspError};
pub use framer::ByteChannel;
pub use protocol::IspProtocol;
pub use return_code::ReturnCode;
pub use flash::FlashWriteSettings;
pub use sync::{setup_chip, Session, SessionState, SyncStage, TimingProfile};
