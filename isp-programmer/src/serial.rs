//! [`isp_core::ByteChannel`] implemented over a real serial port via
//! the `serialport` crate.
//!
//! Ported from `IODevices.py`'s `UartDevice` (a thin pyserial wrapper):
//! 8N1, no flow control, blocking reads bounded by a fixed timeout, and
//! a `set_baud_rate` that mutates the open port in place rather than
//! reopening it.

use std::time::Duration;

use isp_core::{ByteChannel, IspError};
use serialport::SerialPort;

/// Default per-read timeout handed to the underlying port. The
/// protocol layer enforces its own, finer-grained deadlines on top of
/// this by calling [`ByteChannel::read_some`] repeatedly; this just
/// bounds how long a single OS-level read blocks.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(50);

pub struct SerialByteChannel {
    port: Box<dyn SerialPort>,
}

impl SerialByteChannel {
    /// Opens `device` at `baud_rate`, 8 data bits, no parity, one stop
    /// bit, no flow control — the fixed framing every NXP ISP
    /// bootloader expects.
    pub fn open(device: &str, baud_rate: u32) -> anyhow::Result<Self> {
        let port = serialport::new(device, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(PORT_READ_TIMEOUT)
            .open()?;
        Ok(Self { port })
    }
}

impl ByteChannel for SerialByteChannel {
    fn write_all(&mut self, data: &[u8]) -> Result<(), IspError> {
        use std::io::Write;
        self.port
            .write_all(data)
            .map_err(|e| IspError::Io(e.to_string()))
    }

    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, IspError> {
        use std::io::Read;
        // The OS-level timeout is fixed at open time; cap this read's
        // wait to whichever is shorter so a short caller-supplied
        // deadline (e.g. the sync handshake's 100ms echo probe) isn't
        // stretched out by a longer port timeout.
        let effective = timeout.min(PORT_READ_TIMEOUT).max(Duration::from_millis(1));
        let _ = self.port.set_timeout(effective);
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(IspError::Io(e.to_string())),
        }
    }

    fn flush(&mut self) -> Result<(), IspError> {
        use std::io::Write;
        self.port.flush().map_err(|e| IspError::Io(e.to_string()))
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), IspError> {
        self.port
            .set_baud_rate(baud)
            .map_err(|e| IspError::Io(e.to_string()))
    }
}
