//! Transport abstraction and CRLF line framing.
//!
//! `ByteChannel` replaces the capability split in `IODevices.py`
//! (`IODevice` base, `UartDevice`/serial-port subclass): one trait
//! carrying read, write, and baud-rate mutation, since every transport
//! this crate talks to needs all three and the split buys nothing (see
//! spec.md §9, resolved in favor of a single trait).

use std::time::Duration;

use log::{trace, warn};

use crate::error::IspError;

/// Everything the protocol layer needs from a transport: byte-level
/// read/write with a deadline, the ability to flush outstanding output,
/// and the ability to change the wire baud rate mid-session (used by
/// `SetBaudRate`/autobaud fallback). This is the capability set spec.md
/// §9 names: "read_byte, read_all, write, flush, set_baud, get_baud".
pub trait ByteChannel {
    /// Writes every byte in `data`, or fails.
    fn write_all(&mut self, data: &[u8]) -> Result<(), IspError>;

    /// Reads up to `buf.len()` bytes, blocking for at most `timeout`.
    /// Returns the number of bytes actually read; `0` means the
    /// deadline elapsed with nothing available, not EOF.
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, IspError>;

    /// Flushes any buffered outbound bytes to the wire. Transports with
    /// nothing to flush (a mock, a port that writes synchronously) may
    /// treat this as a no-op.
    fn flush(&mut self) -> Result<(), IspError>;

    /// Changes the channel's baud rate. Transports that can't change
    /// rate after opening (e.g. a fixed-rate mock) may treat this as a
    /// no-op.
    fn set_baud_rate(&mut self, baud: u32) -> Result<(), IspError>;
}

/// Buffers bytes read from a [`ByteChannel`] and slices them into
/// CRLF-terminated lines, mirroring the line-buffering `IODevice.read`
/// callers in `ISPConnection.py` do by hand with `b"\r\n".join`/`split`.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    pending: Vec<u8>,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.pending.windows(2).position(|w| w == b"\r\n")?;
        let line = self.pending[..pos].to_vec();
        self.pending.drain(..pos + 2);
        Some(line)
    }

    /// Reads from `channel` until a full CRLF-terminated line is
    /// available or `timeout` elapses, returning the line without its
    /// terminator. Bytes read past the line boundary are kept buffered
    /// for the next call.
    pub fn read_line(
        &mut self,
        channel: &mut dyn ByteChannel,
        timeout: Duration,
    ) -> Result<Vec<u8>, IspError> {
        if let Some(line) = self.take_line() {
            return Ok(line);
        }

        let deadline = std::time::Instant::now() + timeout;
        let mut scratch = [0u8; 256];
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(IspError::NoResponse {
                    call: "read_line".into(),
                });
            }
            let n = channel.read_some(&mut scratch, remaining)?;
            if n == 0 {
                continue;
            }
            self.pending.extend_from_slice(&scratch[..n]);
            trace!("framer: buffered {n} bytes, {} pending", self.pending.len());
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
        }
    }

    /// Discards any bytes buffered but not yet consumed as a line.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Non-blocking drain of whatever is currently sitting on `channel`
    /// into the inbound buffer, without waiting for a line terminator
    /// (spec.md §4.1's `read_available`). Returns the number of bytes
    /// pulled in.
    pub fn read_available(&mut self, channel: &mut dyn ByteChannel) -> Result<usize, IspError> {
        let mut scratch = [0u8; 256];
        let mut total = 0;
        loop {
            let n = channel.read_some(&mut scratch, Duration::ZERO)?;
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&scratch[..n]);
            total += n;
        }
        trace!("framer: read_available drained {total} bytes");
        Ok(total)
    }

    /// Discards the inbound buffer, flushes outbound, and makes up to
    /// two bounded attempts to read and discard a line — draining stale
    /// echo left over from a prior exchange before the next command goes
    /// out (spec.md §4.1's `reset()`; mirrors `_clear_serial`'s repeated
    /// best-effort `self._read`). Best-effort throughout: a flush or
    /// drain failure is logged, not propagated, since the caller's next
    /// real command will surface any channel that's actually dead.
    pub fn reset(&mut self, channel: &mut dyn ByteChannel, drain_timeout: Duration) {
        self.pending.clear();
        if let Err(err) = channel.flush() {
            warn!("framer: flush on reset failed: {err}");
        }
        for _ in 0..2 {
            let _ = self.read_line(channel, drain_timeout);
        }
        self.pending.clear();
    }

    /// Pushes bytes back in front of whatever is pending, for callers
    /// that peeked a byte off the channel directly (the sync
    /// handshake's first-`?`-echo probe) and need to hand it back to
    /// the line reader.
    pub(crate) fn seed(&mut self, bytes: &[u8]) {
        self.pending.splice(0..0, bytes.iter().copied());
    }
}

/// Writes a single command line, appending the CRLF terminator the
/// bootloader expects (`_write_command`'s `.encode() + b"\r\n"`).
pub fn write_line(channel: &mut dyn ByteChannel, line: &str) -> Result<(), IspError> {
    trace!("framer: writing {line:?}");
    channel.write_all(line.as_bytes())?;
    channel.write_all(b"\r\n")
}

/// Streams `data` one byte at a time with `delay` between each write.
/// Some USB-serial adapters drop bytes fed at line-rate right after a
/// baud-rate change; a zero delay collapses to a single bulk write.
pub fn write_paced(channel: &mut dyn ByteChannel, data: &[u8], delay: std::time::Duration) -> Result<(), IspError> {
    if delay.is_zero() {
        return channel.write_all(data);
    }
    for &byte in data {
        channel.write_all(&[byte])?;
        std::thread::sleep(delay);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockChannel {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        baud: u32,
        flushes: u32,
    }

    impl MockChannel {
        fn new(script: &[u8]) -> Self {
            Self {
                inbound: script.iter().copied().collect(),
                outbound: Vec::new(),
                baud: 9600,
                flushes: 0,
            }
        }
    }

    impl ByteChannel for MockChannel {
        fn write_all(&mut self, data: &[u8]) -> Result<(), IspError> {
            self.outbound.extend_from_slice(data);
            Ok(())
        }

        fn read_some(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, IspError> {
            let mut n = 0;
            while n < buf.len() {
                match self.inbound.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }

        fn flush(&mut self) -> Result<(), IspError> {
            self.flushes += 1;
            Ok(())
        }

        fn set_baud_rate(&mut self, baud: u32) -> Result<(), IspError> {
            self.baud = baud;
            Ok(())
        }
    }

    #[test]
    fn reads_single_line() {
        let mut channel = MockChannel::new(b"Synchronized\r\n");
        let mut buffer = InboundBuffer::new();
        let line = buffer
            .read_line(&mut channel, Duration::from_millis(100))
            .unwrap();
        assert_eq!(line, b"Synchronized");
    }

    #[test]
    fn splits_multiple_lines_across_reads() {
        let mut channel = MockChannel::new(b"0\r\n4\r\n");
        let mut buffer = InboundBuffer::new();
        let first = buffer
            .read_line(&mut channel, Duration::from_millis(100))
            .unwrap();
        let second = buffer
            .read_line(&mut channel, Duration::from_millis(100))
            .unwrap();
        assert_eq!(first, b"0");
        assert_eq!(second, b"4");
    }

    #[test]
    fn times_out_on_incomplete_line() {
        let mut channel = MockChannel::new(b"no-newline-here");
        let mut buffer = InboundBuffer::new();
        let result = buffer.read_line(&mut channel, Duration::from_millis(10));
        assert!(matches!(result, Err(IspError::NoResponse { .. })));
    }

    #[test]
    fn write_line_appends_crlf() {
        let mut channel = MockChannel::new(b"");
        write_line(&mut channel, "U 23130").unwrap();
        assert_eq!(channel.outbound, b"U 23130\r\n");
    }

    #[test]
    fn read_available_drains_without_blocking() {
        let mut channel = MockChannel::new(b"stale echo, no terminator");
        let mut buffer = InboundBuffer::new();
        let n = buffer.read_available(&mut channel).unwrap();
        assert_eq!(n, "stale echo, no terminator".len());
        // Drained bytes are buffered, not discarded.
        assert_eq!(buffer.pending, b"stale echo, no terminator");
    }

    #[test]
    fn read_available_is_zero_on_empty_channel() {
        let mut channel = MockChannel::new(b"");
        let mut buffer = InboundBuffer::new();
        assert_eq!(buffer.read_available(&mut channel).unwrap(), 0);
    }

    #[test]
    fn reset_flushes_and_drains_stale_lines() {
        let mut channel = MockChannel::new(b"stale\r\nmore-stale\r\n");
        let mut buffer = InboundBuffer::new();
        buffer.pending = b"leftover-partial".to_vec();
        buffer.reset(&mut channel, Duration::from_millis(10));
        assert_eq!(channel.flushes, 1);
        assert!(buffer.pending.is_empty());
    }

    #[test]
    fn reset_is_bounded_on_a_silent_channel() {
        let mut channel = MockChannel::new(b"");
        let mut buffer = InboundBuffer::new();
        buffer.reset(&mut channel, Duration::from_millis(5));
        assert_eq!(channel.flushes, 1);
        assert!(buffer.pending.is_empty());
    }
}
