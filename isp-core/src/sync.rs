//! The autobaud sync handshake and the session wrapper that owns it.
//!
//! Ported from `ISPConnection.py`'s `SyncConnection`: the bootloader
//! autobauds off the first `?` it receives, so the host sends one,
//! waits for `Synchronized`, echoes the string back, and waits for
//! `OK` before the link is considered live. See spec.md §4.3.

use std::time::Duration;

use log::{debug, info};

use crate::catalog::{ChipDescription, PartsCatalog};
use crate::error::IspError;
use crate::framer::{self, ByteChannel, InboundBuffer};
use crate::protocol::IspProtocol;

/// The substring `SyncConnection` actually checks for, taken verbatim
/// from the source's `self.SyncString.strip()[1:]` — it drops the
/// leading `S` because the echoed `?` can merge with it on the wire.
const SYNC_MATCH: &str = "ynchronized";
const SYNC_VERIFIED_MATCH: &str = "OK";

/// Fixed timeout for the very first read after sending `?`. Kept short
/// because on an already-synchronized device nothing at all arrives
/// (spec.md §9, resolved: a fixed 100ms probe rather than a
/// configurable one).
pub const SYNC_ECHO_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Named sleep constants controlling the pacing of the protocol, all
/// configurable because real hardware varies in how much settling time
/// it needs between commands (spec.md §9, resolved: exposed rather
/// than hardcoded). Defaults match `ISPConnection.py`'s module-level
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct TimingProfile {
    /// Delay before reading a command's return code (`_return_code_sleep`).
    pub return_code_sleep: Duration,
    /// Delay between each byte written to the wire (`_serial_sleep`);
    /// zero disables the per-byte pacing entirely.
    pub serial_sleep: Duration,
    /// Settling time around a `WriteToRam` transfer (`ram_write_sleep`).
    pub ram_write_sleep: Duration,
    /// Settling time around an erase/copy-to-flash transfer
    /// (`flash_write_sleep`).
    pub flash_write_sleep: Duration,
    /// Settling time between issuing `ReadCRC` and trusting the result.
    pub readcrc_sleep: Duration,
    /// Delay after `SetBaudRate` before the new rate is trusted
    /// (`time.sleep(max(0.1, sleep_time))` in `SetupChip`).
    pub set_baudrate_sleep: Duration,
    /// Read timeout used for the handshake's post-probe reads.
    pub sync_echo_probe_timeout: Duration,
    /// Per-attempt read timeout `IspProtocol::reset` uses while draining
    /// stale echo (spec.md §4.1's "up to two bounded `read_line`
    /// attempts"). Short and bounded on purpose: these reads exist to
    /// mop up bytes already in flight, not to wait for a fresh reply.
    pub reset_drain_timeout: Duration,
}

impl Default for TimingProfile {
    fn default() -> Self {
        Self {
            return_code_sleep: Duration::from_millis(50),
            serial_sleep: Duration::from_millis(10),
            ram_write_sleep: Duration::from_millis(10),
            flash_write_sleep: Duration::from_millis(50),
            readcrc_sleep: Duration::from_millis(10),
            set_baudrate_sleep: Duration::from_millis(100),
            sync_echo_probe_timeout: SYNC_ECHO_PROBE_TIMEOUT,
            reset_drain_timeout: Duration::from_millis(50),
        }
    }
}

/// Which step of the handshake is in progress, attached to errors and
/// trace logs so a failed sync says exactly where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    SendProbe,
    AwaitSynchronized,
    EchoSynchronized,
    AwaitVerified,
    EnableEcho,
}

/// Whether a [`Session`] has completed the autobaud handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unsynced,
    Synced,
}

/// Runs the `?`/`Synchronized`/`OK` handshake over a raw channel,
/// bypassing [`IspProtocol`] since the device isn't yet echo-enabled.
/// On success the channel is left with echo mode on (`A 1`), matching
/// the end of `SyncConnection`.
pub fn synchronize(
    channel: &mut dyn ByteChannel,
    buffer: &mut InboundBuffer,
    timing: &TimingProfile,
) -> Result<(), IspError> {
    info!("sync: synchronizing");
    buffer.clear();

    debug!("sync: stage={:?}", SyncStage::SendProbe);
    channel.write_all(b"?")?;

    // The device may already be sitting in interactive mode from a
    // previous session; it echoes the bare `?` back with nothing else.
    // A short, dedicated probe read distinguishes that from a cold
    // bootloader, which stays silent until the full "Synchronized"
    // line (spec.md §4.3 step 2).
    let mut probe_byte = [0u8; 1];
    let probed = channel
        .read_some(&mut probe_byte, timing.sync_echo_probe_timeout)
        .unwrap_or(0);
    if probed == 1 && probe_byte[0] == b'?' {
        debug!("sync: device already interactive, short-circuiting handshake");
        framer::write_line(channel, "")?;
        buffer.clear();
        return Ok(());
    }
    if probed == 1 {
        buffer.seed(&probe_byte);
    }

    debug!("sync: stage={:?}", SyncStage::AwaitSynchronized);
    let probe = buffer
        .read_line(channel, timing.sync_echo_probe_timeout)
        .unwrap_or_default();
    let probe_text = String::from_utf8_lossy(&probe);
    if !probe_text.contains(SYNC_MATCH) {
        return Err(IspError::Sync);
    }

    debug!("sync: stage={:?}", SyncStage::EchoSynchronized);
    std::thread::sleep(Duration::from_millis(100));
    channel.write_all(b"Synchronized\r\n")?;
    framer::write_line(channel, "")?;
    framer::write_line(channel, "")?;
    let _ = buffer.read_line(channel, timing.sync_echo_probe_timeout);

    debug!("sync: stage={:?}", SyncStage::AwaitVerified);
    channel.write_all(b"\r\n")?;
    std::thread::sleep(Duration::from_millis(100));
    let verify = buffer
        .read_line(channel, timing.sync_echo_probe_timeout)
        .unwrap_or_default();
    if !String::from_utf8_lossy(&verify).contains(SYNC_VERIFIED_MATCH) {
        return Err(IspError::Verify);
    }
    info!("sync: synchronization successful");

    debug!("sync: stage={:?}", SyncStage::EnableEcho);
    channel.write_all(b"\r\n")?;
    buffer.clear();
    std::thread::sleep(Duration::from_millis(100));
    framer::write_line(channel, "A 1")?;
    let _ = buffer.read_line(channel, timing.sync_echo_probe_timeout);
    let _ = buffer.read_line(channel, timing.sync_echo_probe_timeout);

    Ok(())
}

/// Owns a channel and the protocol state built on top of it: whether
/// the handshake has run, and the [`IspProtocol`] used for every
/// command after that.
pub struct Session<C: ByteChannel> {
    protocol: IspProtocol<C>,
    state: SessionState,
}

impl<C: ByteChannel> Session<C> {
    pub fn new(channel: C, timing: TimingProfile) -> Self {
        Self {
            protocol: IspProtocol::new(channel, timing),
            state: SessionState::Unsynced,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Runs the autobaud handshake. A caller that already knows the
    /// device is synced (spec.md's `--no-sync` flag) can skip this and
    /// go straight to [`Session::protocol_mut`].
    pub fn synchronize(&mut self) -> Result<(), IspError> {
        self.protocol.reset();
        synchronize(
            self.protocol.channel_mut(),
            self.protocol.buffer_mut(),
            self.protocol.timing(),
        )?;
        self.state = SessionState::Synced;
        Ok(())
    }

    /// Marks the session synced without running the handshake, for the
    /// `--no-sync` path (spec.md §6) where the caller asserts the
    /// device is already talking at `target_baud`.
    pub fn assume_synced(&mut self) {
        self.state = SessionState::Synced;
    }

    pub fn protocol(&self) -> &IspProtocol<C> {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut IspProtocol<C> {
        &mut self.protocol
    }

    pub fn into_protocol(self) -> IspProtocol<C> {
        self.protocol
    }
}

/// `SetupChip` (spec.md §4.3): synchronizes (unless `no_sync`), asks the
/// device to switch to `target_baud`, re-locks the local channel to
/// match, then reads the part ID and resolves it against `catalog`.
///
/// `channel` must already be open at the correct starting baud rate —
/// `9600` for a cold sync, or `target_baud` when `no_sync` is set
/// (spec.md §6) — since only the caller knows how to open its
/// transport at a given rate before a [`Session`] exists.
pub fn setup_chip<C: ByteChannel>(
    channel: C,
    target_baud: u32,
    crystal_frequency_khz: u32,
    catalog: &PartsCatalog,
    no_sync: bool,
    timing: TimingProfile,
) -> Result<(Session<C>, ChipDescription), IspError> {
    let mut session = Session::new(channel, timing);

    if no_sync {
        session.assume_synced();
    } else {
        session.synchronize()?;
    }

    // Sync leaves echo deliberately ON to disambiguate the handshake
    // itself; turn it back off before the real session starts so
    // `get_return_code` isn't given an echo line to discard on every
    // subsequent command (spec.md §4.3: "Turns echo OFF ... before
    // Sends B <baud> 1").
    session.protocol_mut().set_echo(false)?;
    session.protocol_mut().set_baud_rate(target_baud, 1)?;
    session.protocol_mut().set_channel_baud_rate(target_baud)?;
    std::thread::sleep(timing.set_baudrate_sleep.max(Duration::from_millis(100)));
    std::thread::sleep(timing.set_baudrate_sleep.max(Duration::from_millis(100)));
    session.protocol_mut().reset();

    let part_id = session.protocol_mut().read_part_id()?;
    let mut chip = catalog.find(part_id)?.clone();
    chip.crystal_frequency_khz = crystal_frequency_khz;

    Ok((session, chip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockChannel {
        inbound: VecDeque<u8>,
    }

    impl ByteChannel for MockChannel {
        fn write_all(&mut self, _data: &[u8]) -> Result<(), IspError> {
            Ok(())
        }

        // One byte per call: `synchronize`'s `buffer.clear()` between
        // handshake stages must only ever discard input the device
        // hasn't really sent yet, never a reply a greedy mock read
        // ahead of schedule.
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
    fn successful_handshake() {
        let mut channel = MockChannel {
            inbound: b"Synchronized\r\nOK\r\nOK\r\n0\r\n0\r\n".iter().copied().collect(),
        };
        let mut buffer = InboundBuffer::new();
        let timing = TimingProfile::default();
        synchronize(&mut channel, &mut buffer, &timing).unwrap();
    }

    #[test]
    fn garbage_response_is_a_sync_error() {
        let mut channel = MockChannel {
            inbound: b"garbage\r\n".iter().copied().collect(),
        };
        let mut buffer = InboundBuffer::new();
        let timing = TimingProfile::default();
        let result = synchronize(&mut channel, &mut buffer, &timing);
        assert!(matches!(result, Err(IspError::Sync)));
    }
}
