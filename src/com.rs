// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Two-sided message channel over one named shm segment.
//
// Segment layout:
//   PortHeader (128 bytes): magic, lane count, device/panel pids, panel
//                           session, per-lane (capacity, max_message)
//   for each lane: ring device->panel, ring panel->device
//
// The device creates and owns the segment; the panel attaches to it. Every
// lane is a pair of SPSC byte rings, so each side is the only producer of
// its outgoing ring and the only consumer of its incoming one.

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::error::ComError;
use crate::names;
use crate::ring::{ByteRing, Oversized};
use crate::{current_pid, process_alive, ShmHandle, ShmOpenMode};

/// Control lane: transport events, panel -> device.
pub const EVENT_LANE: usize = 0;
/// Audio lane: render requests and responses.
pub const REALTIME_LANE: usize = 1;

const MAGIC: u32 = 0x5452_4B42; // "TRKB"
const MAX_LANES: usize = 4;
const LEN_PREFIX: usize = 4;

#[repr(C)]
struct PortHeader {
    magic: AtomicU32,
    lane_count: AtomicU32,
    device_pid: AtomicU32,
    panel_pid: AtomicU32,
    /// Bumped on every panel attach; identifies the current registration.
    panel_session: AtomicU32,
    _reserved: u32,
    lanes: [[AtomicU64; 2]; MAX_LANES],
    _pad: [u8; 40],
}

const HEADER_SIZE: usize = std::mem::size_of::<PortHeader>();
const _: () = assert!(HEADER_SIZE == 128);

/// Sizing of one lane, identical on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    /// Bytes of ring storage per direction.
    pub capacity: usize,
    /// Largest message accepted by `send`.
    pub max_message: usize,
}

impl LaneConfig {
    /// A lane able to queue `depth` messages of `max_message` bytes.
    pub const fn with_depth(max_message: usize, depth: usize) -> Self {
        Self {
            capacity: (max_message + LEN_PREFIX) * depth,
            max_message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Device,
    Panel,
}

/// Health of the peer as seen from one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    /// The peer registered but its process is gone.
    Stale,
}

struct LaneRings {
    tx: Mutex<ByteRing>,
    rx: Mutex<ByteRing>,
    max_message: usize,
}

fn guard(m: &Mutex<ByteRing>) -> MutexGuard<'_, ByteRing> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn segment_size(lanes: &[LaneConfig]) -> usize {
    HEADER_SIZE
        + lanes
            .iter()
            .map(|l| 2 * ByteRing::footprint(l.capacity))
            .sum::<usize>()
}

fn validate(lanes: &[LaneConfig]) -> Result<(), ComError> {
    if lanes.is_empty() || lanes.len() > MAX_LANES {
        return Err(ComError::InvalidParameter("lane count"));
    }
    if lanes
        .iter()
        .any(|l| l.max_message == 0 || l.capacity < l.max_message + LEN_PREFIX)
    {
        return Err(ComError::InvalidParameter("lane capacity"));
    }
    Ok(())
}

/// One end of the named message channel.
pub struct ComPort {
    shm: ShmHandle,
    side: Side,
    name: String,
    lanes: Vec<LaneRings>,
    session: u32,
}

impl ComPort {
    /// Create the channel as the device. A segment left behind by a device
    /// that is no longer running is discarded and rebuilt.
    pub fn create(name: &str, lanes: &[LaneConfig]) -> Result<Self, ComError> {
        validate(lanes)?;
        let seg = names::port_segment(name);
        let size = segment_size(lanes);

        let shm = acquire_fresh(&seg, size)?;
        // Sessions survive an in-place rebuild so stale panel handles stay stale.
        let last_session = unsafe { &*(shm.as_mut_ptr() as *const PortHeader) }
            .panel_session
            .load(Ordering::Acquire);
        unsafe { std::ptr::write_bytes(shm.as_mut_ptr(), 0, size) };

        let port = Self::bind(shm, Side::Device, name, lanes);
        let hdr = port.header();
        hdr.panel_session.store(last_session, Ordering::Relaxed);
        hdr.lane_count.store(lanes.len() as u32, Ordering::Relaxed);
        for (slot, lane) in hdr.lanes.iter().zip(lanes) {
            slot[0].store(lane.capacity as u64, Ordering::Relaxed);
            slot[1].store(lane.max_message as u64, Ordering::Relaxed);
        }
        hdr.device_pid.store(current_pid(), Ordering::Relaxed);
        hdr.magic.store(MAGIC, Ordering::Release);
        tracing::debug!(channel = name, lanes = lanes.len(), "channel created");
        Ok(port)
    }

    /// Attach to a channel created by the device.
    pub fn connect(name: &str, lanes: &[LaneConfig]) -> Result<Self, ComError> {
        validate(lanes)?;
        let seg = names::port_segment(name);
        let shm = match ShmHandle::acquire(&seg, segment_size(lanes), ShmOpenMode::Open) {
            Ok(shm) => shm,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ComError::NotConnected),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(ComError::InvalidParameter("lane configuration mismatch"))
            }
            Err(e) => return Err(e.into()),
        };

        let mut port = Self::bind(shm, Side::Panel, name, lanes);
        let hdr = port.header();
        if hdr.magic.load(Ordering::Acquire) != MAGIC {
            return Err(ComError::NotConnected);
        }
        let matches = hdr.lane_count.load(Ordering::Relaxed) as usize == lanes.len()
            && hdr.lanes.iter().zip(lanes).all(|(slot, lane)| {
                slot[0].load(Ordering::Relaxed) == lane.capacity as u64
                    && slot[1].load(Ordering::Relaxed) == lane.max_message as u64
            });
        if !matches {
            return Err(ComError::InvalidParameter("lane configuration mismatch"));
        }

        let me = current_pid();
        let holder = hdr.panel_pid.load(Ordering::Acquire);
        if holder != 0 && holder != me && process_alive(holder) {
            return Err(ComError::Busy);
        }
        for lane in &port.lanes {
            guard(&lane.rx).discard_all();
        }
        let session = hdr.panel_session.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        hdr.panel_pid.store(me, Ordering::Release);
        port.session = session;
        tracing::debug!(channel = name, session, "panel attached");
        Ok(port)
    }

    fn bind(shm: ShmHandle, side: Side, name: &str, lanes: &[LaneConfig]) -> Self {
        let base = shm.as_mut_ptr();
        let mut offset = HEADER_SIZE;
        let mut rings = Vec::with_capacity(lanes.len());
        for lane in lanes {
            let fp = ByteRing::footprint(lane.capacity);
            let (to_panel, to_device) = unsafe {
                (
                    ByteRing::from_raw(base.add(offset), lane.capacity),
                    ByteRing::from_raw(base.add(offset + fp), lane.capacity),
                )
            };
            let (tx, rx) = match side {
                Side::Device => (to_panel, to_device),
                Side::Panel => (to_device, to_panel),
            };
            rings.push(LaneRings {
                tx: Mutex::new(tx),
                rx: Mutex::new(rx),
                max_message: lane.max_message,
            });
            offset += 2 * fp;
        }
        Self {
            shm,
            side,
            name: name.to_owned(),
            lanes: rings,
            session: 0,
        }
    }

    fn header(&self) -> &PortHeader {
        unsafe { &*(self.shm.as_mut_ptr() as *const PortHeader) }
    }

    fn lane(&self, lane: usize) -> Result<&LaneRings, ComError> {
        self.lanes
            .get(lane)
            .ok_or(ComError::InvalidParameter("lane index"))
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn max_message(&self, lane: usize) -> Option<usize> {
        self.lanes.get(lane).map(|l| l.max_message)
    }

    fn peer_pid(&self) -> u32 {
        let hdr = self.header();
        match self.side {
            Side::Device => hdr.panel_pid.load(Ordering::Acquire),
            Side::Panel => hdr.device_pid.load(Ordering::Acquire),
        }
    }

    /// Whether this handle is still the registered owner of its side.
    fn registered(&self) -> bool {
        let hdr = self.header();
        if hdr.magic.load(Ordering::Acquire) != MAGIC {
            return false;
        }
        match self.side {
            Side::Device => true,
            Side::Panel => {
                hdr.panel_pid.load(Ordering::Acquire) == current_pid()
                    && hdr.panel_session.load(Ordering::Acquire) == self.session
            }
        }
    }

    /// Queue one message for the peer.
    pub fn send(&self, lane: usize, msg: &[u8]) -> Result<(), ComError> {
        let rings = self.lane(lane)?;
        if msg.len() > rings.max_message {
            return Err(ComError::MessageTooLarge {
                lane,
                size: msg.len(),
                max: rings.max_message,
            });
        }
        if !self.registered() || self.peer_pid() == 0 {
            return Err(ComError::NotConnected);
        }
        if guard(&rings.tx).write(msg) {
            Ok(())
        } else {
            Err(ComError::BufferFull { lane })
        }
    }

    /// Pop the next message from the peer into `buf`. Never blocks;
    /// `Ok(None)` means the lane is empty.
    pub fn read(&self, lane: usize, buf: &mut [u8]) -> Result<Option<usize>, ComError> {
        let rings = self.lane(lane)?;
        match guard(&rings.rx).read(buf) {
            Ok(n) => Ok(n),
            Err(Oversized(size)) => Err(ComError::MessageTooLarge {
                lane,
                size,
                max: buf.len(),
            }),
        }
    }

    /// Drop every message pending from the peer on `lane`.
    pub fn drain(&self, lane: usize) -> Result<(), ComError> {
        guard(&self.lane(lane)?.rx).discard_all();
        Ok(())
    }

    pub fn check_connection(&self) -> ConnectionState {
        if !self.registered() {
            return ConnectionState::Unconnected;
        }
        match self.peer_pid() {
            0 => ConnectionState::Unconnected,
            pid if process_alive(pid) => ConnectionState::Connected,
            _ => ConnectionState::Stale,
        }
    }
}

impl Drop for ComPort {
    fn drop(&mut self) {
        let hdr = self.header();
        match self.side {
            Side::Device => {
                hdr.magic.store(0, Ordering::Release);
                hdr.device_pid.store(0, Ordering::Release);
                self.shm.unlink();
            }
            Side::Panel => {
                if self.session != 0 && hdr.panel_session.load(Ordering::Acquire) == self.session {
                    let _ = hdr.panel_pid.compare_exchange(
                        current_pid(),
                        0,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
            }
        }
        tracing::debug!(channel = %self.name, side = ?self.side, "channel closed");
    }
}

/// Create `seg` exclusively, replacing a leftover segment whose device is
/// no longer running.
fn acquire_fresh(seg: &str, size: usize) -> Result<ShmHandle, ComError> {
    match ShmHandle::acquire(seg, size, ShmOpenMode::Create) {
        Ok(shm) => return Ok(shm),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    if let Ok(existing) = ShmHandle::acquire(seg, size, ShmOpenMode::Open) {
        let hdr = unsafe { &*(existing.as_mut_ptr() as *const PortHeader) };
        let owner = hdr.device_pid.load(Ordering::Acquire);
        if hdr.magic.load(Ordering::Acquire) == MAGIC
            && owner != 0
            && owner != current_pid()
            && process_alive(owner)
        {
            return Err(ComError::Busy);
        }
    }
    tracing::warn!(segment = seg, "replacing leftover channel segment");
    ShmHandle::clear_storage(seg);

    match ShmHandle::acquire(seg, size, ShmOpenMode::Create) {
        Ok(shm) => Ok(shm),
        // Still mapped by an old panel where names cannot be unlinked;
        // the caller reinitialises it in place.
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Ok(ShmHandle::acquire(seg, size, ShmOpenMode::Open)?)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lanes() -> [LaneConfig; 2] {
        [LaneConfig::with_depth(8, 4), LaneConfig::with_depth(64, 2)]
    }

    fn name(tag: &str) -> String {
        format!("tb_com_unit_{tag}_{}", std::process::id())
    }

    #[test]
    fn lane_config_with_depth() {
        let l = LaneConfig::with_depth(100, 3);
        assert_eq!(l.capacity, 312);
        assert_eq!(l.max_message, 100);
    }

    #[test]
    fn undersized_lane_is_rejected() {
        let bad = [LaneConfig {
            capacity: 8,
            max_message: 8,
        }];
        assert!(matches!(
            ComPort::create(&name("bad"), &bad),
            Err(ComError::InvalidParameter(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn dead_panel_is_reported_stale() {
        let n = name("stale");
        let device = ComPort::create(&n, &lanes()).expect("create");

        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let pid = child.id();
        child.wait().expect("wait");

        device.header().panel_pid.store(pid, Ordering::Release);
        assert_eq!(device.check_connection(), ConnectionState::Stale);
    }

    #[test]
    fn panel_evicted_by_reinit_sees_unconnected() {
        let n = name("evict");
        let device = ComPort::create(&n, &lanes()).expect("create");
        let panel = ComPort::connect(&n, &lanes()).expect("connect");
        assert_eq!(panel.check_connection(), ConnectionState::Connected);

        device.header().panel_pid.store(0, Ordering::Release);
        assert_eq!(panel.check_connection(), ConnectionState::Unconnected);
        assert!(matches!(
            panel.send(EVENT_LANE, b"x"),
            Err(ComError::NotConnected)
        ));
    }
}
