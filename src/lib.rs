// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Lock-step cross-process bridge between a host mixer "device" and a tracker
// "panel". The device pulls rendered audio one stereo channel at a time over a
// shared-memory message channel paced by a pair of named auto-reset signals;
// the panel pushes transport events back on a separate lane.

pub mod names;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod ring;

pub mod com;
pub use com::{ComPort, ConnectionState, LaneConfig, Side, EVENT_LANE, REALTIME_LANE};

pub mod signal;
pub use signal::{Signal, SignalWait};

pub mod config;
pub use config::BridgeConfig;

pub mod error;
pub use error::{BridgeError, ComError, Result};

pub mod wire;
pub use wire::{AudioInfo, ChannelMask, RenderRequest};

pub mod pool;
pub use pool::AudioBufferPool;

pub mod events;
pub use events::{HostEvent, HostEventBuffer, TransportEvent};

pub mod device;
pub use device::{device_info, CycleOutcome, DeviceDriver, DeviceInfo, DriveOutput};

pub mod panel;
pub use panel::{Panel, RenderEngine, RenderTarget};

pub mod rt_prio;

/// Process id of the caller, as recorded in the channel header.
pub fn current_pid() -> u32 {
    std::process::id()
}

/// Whether a process with `pid` is still running.
pub fn process_alive(pid: u32) -> bool {
    platform::process_alive(pid)
}
