// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error types of the bridge.

use std::io;
use thiserror::Error;

/// Failure of a message channel operation.
#[derive(Error, Debug)]
pub enum ComError {
    /// No peer is attached to the other end of the channel.
    #[error("peer not connected")]
    NotConnected,

    #[error("lane {lane} is full")]
    BufferFull { lane: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("message of {size} bytes exceeds lane {lane} limit of {max}")]
    MessageTooLarge { lane: usize, size: usize, max: usize },

    /// Another live process already holds this side of the channel.
    #[error("channel side already in use")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ComError {
    /// Errors the device absorbs silently: the panel is not there yet, or
    /// vanished mid-call.
    pub fn is_benign(&self) -> bool {
        matches!(self, ComError::NotConnected | ComError::InvalidParameter(_))
    }
}

/// Startup and lifecycle errors of the two drivers.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("device side is not running")]
    DeviceNotRunning,

    #[error("signal '{name}' unavailable: {source}")]
    SignalUnavailable {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("channel error: {0}")]
    Com(#[from] ComError),

    #[error("failed to spawn panel worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
