// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named cross-process auto-reset signal.

use std::io;
use std::time::Duration;

use crate::platform::PlatformEvent;

/// Result of a bounded wait. A timeout is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalWait {
    Signaled,
    TimedOut,
    Failed,
}

/// One direction of the wake-up pair between the two processes.
///
/// The side that sends on a direction creates its signal; the receiving
/// side only opens it. A `signal()` wakes one waiter and the state resets
/// as that waiter returns. A signal raised with nobody waiting stays set
/// until the next wait consumes it.
pub struct Signal {
    inner: PlatformEvent,
    name: String,
}

impl Signal {
    /// Create (or take over) the signal `name`. It starts unsignaled.
    pub fn create(name: &str) -> io::Result<Self> {
        let inner = PlatformEvent::create(name)?;
        tracing::debug!(signal = name, "signal created");
        Ok(Self {
            inner,
            name: name.to_owned(),
        })
    }

    /// Open a signal created by the other process.
    pub fn open(name: &str) -> io::Result<Self> {
        let inner = PlatformEvent::open(name)?;
        Ok(Self {
            inner,
            name: name.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signal(&self) -> io::Result<()> {
        self.inner.set()
    }

    pub fn wait(&self, timeout: Duration) -> SignalWait {
        match self.inner.wait(timeout) {
            Ok(true) => SignalWait::Signaled,
            Ok(false) => SignalWait::TimedOut,
            Err(e) => {
                tracing::error!(signal = %self.name, error = %e, "signal wait failed");
                SignalWait::Failed
            }
        }
    }
}
