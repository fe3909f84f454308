// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-platform shared memory handle.
// Delegates to platform::PlatformShm (POSIX or Windows).

use std::io;

use crate::platform::{PlatformShm, ShmMode};

/// Open mode for shared memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmOpenMode {
    /// Create exclusively; fails if it already exists.
    Create,
    /// Open existing; fails if it does not exist.
    Open,
    /// Create if missing, open if it already exists.
    CreateOrOpen,
}

impl From<ShmOpenMode> for ShmMode {
    fn from(mode: ShmOpenMode) -> Self {
        match mode {
            ShmOpenMode::Create => ShmMode::Create,
            ShmOpenMode::Open => ShmMode::Open,
            ShmOpenMode::CreateOrOpen => ShmMode::CreateOrOpen,
        }
    }
}

/// A named, inter-process shared memory region.
///
/// The mapping carries a trailing reference counter shared by every handle
/// in every process; the name is removed when the last handle drops.
pub struct ShmHandle {
    inner: PlatformShm,
}

impl ShmHandle {
    /// Acquire a named shared memory region of `size` usable bytes.
    /// A freshly created region is zero-filled.
    pub fn acquire(name: &str, size: usize, mode: ShmOpenMode) -> io::Result<Self> {
        let inner = PlatformShm::acquire(name, size, mode.into())?;
        Ok(Self { inner })
    }

    /// Mutable pointer to the start of the usable region.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.inner.as_mut_ptr()
    }

    pub fn user_size(&self) -> usize {
        self.inner.user_size()
    }

    /// The platform name used to open the segment.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Whether this handle created the region.
    pub fn created(&self) -> bool {
        self.inner.created()
    }

    /// Number of live handles mapping this segment, across processes.
    pub fn ref_count(&self) -> i32 {
        self.inner.ref_count()
    }

    /// Force-remove the name. Existing mappings stay valid.
    pub fn unlink(&self) {
        self.inner.unlink();
    }

    /// Remove a named segment without an open handle.
    pub fn clear_storage(name: &str) {
        PlatformShm::unlink_by_name(name);
    }
}
