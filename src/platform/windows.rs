// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Windows implementation of the named primitives: shm via file mappings and
// auto-reset events via kernel event objects.

use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use windows_sys::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};

// Values spelled out locally; their windows-sys types moved between releases.
const FALSE: i32 = 0;
const ERROR_ALREADY_EXISTS: u32 = 183;
const SYNCHRONIZE: u32 = 0x0010_0000;
const EVENT_MODIFY_STATE: u32 = 0x0002;
const PROCESS_QUERY_LIMITED_INFORMATION: u32 = 0x1000;
const WAIT_OBJECT_0: u32 = 0;
const WAIT_ABANDONED: u32 = 0x80;
const WAIT_TIMEOUT: u32 = 258;
const STILL_ACTIVE: u32 = 259;
const INFINITE: u32 = 0xFFFF_FFFF;

// ---------------------------------------------------------------------------
// Layout helpers
// ---------------------------------------------------------------------------

const ALIGN: usize = std::mem::align_of::<AtomicI32>();

pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// # Safety
/// `mem` must point to a mapped view of at least `total_size` bytes.
unsafe fn acc_of<'a>(mem: *mut u8, total_size: usize) -> &'a AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

// ---------------------------------------------------------------------------
// PlatformShm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    Create,
    Open,
    CreateOrOpen,
}

pub struct PlatformShm {
    handle: HANDLE,
    mem: *mut u8,
    size: usize,
    user_size: usize,
    name: String,
    created: bool,
}

unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        use windows_sys::Win32::System::Memory::*;

        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let wide_name = to_wide(name);
        let total_size = calc_size(user_size);

        let (handle, created) = if mode == ShmMode::Open {
            let h = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, FALSE, wide_name.as_ptr()) };
            if h.is_null() {
                return Err(io::Error::last_os_error());
            }
            (h, false)
        } else {
            let h = unsafe {
                CreateFileMappingW(
                    windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE,
                    ptr::null(),
                    PAGE_READWRITE | SEC_COMMIT,
                    0,
                    total_size as u32,
                    wide_name.as_ptr(),
                )
            };
            let existed = unsafe { GetLastError() } == ERROR_ALREADY_EXISTS;
            if h.is_null() {
                return Err(io::Error::last_os_error());
            }
            if mode == ShmMode::Create && existed {
                unsafe { CloseHandle(h) };
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "shm already exists",
                ));
            }
            (h, !existed)
        };

        let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, total_size) };
        let mem = view.Value as *mut u8;
        if mem.is_null() {
            let e = io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(e);
        }

        unsafe { acc_of(mem, total_size).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            handle,
            mem,
            size: total_size,
            user_size,
            name: name.to_owned(),
            created,
        })
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    pub fn user_size(&self) -> usize {
        self.user_size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created(&self) -> bool {
        self.created
    }

    pub fn ref_count(&self) -> i32 {
        unsafe { acc_of(self.mem, self.size).load(Ordering::Acquire) }
    }

    /// Mappings are pagefile-backed and vanish with their last handle.
    pub fn unlink(&self) {}

    pub fn unlink_by_name(_name: &str) {}
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        use windows_sys::Win32::System::Memory::{UnmapViewOfFile, MEMORY_MAPPED_VIEW_ADDRESS};

        unsafe {
            acc_of(self.mem, self.size).fetch_sub(1, Ordering::AcqRel);
            UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS {
                Value: self.mem as *mut _,
            });
            CloseHandle(self.handle);
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformEvent: named auto-reset kernel event
// ---------------------------------------------------------------------------

pub struct PlatformEvent {
    handle: HANDLE,
}

unsafe impl Send for PlatformEvent {}
unsafe impl Sync for PlatformEvent {}

impl PlatformEvent {
    pub fn create(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::System::Threading::{CreateEventW, ResetEvent};

        let wide = to_wide(name);
        let handle = unsafe { CreateEventW(ptr::null(), FALSE, FALSE, wide.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        // An existing object keeps its state; start unsignaled either way.
        unsafe { ResetEvent(handle) };
        Ok(Self { handle })
    }

    pub fn open(name: &str) -> io::Result<Self> {
        use windows_sys::Win32::System::Threading::OpenEventW;

        let wide = to_wide(name);
        let handle = unsafe { OpenEventW(SYNCHRONIZE | EVENT_MODIFY_STATE, FALSE, wide.as_ptr()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { handle })
    }

    pub fn set(&self) -> io::Result<()> {
        use windows_sys::Win32::System::Threading::SetEvent;

        if unsafe { SetEvent(self.handle) } == FALSE {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn wait(&self, timeout: Duration) -> io::Result<bool> {
        use windows_sys::Win32::System::Threading::WaitForSingleObject;

        let ms = u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1);
        match unsafe { WaitForSingleObject(self.handle, ms) } {
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(true),
            WAIT_TIMEOUT => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }
}

impl Drop for PlatformEvent {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// Process liveness
// ---------------------------------------------------------------------------

pub fn process_alive(pid: u32) -> bool {
    use windows_sys::Win32::System::Threading::{GetExitCodeProcess, OpenProcess};

    if pid == 0 {
        return false;
    }
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, pid) };
    if handle.is_null() {
        return false;
    }
    let mut code: u32 = 0;
    let ok = unsafe { GetExitCodeProcess(handle, &mut code) };
    unsafe { CloseHandle(handle) };
    ok != FALSE && code == STILL_ACTIVE
}
