// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX implementation of the named primitives: shm segments (shm_open +
// mmap, trailing shared ref counter) and auto-reset events (process-shared
// robust pthread mutex + condition variable living in a shm segment).

use std::collections::HashMap;
use std::ffi::CString;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::names;

// ---------------------------------------------------------------------------
// Layout helpers
// ---------------------------------------------------------------------------

/// Every segment ends with an `AtomicI32` counting the live mappings.
const ALIGN: usize = std::mem::align_of::<AtomicI32>();

pub(crate) fn calc_size(user_size: usize) -> usize {
    let aligned = ((user_size.wrapping_sub(1) / ALIGN) + 1) * ALIGN;
    aligned + std::mem::size_of::<AtomicI32>()
}

/// # Safety
/// `mem` must point to a mapped region of at least `total_size` bytes.
unsafe fn acc_of<'a>(mem: *mut u8, total_size: usize) -> &'a AtomicI32 {
    let offset = total_size - std::mem::size_of::<AtomicI32>();
    &*(mem.add(offset) as *const AtomicI32)
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
    mem: *mut u8,
    size: usize,
    user_size: usize,
    name: String,
    created: bool,
}

// Safety: the mapping is process-shared; callers synchronise through atomics.
unsafe impl Send for PlatformShm {}
unsafe impl Sync for PlatformShm {}

impl PlatformShm {
    pub fn acquire(name: &str, user_size: usize, mode: ShmMode) -> io::Result<Self> {
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "name is empty"));
        }
        if user_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size is 0"));
        }

        let posix_name = names::posix_shm_name(name);
        let c_name = CString::new(posix_name.as_bytes())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let perms: libc::mode_t = 0o666;
        let total_size = calc_size(user_size);

        let open_excl = || unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                perms as libc::c_uint,
            )
        };
        let open_existing =
            || unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, perms as libc::c_uint) };

        // Only the creator truncates: resizing a live object can zero it on macOS.
        let (fd, created) = match mode {
            ShmMode::Create => (open_excl(), true),
            ShmMode::Open => (open_existing(), false),
            ShmMode::CreateOrOpen => {
                let f = open_excl();
                if f != -1 {
                    (f, true)
                } else {
                    let e = io::Error::last_os_error();
                    if e.raw_os_error() != Some(libc::EEXIST) {
                        return Err(e);
                    }
                    (open_existing(), false)
                }
            }
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        unsafe { libc::fchmod(fd, perms) };

        if created {
            if unsafe { libc::ftruncate(fd, total_size as libc::off_t) } != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(c_name.as_ptr());
                }
                return Err(err);
            }
        } else {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }
            if (st.st_size as usize) < total_size {
                unsafe { libc::close(fd) };
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "segment '{posix_name}' holds {} bytes, {total_size} expected",
                        st.st_size
                    ),
                ));
            }
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        unsafe { libc::close(fd) };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        unsafe { acc_of(mem as *mut u8, total_size).fetch_add(1, Ordering::AcqRel) };

        Ok(Self {
            mem: mem as *mut u8,
            size: total_size,
            user_size,
            name: posix_name,
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

    /// Whether this handle created the object (as opposed to opening it).
    pub fn created(&self) -> bool {
        self.created
    }

    pub fn ref_count(&self) -> i32 {
        unsafe { acc_of(self.mem, self.size).load(Ordering::Acquire) }
    }

    /// Remove the name; existing mappings stay valid.
    pub fn unlink(&self) {
        if let Ok(c_name) = CString::new(self.name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }

    pub fn unlink_by_name(name: &str) {
        let posix_name = names::posix_shm_name(name);
        if let Ok(c_name) = CString::new(posix_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
    }
}

impl Drop for PlatformShm {
    fn drop(&mut self) {
        let prev = unsafe { acc_of(self.mem, self.size).fetch_sub(1, Ordering::AcqRel) };
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.size) };
        if prev <= 1 {
            self.unlink();
        }
    }
}

// ---------------------------------------------------------------------------
// Process-local cache of event segments.
// A process-shared pthread object must be used through one mapping per
// process (macOS binds it to the address it was initialised at), so every
// handle opened in this process for the same name shares one mmap.
// ---------------------------------------------------------------------------

struct CachedShm {
    shm: PlatformShm,
    local_ref: AtomicUsize,
}

fn event_cache() -> &'static Mutex<HashMap<String, Arc<CachedShm>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<CachedShm>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cached_acquire<F>(name: &str, size: usize, mode: ShmMode, init: F) -> io::Result<Arc<CachedShm>>
where
    F: FnOnce(*mut u8) -> io::Result<()>,
{
    let mut cache = event_cache()
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "event cache poisoned"))?;
    if let Some(entry) = cache.get(name) {
        entry.local_ref.fetch_add(1, Ordering::Relaxed);
        return Ok(Arc::clone(entry));
    }
    let shm = PlatformShm::acquire(name, size, mode)?;
    if shm.created() {
        init(shm.as_mut_ptr())?;
    }
    let entry = Arc::new(CachedShm {
        shm,
        local_ref: AtomicUsize::new(1),
    });
    cache.insert(name.to_owned(), Arc::clone(&entry));
    Ok(entry)
}

fn cached_release(name: &str) {
    if let Ok(mut cache) = event_cache().lock() {
        if let Some(entry) = cache.get(name) {
            if entry.local_ref.fetch_sub(1, Ordering::AcqRel) <= 1 {
                cache.remove(name);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Robust mutex symbols; macOS has no robust mutexes.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
extern "C" {
    fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
}

#[cfg(not(target_os = "macos"))]
const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

/// Repair a robust mutex whose previous owner died while holding it.
/// Returns `false` when `eno` is not `EOWNERDEAD`.
fn recover_owner_dead(mtx: *mut libc::pthread_mutex_t, eno: i32) -> io::Result<bool> {
    #[cfg(not(target_os = "macos"))]
    if eno == libc::EOWNERDEAD {
        let eno2 = unsafe { pthread_mutex_consistent(mtx) };
        if eno2 != 0 {
            return Err(io::Error::from_raw_os_error(eno2));
        }
        return Ok(true);
    }
    let _ = (mtx, eno);
    Ok(false)
}

// ---------------------------------------------------------------------------
// PlatformEvent: named auto-reset event
// ---------------------------------------------------------------------------

#[repr(C)]
struct EventCell {
    mutex: libc::pthread_mutex_t,
    cond: libc::pthread_cond_t,
    signaled: AtomicU32,
}

fn init_event_cell(base: *mut u8) -> io::Result<()> {
    let cell = base as *mut EventCell;
    unsafe {
        ptr::write_bytes(cell, 0, 1);
        let mtx = ptr::addr_of_mut!((*cell).mutex);
        let cond = ptr::addr_of_mut!((*cell).cond);

        let mut mattr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let mut eno = libc::pthread_mutexattr_init(&mut mattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        eno = libc::pthread_mutexattr_setpshared(&mut mattr, libc::PTHREAD_PROCESS_SHARED);
        #[cfg(not(target_os = "macos"))]
        if eno == 0 {
            eno = pthread_mutexattr_setrobust(&mut mattr, PTHREAD_MUTEX_ROBUST);
        }
        if eno == 0 {
            eno = libc::pthread_mutex_init(mtx, &mattr);
        }
        libc::pthread_mutexattr_destroy(&mut mattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }

        let mut cattr: libc::pthread_condattr_t = std::mem::zeroed();
        eno = libc::pthread_condattr_init(&mut cattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        eno = libc::pthread_condattr_setpshared(&mut cattr, libc::PTHREAD_PROCESS_SHARED);
        if eno == 0 {
            eno = libc::pthread_cond_init(cond, &cattr);
        }
        libc::pthread_condattr_destroy(&mut cattr);
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
    }
    Ok(())
}

pub struct PlatformEvent {
    cached: Arc<CachedShm>,
    key: String,
}

impl PlatformEvent {
    /// Create the event, or take over a segment left behind by a previous
    /// owner. The event starts unsignaled.
    pub fn create(name: &str) -> io::Result<Self> {
        let key = names::signal_segment(name);
        let cached = cached_acquire(
            &key,
            std::mem::size_of::<EventCell>(),
            ShmMode::CreateOrOpen,
            init_event_cell,
        )?;
        let event = Self { cached, key };
        event.lock()?;
        event.cell().signaled.store(0, Ordering::Relaxed);
        event.unlock()?;
        Ok(event)
    }

    /// Open an event created by the other process. Fails if it does not exist.
    pub fn open(name: &str) -> io::Result<Self> {
        let key = names::signal_segment(name);
        let cached = cached_acquire(
            &key,
            std::mem::size_of::<EventCell>(),
            ShmMode::Open,
            |_| Ok(()),
        )?;
        Ok(Self { cached, key })
    }

    fn cell(&self) -> &EventCell {
        unsafe { &*(self.cached.shm.as_mut_ptr() as *const EventCell) }
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        unsafe { ptr::addr_of_mut!((*(self.cached.shm.as_mut_ptr() as *mut EventCell)).mutex) }
    }

    fn cond_ptr(&self) -> *mut libc::pthread_cond_t {
        unsafe { ptr::addr_of_mut!((*(self.cached.shm.as_mut_ptr() as *mut EventCell)).cond) }
    }

    fn lock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_lock(self.mtx_ptr()) };
        if eno == 0 || recover_owner_dead(self.mtx_ptr(), eno)? {
            return Ok(());
        }
        Err(io::Error::from_raw_os_error(eno))
    }

    fn unlock(&self) -> io::Result<()> {
        let eno = unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) };
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Set the event and wake one waiter.
    pub fn set(&self) -> io::Result<()> {
        self.lock()?;
        self.cell().signaled.store(1, Ordering::Relaxed);
        let eno = unsafe { libc::pthread_cond_signal(self.cond_ptr()) };
        self.unlock()?;
        if eno != 0 {
            return Err(io::Error::from_raw_os_error(eno));
        }
        Ok(())
    }

    /// Wait until set, consuming the set state. `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            + timeout;
        let ts = libc::timespec {
            tv_sec: deadline.as_secs() as libc::time_t,
            tv_nsec: deadline.subsec_nanos() as libc::c_long,
        };

        self.lock()?;
        let signaled = &self.cell().signaled;
        let outcome = loop {
            if signaled.swap(0, Ordering::Relaxed) != 0 {
                break Ok(true);
            }
            let eno = unsafe { libc::pthread_cond_timedwait(self.cond_ptr(), self.mtx_ptr(), &ts) };
            match eno {
                0 | libc::EINTR => {}
                libc::ETIMEDOUT => break Ok(signaled.swap(0, Ordering::Relaxed) != 0),
                _ => match recover_owner_dead(self.mtx_ptr(), eno) {
                    Ok(true) => {}
                    Ok(false) => break Err(io::Error::from_raw_os_error(eno)),
                    Err(e) => break Err(e),
                },
            }
        };
        self.unlock()?;
        outcome
    }
}

impl Drop for PlatformEvent {
    fn drop(&mut self) {
        // No pthread_*_destroy: the other process may still use the objects.
        cached_release(&self.key);
    }
}

// ---------------------------------------------------------------------------
// Process liveness
// ---------------------------------------------------------------------------

pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}
