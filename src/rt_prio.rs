// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Real-time scheduling for the panel worker thread.

use std::time::Duration;

use crate::wire::AudioInfo;

/// Time covered by one block of `frames` frames at `sample_rate`.
/// Zero for a non-positive sample rate.
pub fn block_period(sample_rate: i32, frames: usize) -> Duration {
    if sample_rate <= 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(frames as u64 * 1_000_000_000 / sample_rate as u64)
}

/// Block period of the largest block `info` allows.
pub fn audio_period(info: AudioInfo) -> Duration {
    block_period(info.sample_rate, info.max_frames())
}

/// Give the calling thread real-time priority, paced at `period`.
/// Returns `false` when the platform refused (missing privileges).
pub fn promote_current_thread(period: Duration) -> bool {
    #[cfg(target_os = "macos")]
    {
        promote_macos(period)
    }
    #[cfg(target_os = "linux")]
    {
        let _ = period;
        promote_linux()
    }
    #[cfg(windows)]
    {
        let _ = period;
        promote_windows()
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", windows)))]
    {
        let _ = period;
        false
    }
}

// macOS: Mach time-constraint policy, computation budget half the period.
#[cfg(target_os = "macos")]
fn promote_macos(period: Duration) -> bool {
    #[repr(C)]
    struct MachTimebaseInfo {
        numer: u32,
        denom: u32,
    }

    #[repr(C)]
    struct TimeConstraintPolicy {
        period: u32,
        computation: u32,
        constraint: u32,
        preemptible: i32,
    }

    extern "C" {
        fn mach_timebase_info(info: *mut MachTimebaseInfo) -> i32;
        fn pthread_mach_thread_np(thread: libc::pthread_t) -> u32;
        fn thread_policy_set(thread: u32, flavor: u32, policy_info: *const u32, count: u32) -> i32;
    }

    const THREAD_TIME_CONSTRAINT_POLICY: u32 = 2;
    const THREAD_TIME_CONSTRAINT_POLICY_COUNT: u32 = 4;

    let mut tb = MachTimebaseInfo { numer: 0, denom: 0 };
    unsafe { mach_timebase_info(&mut tb) };
    if tb.numer == 0 || tb.denom == 0 {
        return false;
    }
    let ns = period.as_nanos() as u64;
    let to_abs = |ns: u64| ((ns * tb.denom as u64) / tb.numer as u64) as u32;
    let policy = TimeConstraintPolicy {
        period: to_abs(ns),
        computation: to_abs(ns / 2),
        constraint: to_abs(ns),
        preemptible: 1,
    };
    let kr = unsafe {
        thread_policy_set(
            pthread_mach_thread_np(libc::pthread_self()),
            THREAD_TIME_CONSTRAINT_POLICY,
            &policy as *const _ as *const u32,
            THREAD_TIME_CONSTRAINT_POLICY_COUNT,
        )
    };
    kr == 0
}

// Linux: SCHED_FIFO, needs CAP_SYS_NICE or an rtprio limit.
#[cfg(target_os = "linux")]
fn promote_linux() -> bool {
    let param = libc::sched_param { sched_priority: 80 };
    unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0 }
}

#[cfg(windows)]
fn promote_windows() -> bool {
    use windows_sys::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_TIME_CRITICAL,
    };
    unsafe { SetThreadPriority(GetCurrentThread(), THREAD_PRIORITY_TIME_CRITICAL) != 0 }
}
