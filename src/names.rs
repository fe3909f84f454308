// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Names of the resources shared by the two processes, and the mangling that
// turns them into POSIX shm object names.

/// Short identifier of the communication channel registered by both sides.
pub const DEFAULT_CHANNEL_NAME: &str = "TRKB";

/// Signal raised by the device: render requests and acknowledgments.
pub const DEVICE_TO_PANEL_SIGNAL: &str = "TRACKER_BRIDGE_DEVICE_TO_PANEL";

/// Signal raised by the panel: response header and channel payloads.
pub const PANEL_TO_DEVICE_SIGNAL: &str = "TRACKER_BRIDGE_PANEL_TO_DEVICE";

/// Name of the shm segment backing the communication channel `channel`.
pub fn port_segment(channel: &str) -> String {
    format!("{channel}_COM_PORT__")
}

/// Name of the shm segment backing the signal `signal` (POSIX only).
pub fn signal_segment(signal: &str) -> String {
    format!("{signal}_SIGNAL__")
}

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Longest POSIX shm name accepted by the platform, leading '/' included.
/// 0 disables shortening.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0;

/// Produce a POSIX shm object name (leading '/').
///
/// Names over [`SHM_NAME_MAX`] are shortened to `/<head>_<16 hex digits>`,
/// where the hash covers the whole original name so distinct long names stay
/// distinct.
pub fn posix_shm_name(name: &str) -> String {
    shorten(name, SHM_NAME_MAX)
}

fn shorten(name: &str, limit: usize) -> String {
    let full = if name.starts_with('/') {
        name.to_owned()
    } else {
        format!("/{name}")
    };
    if limit == 0 || full.len() <= limit {
        return full;
    }

    let suffix = format!("_{:016x}", fnv1a_64(full.as_bytes()));
    let head_len = limit.saturating_sub(suffix.len() + 1);
    let head: String = full[1..].chars().take(head_len).collect();
    format!("/{head}{suffix}")
}
