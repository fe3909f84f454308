// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Host mixer simulator: opens the device side and drives it at the block
// rate, reporting levels, transport events and connection changes.
//
// Usage: device_host [namespace] [seconds]
//
// Start tracker_panel with the same namespace to hear something.

use std::thread;
use std::time::{Duration, Instant};

use tracker_bridge::rt_prio;
use tracker_bridge::wire::AUDIO_CHANNEL_COUNT;
use tracker_bridge::{AudioInfo, BridgeConfig, CycleOutcome, DeviceDriver, DriveOutput};

const SAMPLE_RATE: i32 = 48_000;
const BLOCK: i32 = 512;

fn peak(buf: &[f32]) -> f32 {
    buf.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next().filter(|s| !s.is_empty()) {
        Some(ns) => BridgeConfig::default().namespaced(&ns),
        None => BridgeConfig::default(),
    };
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    let mut info = AudioInfo::new(SAMPLE_RATE, BLOCK);
    let mut device = match DeviceDriver::open(config, info) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "cannot open device");
            std::process::exit(1);
        }
    };

    let mut storage = vec![vec![0.0f32; BLOCK as usize * 2]; AUDIO_CHANNEL_COUNT];
    let mut out = DriveOutput::new();
    let mut last_state = device.panel_state();
    let mut last_report = Instant::now();
    let mut completed = 0u64;
    let start = Instant::now();

    tracing::info!(seconds, "driving device");
    while start.elapsed() < Duration::from_secs(seconds) {
        // Halfway through, switch to a larger block like a host would on a
        // settings change.
        if info.max_buffer_size == BLOCK && start.elapsed() > Duration::from_secs(seconds) / 2 {
            info = AudioInfo::new(SAMPLE_RATE, BLOCK * 2);
            device.set_audio_info(info);
        }

        let frames = info.max_buffer_size as u32;
        let mut buffers: Vec<&mut [f32]> = storage.iter_mut().map(|b| &mut b[..]).collect();
        let outcome = device.drive_audio(frames, &mut buffers, &mut out);
        if outcome == CycleOutcome::Completed {
            completed += 1;
        }

        for event in out.events.as_slice() {
            tracing::info!(?event, "transport event");
        }

        let state = device.panel_state();
        if state != last_state {
            tracing::info!(?state, "panel state changed");
            last_state = state;
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            tracing::info!(
                ?outcome,
                completed,
                served = out.served.count(),
                left = peak(&storage[0][..frames as usize]),
                right = peak(&storage[1][..frames as usize]),
                "status"
            );
            last_report = Instant::now();
        }

        thread::sleep(rt_prio::block_period(info.sample_rate, frames as usize));
    }

    device.close();
    tracing::info!(completed, "device closed");
}
