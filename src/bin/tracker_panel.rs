// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tracker stand-in: attaches to a running device, renders test tones on
// stereo pairs 0 and 1 and sends a few transport events.
//
// Usage: tracker_panel [namespace]
//
// Exits once the device goes away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracker_bridge::wire::MAX_BUFFER_FRAMES;
use tracker_bridge::{BridgeConfig, BridgeError, Panel, RenderEngine, RenderTarget};

const TONE_RATE: f32 = 48_000.0;

struct ToneEngine {
    phase: f32,
    left: Vec<f32>,
    right: Vec<f32>,
    quit: Arc<AtomicBool>,
}

impl ToneEngine {
    fn new(quit: Arc<AtomicBool>) -> Self {
        Self {
            phase: 0.0,
            left: vec![0.0; MAX_BUFFER_FRAMES],
            right: vec![0.0; MAX_BUFFER_FRAMES],
            quit,
        }
    }
}

impl RenderEngine for ToneEngine {
    fn render(&mut self, frames: usize, target: &mut RenderTarget<'_>) -> bool {
        let step = 440.0 * std::f32::consts::TAU / TONE_RATE;
        for i in 0..frames {
            let s = (self.phase + step * i as f32).sin();
            self.left[i] = 0.5 * s;
            self.right[i] = 0.25 * s;
        }
        self.phase = (self.phase + step * frames as f32) % std::f32::consts::TAU;

        let (l, r) = (&self.left[..frames], &self.right[..frames]);
        target.write_pair(0, l, r) && target.write_pair(1, r, l)
    }

    fn audio_info_changed(&mut self, sample_rate: i32, max_buffer_size: i32) {
        tracing::info!(sample_rate, max_buffer_size, "device audio info changed");
    }

    fn device_quit(&mut self) {
        self.quit.store(true, Ordering::Release);
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = match std::env::args().nth(1).filter(|s| !s.is_empty()) {
        Some(ns) => BridgeConfig::default().namespaced(&ns),
        None => BridgeConfig::default(),
    };

    let quit = Arc::new(AtomicBool::new(false));
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut panel = loop {
        match Panel::open(config.clone(), ToneEngine::new(Arc::clone(&quit))) {
            Ok(panel) => break panel,
            Err(BridgeError::DeviceNotRunning | BridgeError::SignalUnavailable { .. })
                if Instant::now() < deadline =>
            {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot attach to device");
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = panel.signal_play(120.0) {
        tracing::warn!(error = %e, "play not sent");
    }

    let started = Instant::now();
    let mut tempo_sent = false;
    while !quit.load(Ordering::Acquire) && panel.is_running() {
        if !tempo_sent && started.elapsed() > Duration::from_secs(2) {
            let _ = panel.signal_tempo(125.0);
            let _ = panel.signal_reposition(125.0, 0);
            tempo_sent = true;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let _ = panel.signal_stop();
    panel.close();
    tracing::info!("panel exited");
}
