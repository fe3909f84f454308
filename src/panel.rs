// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Panel side of the bridge: a worker thread answering render requests one
// stereo pair at a time, plus the transport API the tracker calls from its
// own threads.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::com::{ComPort, ConnectionState, EVENT_LANE, REALTIME_LANE};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ComError, Result};
use crate::events::{self, TransportEvent};
use crate::pool::AudioBufferPool;
use crate::rt_prio;
use crate::signal::{Signal, SignalWait};
use crate::wire::{self, AudioInfo, ChannelMask, RenderRequest, CHANNEL_PAIRS, MAX_BUFFER_FRAMES};

/// The tracker's sound engine, driven synchronously by the panel worker.
pub trait RenderEngine: Send + 'static {
    /// Render `frames` frames into `target`, marking every stereo pair
    /// written. Returning `false` answers the block with no channels.
    fn render(&mut self, frames: usize, target: &mut RenderTarget<'_>) -> bool;

    /// The device changed its sample rate or block size. Not called for the
    /// first negotiation.
    fn audio_info_changed(&mut self, _sample_rate: i32, _max_buffer_size: i32) {}

    /// The device went away. Called once per disconnect.
    fn device_quit(&mut self) {}
}

/// Buffers a [`RenderEngine`] writes one block into.
pub struct RenderTarget<'a> {
    pool: &'a mut AudioBufferPool,
    served: &'a mut ChannelMask,
}

impl<'a> RenderTarget<'a> {
    pub fn max_frames(&self) -> usize {
        self.pool.max_frames()
    }

    /// Interleaved fixed-point storage of `pair`. Call
    /// [`mark_rendered`](Self::mark_rendered) once it holds the block.
    pub fn pair_mut(&mut self, pair: usize) -> Option<&mut [i32]> {
        self.pool.pair_mut(pair)
    }

    pub fn mark_rendered(&mut self, pair: usize) {
        if pair < CHANNEL_PAIRS {
            self.served.set(pair);
        }
    }

    pub fn is_rendered(&self, pair: usize) -> bool {
        self.served.is_set(pair)
    }

    /// Interleave float `left`/`right` into `pair` and mark it rendered.
    /// Returns `false` for an unknown pair.
    pub fn write_pair(&mut self, pair: usize, left: &[f32], right: &[f32]) -> bool {
        let Some(dst) = self.pool.pair_mut(pair) else {
            return false;
        };
        for ((frame, l), r) in dst.chunks_exact_mut(2).zip(left).zip(right) {
            frame[0] = wire::float_to_sample(*l);
            frame[1] = wire::float_to_sample(*r);
        }
        self.mark_rendered(pair);
        true
    }
}

struct Shared {
    running: AtomicBool,
    sample_rate: AtomicI32,
    /// Current channel; `None` once the panel is closed.
    port: Mutex<Option<Arc<ComPort>>>,
}

impl Shared {
    fn port(&self) -> MutexGuard<'_, Option<Arc<ComPort>>> {
        self.port.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle owned by the tracker. Dropping it stops the worker.
pub struct Panel<E: RenderEngine> {
    config: BridgeConfig,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<E>>,
}

impl<E: RenderEngine> Panel<E> {
    /// Attach to a running device and start the worker thread.
    pub fn open(config: BridgeConfig, engine: E) -> Result<Self> {
        let port = match ComPort::connect(&config.channel_name, &config.lanes()) {
            Ok(port) => port,
            Err(ComError::NotConnected) => return Err(BridgeError::DeviceNotRunning),
            Err(e) => return Err(e.into()),
        };
        let to_device =
            Signal::create(&config.panel_to_device).map_err(|source| BridgeError::SignalUnavailable {
                name: config.panel_to_device.clone(),
                source,
            })?;
        let from_device =
            Signal::open(&config.device_to_panel).map_err(|source| BridgeError::SignalUnavailable {
                name: config.device_to_panel.clone(),
                source,
            })?;

        let port = Arc::new(port);
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            sample_rate: AtomicI32::new(0),
            port: Mutex::new(Some(Arc::clone(&port))),
        });
        let worker = Worker {
            config: config.clone(),
            shared: Arc::clone(&shared),
            port,
            to_device,
            from_device,
            engine,
            pool: AudioBufferPool::new(MAX_BUFFER_FRAMES),
            served: ChannelMask::new(),
            audio_info: AudioInfo::default(),
            device_quit: false,
            message: vec![0u8; config.realtime_lane.max_message],
        };

        let handle = thread::Builder::new()
            .name("tracker-panel".to_string())
            .spawn(move || worker.run())
            .map_err(BridgeError::Spawn)?;

        tracing::info!(channel = %config.channel_name, "panel opened");
        Ok(Self {
            config,
            shared,
            worker: Some(handle),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Sample rate of the last negotiation; 0 before the first request.
    pub fn sample_rate(&self) -> i32 {
        self.shared.sample_rate.load(Ordering::Acquire)
    }

    pub fn device_state(&self) -> ConnectionState {
        self.shared
            .port()
            .as_ref()
            .map_or(ConnectionState::Unconnected, |p| p.check_connection())
    }

    pub fn signal_play(&self, bpm: f64) -> std::result::Result<(), ComError> {
        self.send_event(TransportEvent::Play {
            tempo: events::tempo_from_bpm(bpm),
        })
    }

    pub fn signal_stop(&self) -> std::result::Result<(), ComError> {
        self.send_event(TransportEvent::Stop)
    }

    pub fn signal_tempo(&self, bpm: f64) -> std::result::Result<(), ComError> {
        self.send_event(TransportEvent::ChangeTempo {
            tempo: events::tempo_from_bpm(bpm),
        })
    }

    /// Ask the host to jump to where playback stood `frames_elapsed`
    /// frames ago at `bpm`.
    pub fn signal_reposition(&self, bpm: f64, frames_elapsed: u64) -> std::result::Result<(), ComError> {
        let position = events::reposition_ticks(frames_elapsed, self.sample_rate(), bpm);
        self.send_event(TransportEvent::Reposition { position })
    }

    fn send_event(&self, event: TransportEvent) -> std::result::Result<(), ComError> {
        let (bytes, len) = event.encode();
        // The lock also keeps concurrent callers from sharing the lane's producer end.
        match self.shared.port().as_ref() {
            Some(port) => port.send(EVENT_LANE, &bytes[..len]),
            None => Err(ComError::NotConnected),
        }
    }

    /// Stop the worker and detach from the device, handing the engine back.
    /// `None` if already closed or the worker panicked.
    pub fn close(&mut self) -> Option<E> {
        self.shared.running.store(false, Ordering::Release);
        let handle = self.worker.take()?;
        let joined = handle.join();
        self.shared.port().take();
        match joined {
            Ok(engine) => {
                tracing::info!(channel = %self.config.channel_name, "panel closed");
                Some(engine)
            }
            Err(_) => {
                tracing::error!("panel worker panicked");
                None
            }
        }
    }
}

impl<E: RenderEngine> Drop for Panel<E> {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker<E> {
    config: BridgeConfig,
    shared: Arc<Shared>,
    port: Arc<ComPort>,
    to_device: Signal,
    from_device: Signal,
    engine: E,
    pool: AudioBufferPool,
    served: ChannelMask,
    /// Last negotiated values; zero until the first request.
    audio_info: AudioInfo,
    device_quit: bool,
    message: Vec<u8>,
}

impl<E: RenderEngine> Worker<E> {
    fn run(mut self) -> E {
        while self.shared.running.load(Ordering::Acquire) {
            if !self.check_connection() {
                continue;
            }
            self.poll_request();
        }
        self.engine
    }

    fn notify_device_quit(&mut self) {
        if !self.device_quit {
            self.device_quit = true;
            tracing::info!("device quit");
            self.engine.device_quit();
        }
    }

    /// `true` while the device is attached. Otherwise fire the quit
    /// notification once and try to attach to a rebuilt channel.
    fn check_connection(&mut self) -> bool {
        if self.port.check_connection() == ConnectionState::Connected {
            return true;
        }
        self.notify_device_quit();
        if self.reattach() {
            return true;
        }
        thread::sleep(self.config.wait_timeout);
        false
    }

    fn reattach(&mut self) -> bool {
        let Ok(port) = ComPort::connect(&self.config.channel_name, &self.config.lanes()) else {
            return false;
        };
        if port.check_connection() != ConnectionState::Connected {
            return false;
        }
        let from_device = match Signal::open(&self.config.device_to_panel) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::debug!(error = %e, "device signal not available yet");
                return false;
            }
        };
        let port = Arc::new(port);
        *self.shared.port() = Some(Arc::clone(&port));
        self.port = port;
        self.from_device = from_device;
        self.device_quit = false;
        tracing::info!(channel = %self.config.channel_name, "panel reattached");
        true
    }

    fn poll_request(&mut self) {
        match self.from_device.wait(self.config.wait_timeout) {
            SignalWait::Signaled => {}
            SignalWait::TimedOut => {
                if self.port.check_connection() != ConnectionState::Connected {
                    self.notify_device_quit();
                }
                return;
            }
            SignalWait::Failed => {
                thread::sleep(self.config.wait_timeout);
                return;
            }
        }

        let len = match self.port.read(REALTIME_LANE, &mut self.message) {
            Ok(Some(len)) => len,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "request read failed");
                return;
            }
        };
        let Some(request) = RenderRequest::decode(&self.message[..len]) else {
            tracing::debug!(len, "discarding short request");
            return;
        };

        self.negotiate(request.audio_info());
        if let Err(e) = self.port.drain(REALTIME_LANE) {
            tracing::warn!(error = %e, "failed to drain realtime lane");
        }
        self.render_and_respond(request.frames_to_render as usize);
    }

    fn negotiate(&mut self, info: AudioInfo) {
        if info == self.audio_info {
            return;
        }
        tracing::debug!(
            sample_rate = info.sample_rate,
            max_buffer_size = info.max_buffer_size,
            "negotiating audio info"
        );
        self.pool.reallocate(info.max_frames());
        if self.audio_info.sample_rate != 0 {
            self.engine
                .audio_info_changed(info.sample_rate, info.max_buffer_size);
        }
        if self.config.realtime_worker && self.audio_info.sample_rate == 0 {
            // Paced by the first negotiated block size.
            if !rt_prio::promote_current_thread(rt_prio::audio_period(info)) {
                tracing::warn!("real-time priority unavailable for panel worker");
            }
        }
        self.audio_info = info;
        self.shared
            .sample_rate
            .store(info.sample_rate, Ordering::Release);
    }

    fn render_and_respond(&mut self, frames: usize) {
        let frames = frames.min(self.pool.max_frames());
        self.served.clear();
        let rendered = {
            let mut target = RenderTarget {
                pool: &mut self.pool,
                served: &mut self.served,
            };
            self.engine.render(frames, &mut target)
        };
        if !rendered {
            tracing::warn!(frames, "render failed, answering with no channels");
            self.served.clear();
        }

        if !self.send_and_await(&self.served.encode()) {
            return;
        }
        let served = self.served;
        for pair in served.iter().take_while(|&p| p < CHANNEL_PAIRS) {
            let Some(bytes) = self.pool.encode_response(pair, frames) else {
                break;
            };
            let ok = match self.port.send(REALTIME_LANE, bytes) {
                Ok(()) => self.signal_and_await(),
                Err(e) => {
                    tracing::warn!(pair, error = %e, "channel response not sent");
                    false
                }
            };
            if !ok {
                break;
            }
        }
    }

    fn send_and_await(&self, msg: &[u8]) -> bool {
        match self.port.send(REALTIME_LANE, msg) {
            Ok(()) => self.signal_and_await(),
            Err(e) => {
                tracing::warn!(error = %e, "response header not sent");
                false
            }
        }
    }

    /// Wake the device and wait for its acknowledgment.
    fn signal_and_await(&self) -> bool {
        if let Err(e) = self.to_device.signal() {
            tracing::error!(error = %e, "failed to signal device");
            return false;
        }
        match self.from_device.wait(self.config.wait_timeout) {
            SignalWait::Signaled => true,
            other => {
                tracing::debug!(?other, "no acknowledgment from device");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_pair_interleaves_and_marks() {
        let mut pool = AudioBufferPool::new(4);
        let mut served = ChannelMask::new();
        let mut target = RenderTarget {
            pool: &mut pool,
            served: &mut served,
        };
        assert!(target.write_pair(2, &[0.5, -0.25], &[1.0, 0.0]));
        assert!(!target.write_pair(CHANNEL_PAIRS, &[0.0], &[0.0]));
        assert!(target.is_rendered(2));

        let half = 1 << 26;
        assert_eq!(&pool.pair(2).expect("pair")[..4], &[half, 1 << 27, -(half / 2), 0]);
        assert_eq!(served.iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn mark_rendered_ignores_out_of_range_pairs() {
        let mut pool = AudioBufferPool::new(1);
        let mut served = ChannelMask::new();
        let mut target = RenderTarget {
            pool: &mut pool,
            served: &mut served,
        };
        target.mark_rendered(CHANNEL_PAIRS);
        target.mark_rendered(0);
        assert_eq!(served.count(), 1);
    }
}
