// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Device side of the bridge. Lives on the host's real-time audio thread:
// every wait is bounded and failures degrade the current block instead of
// propagating.

use crate::com::{ComPort, ConnectionState, EVENT_LANE, REALTIME_LANE};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ComError, Result};
use crate::events::{self, HostEventBuffer, MAX_HOST_EVENTS};
use crate::signal::{Signal, SignalWait};
use crate::wire::{
    self, AudioInfo, ChannelMask, ChannelResponse, RenderRequest, AUDIO_CHANNEL_COUNT,
    CHANNEL_PAIRS,
};

/// How one audio callback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Header and every served channel arrived; events were drained.
    Completed,
    /// No panel attached, or it vanished mid-call. Outputs untouched.
    PanelAbsent,
    /// The request could not be sent for another reason.
    SendFailed,
    /// The channel was rebuilt; this block is abandoned.
    Restarted,
    /// The panel's signal could not be opened.
    SignalUnavailable,
    /// A bounded wait expired.
    TimedOut,
    /// A message had an unexpected size or content.
    ProtocolError,
}

/// Output of one audio callback besides the sample buffers.
pub struct DriveOutput {
    /// Host channels (mono indices 0..128) written this block.
    pub served: ChannelMask,
    pub events: HostEventBuffer,
}

impl Default for DriveOutput {
    fn default() -> Self {
        Self {
            served: ChannelMask::new(),
            events: HostEventBuffer::new(),
        }
    }
}

impl DriveOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.served.clear();
        self.events.clear();
    }
}

/// Static description of the device presented to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub channel_count: usize,
    pub channel_names: Vec<String>,
    /// Bit `p` set: channels `2p` and `2p + 1` form a stereo pair.
    pub stereo_pairs: ChannelMask,
    pub max_event_output: usize,
}

pub const DEVICE_NAME: &str = "Tracker";

pub fn device_info() -> DeviceInfo {
    let channel_names = (0..AUDIO_CHANNEL_COUNT)
        .map(|i| match i {
            i if i < AUDIO_CHANNEL_COUNT / 2 => format!("Channel {}", i / 2 + 1),
            i if i < AUDIO_CHANNEL_COUNT - 2 => {
                format!("Plugin {}", (i - AUDIO_CHANNEL_COUNT / 2) / 2 + 1)
            }
            _ => "Preview".to_owned(),
        })
        .collect();
    let mut stereo_pairs = ChannelMask::new();
    (0..CHANNEL_PAIRS).for_each(|p| stereo_pairs.set(p));
    DeviceInfo {
        name: DEVICE_NAME,
        channel_count: AUDIO_CHANNEL_COUNT,
        channel_names,
        stereo_pairs,
        max_event_output: MAX_HOST_EVENTS,
    }
}

/// Early exit of a cycle.
enum Abort {
    Outcome(CycleOutcome),
    Restart(&'static str),
}

impl From<CycleOutcome> for Abort {
    fn from(o: CycleOutcome) -> Self {
        Abort::Outcome(o)
    }
}

pub struct DeviceDriver {
    config: BridgeConfig,
    port: Option<ComPort>,
    to_panel: Option<Signal>,
    /// Opened on first use; the panel creates it.
    from_panel: Option<Signal>,
    audio_info: AudioInfo,
    incoming: Vec<u8>,
    incoming_event: Vec<u8>,
}

impl DeviceDriver {
    /// Create the channel and the outgoing signal.
    pub fn open(config: BridgeConfig, audio_info: AudioInfo) -> Result<Self> {
        let mut driver = Self {
            incoming: vec![0u8; config.realtime_lane.max_message],
            incoming_event: vec![0u8; config.event_lane.max_message],
            config,
            port: None,
            to_panel: None,
            from_panel: None,
            audio_info,
        };
        driver.build()?;
        tracing::info!(
            channel = %driver.config.channel_name,
            sample_rate = audio_info.sample_rate,
            max_buffer_size = audio_info.max_buffer_size,
            "device opened"
        );
        Ok(driver)
    }

    fn build(&mut self) -> Result<()> {
        self.port = Some(ComPort::create(&self.config.channel_name, &self.config.lanes())?);
        let to_panel = Signal::create(&self.config.device_to_panel).map_err(|source| {
            BridgeError::SignalUnavailable {
                name: self.config.device_to_panel.clone(),
                source,
            }
        })?;
        self.to_panel = Some(to_panel);
        Ok(())
    }

    /// Release the channel and both signals. A later cycle or an explicit
    /// [`restart`](Self::restart) brings them back.
    pub fn close(&mut self) {
        self.from_panel = None;
        self.to_panel = None;
        self.port = None;
    }

    /// Tear down and rebuild the channel and the outgoing signal, keeping
    /// the current audio info. Any attached panel is detached.
    pub fn restart(&mut self) -> Result<()> {
        self.close();
        self.build()?;
        tracing::info!(channel = %self.config.channel_name, "device restarted");
        Ok(())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.port.is_some() && self.to_panel.is_some()
    }

    pub fn audio_info(&self) -> AudioInfo {
        self.audio_info
    }

    /// Takes effect with the next render request.
    pub fn set_audio_info(&mut self, info: AudioInfo) {
        tracing::debug!(
            sample_rate = info.sample_rate,
            max_buffer_size = info.max_buffer_size,
            "audio info changed"
        );
        self.audio_info = info;
    }

    pub fn panel_state(&self) -> ConnectionState {
        self.port
            .as_ref()
            .map_or(ConnectionState::Unconnected, ComPort::check_connection)
    }

    /// Run one audio callback.
    ///
    /// `buffers` holds the host's mono channels (normally 128); channel
    /// `2p` and `2p + 1` receive stereo pair `p`. Pairs the panel did not
    /// serve are zero-filled once the response header arrived. If the
    /// cycle ends before that, buffers are left as they were.
    pub fn drive_audio(
        &mut self,
        frames: u32,
        buffers: &mut [&mut [f32]],
        out: &mut DriveOutput,
    ) -> CycleOutcome {
        out.clear();
        match self.run_cycle(frames, buffers, out) {
            Ok(()) => CycleOutcome::Completed,
            Err(Abort::Outcome(outcome)) => outcome,
            Err(Abort::Restart(reason)) => {
                tracing::warn!(reason, "restarting channel");
                match self.restart() {
                    Ok(()) => CycleOutcome::Restarted,
                    Err(e) => {
                        tracing::error!(error = %e, "channel restart failed");
                        CycleOutcome::SendFailed
                    }
                }
            }
        }
    }

    fn run_cycle(
        &mut self,
        frames: u32,
        buffers: &mut [&mut [f32]],
        out: &mut DriveOutput,
    ) -> std::result::Result<(), Abort> {
        if !self.is_open() {
            return Err(Abort::Restart("channel closed"));
        }
        self.discard_stale_audio();
        self.send_request(frames)?;
        self.ensure_incoming_signal()?;

        let served = self.receive_header()?;

        let max_frames = self.audio_info.max_frames();
        let frames = (frames as usize).min(max_frames);
        for pair in 0..CHANNEL_PAIRS {
            // A served pair without host buffers is still received and
            // acknowledged so the panel stays in step.
            let host = stereo_pair(buffers, pair);
            if !served.is_set(pair) {
                if let Some((left, right)) = host {
                    let n = frames.min(left.len()).min(right.len());
                    left[..n].fill(0.0);
                    right[..n].fill(0.0);
                }
                continue;
            }

            self.await_panel()?;
            let len = self.read_realtime()?;
            let expected = [
                wire::channel_response_size(frames),
                wire::channel_response_size(max_frames),
            ];
            if !expected.contains(&len) {
                tracing::warn!(pair, len, ?expected, "unexpected channel response size");
                return Err(CycleOutcome::ProtocolError.into());
            }
            let Some(resp) = ChannelResponse::decode(&self.incoming[..len]) else {
                return Err(CycleOutcome::ProtocolError.into());
            };
            if resp.pair as usize != pair {
                tracing::warn!(expected = pair, got = resp.pair, "channel response out of order");
                return Err(CycleOutcome::ProtocolError.into());
            }
            if let Some((left, right)) = host {
                let n = frames.min(left.len()).min(right.len());
                resp.deinterleave(n, left, right);
                out.served.set(2 * pair);
                out.served.set(2 * pair + 1);
            }
            self.acknowledge()?;
        }

        self.drain_events(&mut out.events);
        tracing::trace!(frames, pairs = served.count(), "cycle completed");
        Ok(())
    }

    fn port(&self) -> std::result::Result<&ComPort, Abort> {
        self.port.as_ref().ok_or(Abort::Restart("channel closed"))
    }

    fn discard_stale_audio(&mut self) {
        let Some(port) = self.port.as_ref() else {
            return;
        };
        loop {
            match port.read(REALTIME_LANE, &mut self.incoming) {
                Ok(Some(_)) | Err(ComError::MessageTooLarge { .. }) => {}
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn send_request(&self, frames: u32) -> std::result::Result<(), Abort> {
        let req = RenderRequest::new(self.audio_info, frames);
        match self.port()?.send(REALTIME_LANE, &req.encode()) {
            Ok(()) => {}
            Err(e) if e.is_benign() => return Err(CycleOutcome::PanelAbsent.into()),
            Err(ComError::BufferFull { .. }) => return Err(Abort::Restart("realtime lane full")),
            Err(e) => {
                tracing::warn!(error = %e, "render request not sent");
                return Err(CycleOutcome::SendFailed.into());
            }
        }
        self.acknowledge()
    }

    fn ensure_incoming_signal(&mut self) -> std::result::Result<(), Abort> {
        if self.from_panel.is_some() {
            return Ok(());
        }
        match Signal::open(&self.config.panel_to_device) {
            Ok(sig) => {
                self.from_panel = Some(sig);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "panel signal not available yet");
                Err(CycleOutcome::SignalUnavailable.into())
            }
        }
    }

    /// Wait for the panel's next message. A timeout probes the channel and
    /// restarts it if the panel died.
    fn await_panel(&self) -> std::result::Result<(), Abort> {
        let Some(sig) = self.from_panel.as_ref() else {
            return Err(CycleOutcome::SignalUnavailable.into());
        };
        match sig.wait(self.config.wait_timeout) {
            SignalWait::Signaled => Ok(()),
            SignalWait::TimedOut => {
                if self.port()?.check_connection() == ConnectionState::Stale {
                    return Err(Abort::Restart("panel is stale"));
                }
                Err(CycleOutcome::TimedOut.into())
            }
            SignalWait::Failed => Err(CycleOutcome::TimedOut.into()),
        }
    }

    fn read_realtime(&mut self) -> std::result::Result<usize, Abort> {
        let port = self.port.as_ref().ok_or(Abort::Restart("channel closed"))?;
        match port.read(REALTIME_LANE, &mut self.incoming) {
            Ok(Some(len)) => Ok(len),
            Ok(None) => {
                tracing::warn!("signaled without a pending message");
                Err(CycleOutcome::ProtocolError.into())
            }
            Err(e) => {
                tracing::warn!(error = %e, "realtime read failed");
                Err(CycleOutcome::ProtocolError.into())
            }
        }
    }

    /// Raise the outgoing signal: after a request, or to acknowledge a message.
    fn acknowledge(&self) -> std::result::Result<(), Abort> {
        let Some(sig) = self.to_panel.as_ref() else {
            return Err(Abort::Restart("signal closed"));
        };
        sig.signal().map_err(|e| {
            tracing::error!(error = %e, "failed to signal panel");
            Abort::Outcome(CycleOutcome::SendFailed)
        })
    }

    fn receive_header(&mut self) -> std::result::Result<ChannelMask, Abort> {
        self.await_panel()?;
        let len = self.read_realtime()?;
        let Some(served) = ChannelMask::decode(&self.incoming[..len]) else {
            tracing::warn!(len, "unexpected response header size");
            return Err(CycleOutcome::ProtocolError.into());
        };
        self.acknowledge()?;
        Ok(served)
    }

    fn drain_events(&mut self, out: &mut HostEventBuffer) {
        let Some(port) = self.port.as_ref() else {
            return;
        };
        loop {
            match port.read(EVENT_LANE, &mut self.incoming_event) {
                Ok(Some(0)) | Ok(None) => break,
                Ok(Some(len)) => {
                    events::translate_into(&self.incoming_event[..len], out);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "event lane read failed");
                    break;
                }
            }
        }
    }
}

/// Left and right host buffers of stereo pair `pair`.
fn stereo_pair<'a>(
    buffers: &'a mut [&mut [f32]],
    pair: usize,
) -> Option<(&'a mut [f32], &'a mut [f32])> {
    match buffers.get_mut(2 * pair..2 * pair + 2)? {
        [l, r] => Some((&mut **l, &mut **r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_follow_the_layout() {
        let info = device_info();
        assert_eq!(info.channel_count, 128);
        assert_eq!(info.channel_names.len(), 128);
        assert_eq!(info.channel_names[0], "Channel 1");
        assert_eq!(info.channel_names[1], "Channel 1");
        assert_eq!(info.channel_names[63], "Channel 32");
        assert_eq!(info.channel_names[64], "Plugin 1");
        assert_eq!(info.channel_names[125], "Plugin 31");
        assert_eq!(info.channel_names[126], "Preview");
        assert_eq!(info.channel_names[127], "Preview");
        assert_eq!(info.stereo_pairs.count(), 64);
        assert_eq!(info.max_event_output, 512);
    }

    #[test]
    fn stereo_pair_borrows_adjacent_channels() {
        let mut a = [0.0f32; 2];
        let mut b = [0.0f32; 2];
        let mut c = [0.0f32; 2];
        let mut bufs: Vec<&mut [f32]> = vec![&mut a, &mut b, &mut c];
        {
            let (l, r) = stereo_pair(&mut bufs, 0).expect("pair 0");
            l[0] = 1.0;
            r[0] = 2.0;
        }
        assert!(stereo_pair(&mut bufs, 1).is_none());
        assert_eq!(bufs[0][0], 1.0);
        assert_eq!(bufs[1][0], 2.0);
    }
}
