// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport events sent by the panel on the event lane, and their
// translation into host event records on the device side.

use std::fmt;

/// Musical time resolution of reposition events.
pub const PPQ: u32 = 15360;
/// Quarter notes of lookahead the reposition position is expressed against.
pub const REPOSITION_LOOKAHEAD_BEATS: u32 = 32;
/// Host event records a single audio callback can emit.
pub const MAX_HOST_EVENTS: usize = 512;
/// Largest encoded transport event.
pub const MAX_EVENT_SIZE: usize = 5;

const TAG_PLAY: u8 = 0;
const TAG_STOP: u8 = 1;
const TAG_CHANGE_TEMPO: u8 = 2;
const TAG_REPOSITION: u8 = 3;

/// Tempo in the wire unit (bpm * 1000).
pub fn tempo_from_bpm(bpm: f64) -> u32 {
    (bpm * 1000.0) as u32
}

/// Reposition target for an event issued `frames_elapsed` frames ago.
///
/// `PPQ * 32 - PPQ * beats_passed`, where `beats_passed` is the musical time
/// covered by `frames_elapsed` at `bpm`. The subtraction wraps like the
/// unsigned wire field does.
pub fn reposition_ticks(frames_elapsed: u64, sample_rate: i32, bpm: f64) -> u32 {
    let beats_passed = if sample_rate > 0 {
        (frames_elapsed as f64 / sample_rate as f64) * (bpm / 60.0)
    } else {
        0.0
    };
    (PPQ * REPOSITION_LOOKAHEAD_BEATS).wrapping_sub((PPQ as f64 * beats_passed) as u32)
}

/// Transport command on the event lane: one tag byte, then a native-endian
/// u32 payload for every variant but `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Play { tempo: u32 },
    Stop,
    ChangeTempo { tempo: u32 },
    Reposition { position: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    Empty,
    UnknownTag(u8),
    Truncated { tag: u8 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Empty => write!(f, "empty event"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown event tag {tag}"),
            DecodeError::Truncated { tag } => write!(f, "truncated event with tag {tag}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl TransportEvent {
    pub fn encode(&self) -> ([u8; MAX_EVENT_SIZE], usize) {
        let mut out = [0u8; MAX_EVENT_SIZE];
        let (tag, payload) = match *self {
            TransportEvent::Play { tempo } => (TAG_PLAY, Some(tempo)),
            TransportEvent::Stop => (TAG_STOP, None),
            TransportEvent::ChangeTempo { tempo } => (TAG_CHANGE_TEMPO, Some(tempo)),
            TransportEvent::Reposition { position } => (TAG_REPOSITION, Some(position)),
        };
        out[0] = tag;
        match payload {
            Some(v) => {
                out[1..5].copy_from_slice(&v.to_ne_bytes());
                (out, 5)
            }
            None => (out, 1),
        }
    }

    pub fn decode(msg: &[u8]) -> Result<Self, DecodeError> {
        let (&tag, rest) = msg.split_first().ok_or(DecodeError::Empty)?;
        let payload = || {
            rest.get(..4)
                .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .ok_or(DecodeError::Truncated { tag })
        };
        match tag {
            TAG_PLAY => Ok(TransportEvent::Play { tempo: payload()? }),
            TAG_STOP => Ok(TransportEvent::Stop),
            TAG_CHANGE_TEMPO => Ok(TransportEvent::ChangeTempo { tempo: payload()? }),
            TAG_REPOSITION => Ok(TransportEvent::Reposition {
                position: payload()?,
            }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

/// Event record handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostEvent {
    RequestPlay,
    #[default]
    RequestStop,
    /// Tempo in bpm * 1000.
    RequestTempo { tempo: u32 },
    RequestReposition { ppq15360: u32 },
}

/// Fixed-capacity host event output of one audio callback.
pub struct HostEventBuffer {
    slots: Box<[HostEvent]>,
    count: usize,
}

impl Default for HostEventBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_HOST_EVENTS)
    }
}

impl HostEventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![HostEvent::default(); capacity].into_boxed_slice(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn as_slice(&self) -> &[HostEvent] {
        &self.slots[..self.count]
    }

    pub fn push(&mut self, event: HostEvent) -> bool {
        match self.reserve() {
            Some(slot) => {
                *slot = event;
                true
            }
            None => false,
        }
    }

    fn reserve(&mut self) -> Option<&mut HostEvent> {
        let slot = self.slots.get_mut(self.count)?;
        self.count += 1;
        Some(slot)
    }

    fn release(&mut self) {
        self.count = self.count.saturating_sub(1);
    }
}

/// Translate one event-lane message into host records appended to `out`.
/// Returns the number of records added.
///
/// A slot is reserved before the tag is inspected; an unrecognised message
/// gives the slot back.
pub fn translate_into(msg: &[u8], out: &mut HostEventBuffer) -> usize {
    let Some(slot) = out.reserve() else {
        tracing::warn!("host event buffer full, dropping transport event");
        return 0;
    };
    match TransportEvent::decode(msg) {
        Ok(TransportEvent::Play { tempo }) => {
            *slot = HostEvent::RequestPlay;
            if out.push(HostEvent::RequestTempo { tempo }) {
                2
            } else {
                1
            }
        }
        Ok(TransportEvent::Stop) => {
            *slot = HostEvent::RequestStop;
            1
        }
        Ok(TransportEvent::ChangeTempo { tempo }) => {
            *slot = HostEvent::RequestTempo { tempo };
            1
        }
        Ok(TransportEvent::Reposition { position }) => {
            *slot = HostEvent::RequestReposition { ppq15360: position };
            1
        }
        Err(e) => {
            tracing::warn!(error = %e, "discarding transport event");
            out.release();
            0
        }
    }
}
