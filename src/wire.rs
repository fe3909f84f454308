// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Byte layout of the messages exchanged on the realtime lane.
// All integers are native-endian: both ends run on the same machine.
//
//   RenderRequest        i32 sample_rate | i32 max_buffer_size | u32 frames   (12 bytes)
//   ResponseHeader       u32 served[4]                                         (16 bytes)
//   ChannelResponse      u16 pair index | i32 samples[frames * 2] (L,R,L,R..)

/// Stereo pairs the panel can serve.
pub const CHANNEL_PAIRS: usize = 64;
/// Mono host channels (two per pair).
pub const AUDIO_CHANNEL_COUNT: usize = CHANNEL_PAIRS * 2;
/// Largest block the host may ask for.
pub const MAX_BUFFER_FRAMES: usize = 8192;
/// Fixed-point scale of transported samples (2^27).
pub const SAMPLE_SCALE: f32 = 134_217_728.0;

pub const RENDER_REQUEST_SIZE: usize = 12;
pub const RESPONSE_HEADER_SIZE: usize = 16;
pub const CHANNEL_RESPONSE_HEADER_SIZE: usize = 2;

/// Audio configuration owned by the device and replicated to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioInfo {
    pub sample_rate: i32,
    pub max_buffer_size: i32,
}

impl AudioInfo {
    pub const fn new(sample_rate: i32, max_buffer_size: i32) -> Self {
        Self {
            sample_rate,
            max_buffer_size,
        }
    }

    /// Block size clamped to what the wire can carry.
    pub fn max_frames(&self) -> usize {
        (self.max_buffer_size.max(0) as usize).min(MAX_BUFFER_FRAMES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    pub sample_rate: i32,
    pub max_buffer_size: i32,
    pub frames_to_render: u32,
}

impl RenderRequest {
    pub fn new(info: AudioInfo, frames_to_render: u32) -> Self {
        Self {
            sample_rate: info.sample_rate,
            max_buffer_size: info.max_buffer_size,
            frames_to_render,
        }
    }

    pub fn audio_info(&self) -> AudioInfo {
        AudioInfo::new(self.sample_rate, self.max_buffer_size)
    }

    pub fn encode(&self) -> [u8; RENDER_REQUEST_SIZE] {
        let mut out = [0u8; RENDER_REQUEST_SIZE];
        out[0..4].copy_from_slice(&self.sample_rate.to_ne_bytes());
        out[4..8].copy_from_slice(&self.max_buffer_size.to_ne_bytes());
        out[8..12].copy_from_slice(&self.frames_to_render.to_ne_bytes());
        out
    }

    /// `None` if `buf` is shorter than a request. Trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RENDER_REQUEST_SIZE {
            return None;
        }
        Some(Self {
            sample_rate: i32::from_ne_bytes(word(buf, 0)),
            max_buffer_size: i32::from_ne_bytes(word(buf, 4)),
            frames_to_render: u32::from_ne_bytes(word(buf, 8)),
        })
    }
}

fn word(buf: &[u8], at: usize) -> [u8; 4] {
    [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
}

/// 128-bit channel set, stored as four 32-bit words, bit `i` in word `i / 32`.
///
/// The response header uses bits 0..64 for stereo pairs; the device's own
/// output mask uses all 128 bits for mono host channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelMask([u32; 4]);

impl ChannelMask {
    pub const BITS: usize = 128;

    pub const fn new() -> Self {
        Self([0; 4])
    }

    pub const fn from_words(words: [u32; 4]) -> Self {
        Self(words)
    }

    pub fn words(&self) -> [u32; 4] {
        self.0
    }

    /// Out-of-range indices are ignored.
    pub fn set(&mut self, bit: usize) {
        if bit < Self::BITS {
            self.0[bit / 32] |= 1 << (bit % 32);
        }
    }

    pub fn is_set(&self, bit: usize) -> bool {
        bit < Self::BITS && self.0[bit / 32] & (1 << (bit % 32)) != 0
    }

    pub fn clear(&mut self) {
        self.0 = [0; 4];
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::BITS).filter(move |&bit| self.is_set(bit))
    }

    pub fn encode(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let mut out = [0u8; RESPONSE_HEADER_SIZE];
        for (chunk, w) in out.chunks_exact_mut(4).zip(self.0) {
            chunk.copy_from_slice(&w.to_ne_bytes());
        }
        out
    }

    /// Decode a response header; `None` unless `buf` is exactly 16 bytes.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != RESPONSE_HEADER_SIZE {
            return None;
        }
        let mut words = [0u32; 4];
        for (w, i) in words.iter_mut().zip((0..RESPONSE_HEADER_SIZE).step_by(4)) {
            *w = u32::from_ne_bytes(word(buf, i));
        }
        Some(Self(words))
    }
}

/// Encoded size of a channel response carrying `frames` stereo frames.
pub const fn channel_response_size(frames: usize) -> usize {
    CHANNEL_RESPONSE_HEADER_SIZE + frames * 2 * 4
}

/// Encode a channel response into `out`, returning the used length.
///
/// `interleaved` holds `frames * 2` samples; `out` must be large enough.
pub fn encode_channel_response(pair: u16, interleaved: &[i32], out: &mut [u8]) -> usize {
    let len = CHANNEL_RESPONSE_HEADER_SIZE + interleaved.len() * 4;
    out[..CHANNEL_RESPONSE_HEADER_SIZE].copy_from_slice(&pair.to_ne_bytes());
    for (chunk, s) in out[CHANNEL_RESPONSE_HEADER_SIZE..len]
        .chunks_exact_mut(4)
        .zip(interleaved)
    {
        chunk.copy_from_slice(&s.to_ne_bytes());
    }
    len
}

/// Borrowed view of a received channel response.
#[derive(Debug, Clone, Copy)]
pub struct ChannelResponse<'a> {
    pub pair: u16,
    payload: &'a [u8],
}

impl<'a> ChannelResponse<'a> {
    pub fn decode(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < CHANNEL_RESPONSE_HEADER_SIZE {
            return None;
        }
        Some(Self {
            pair: u16::from_ne_bytes([buf[0], buf[1]]),
            payload: &buf[CHANNEL_RESPONSE_HEADER_SIZE..],
        })
    }

    /// Stereo frames carried.
    pub fn frames(&self) -> usize {
        self.payload.len() / 8
    }

    /// Raw fixed-point samples, interleaved.
    pub fn samples(&self) -> impl Iterator<Item = i32> + 'a {
        self.payload
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
    }

    /// Split the first `frames` frames into `left`/`right`, scaled to float.
    pub fn deinterleave(&self, frames: usize, left: &mut [f32], right: &mut [f32]) {
        let frames = frames.min(self.frames()).min(left.len()).min(right.len());
        for ((frame, l), r) in self
            .payload
            .chunks_exact(8)
            .take(frames)
            .zip(left.iter_mut())
            .zip(right.iter_mut())
        {
            *l = sample_to_float(i32::from_ne_bytes([frame[0], frame[1], frame[2], frame[3]]));
            *r = sample_to_float(i32::from_ne_bytes([frame[4], frame[5], frame[6], frame[7]]));
        }
    }
}

#[inline]
pub fn sample_to_float(s: i32) -> f32 {
    s as f32 / SAMPLE_SCALE
}

/// Convert a float sample to fixed point, saturating outside the representable range.
#[inline]
pub fn float_to_sample(f: f32) -> i32 {
    (f * SAMPLE_SCALE) as i32
}
