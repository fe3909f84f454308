// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Panel-side sample storage: one interleaved fixed-point buffer per stereo
// pair plus the scratch buffer channel responses are encoded into.

use crate::wire::{self, CHANNEL_PAIRS};

pub struct AudioBufferPool {
    max_frames: usize,
    pairs: Vec<Box<[i32]>>,
    response: Vec<u8>,
}

impl AudioBufferPool {
    pub fn new(max_frames: usize) -> Self {
        let mut pool = Self {
            max_frames: 0,
            pairs: Vec::new(),
            response: Vec::new(),
        };
        pool.reallocate(max_frames);
        pool
    }

    /// Replace every buffer with zeroed storage for `max_frames` frames.
    /// The previous allocation is released before the new one is made.
    pub fn reallocate(&mut self, max_frames: usize) {
        self.pairs = Vec::new();
        self.response = Vec::new();

        self.pairs = (0..CHANNEL_PAIRS)
            .map(|_| vec![0i32; max_frames * 2].into_boxed_slice())
            .collect();
        self.response = vec![0u8; wire::channel_response_size(max_frames)];
        self.max_frames = max_frames;
        tracing::debug!(max_frames, "audio buffers reallocated");
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Interleaved samples of stereo pair `pair`.
    pub fn pair(&self, pair: usize) -> Option<&[i32]> {
        self.pairs.get(pair).map(|b| &b[..])
    }

    pub fn pair_mut(&mut self, pair: usize) -> Option<&mut [i32]> {
        self.pairs.get_mut(pair).map(|b| &mut b[..])
    }

    /// Encode the first `frames` frames of `pair` as a channel response.
    /// `frames` is clamped to the allocated size.
    pub fn encode_response(&mut self, pair: usize, frames: usize) -> Option<&[u8]> {
        let frames = frames.min(self.max_frames);
        let samples = &self.pairs.get(pair)?[..frames * 2];
        let len = wire::encode_channel_response(pair as u16, samples, &mut self.response);
        Some(&self.response[..len])
    }
}
