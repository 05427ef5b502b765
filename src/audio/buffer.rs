//! Audio buffers shared by the capture and playback paths

use std::sync::atomic::{AtomicU32, Ordering};

/// A decoded block of inbound audio awaiting playback
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Interleaved float samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Clock time the buffer was scheduled to start, once scheduled
    pub scheduled_start: Option<f64>,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            scheduled_start: None,
        }
    }

    /// Number of samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Scheduled end time, if scheduled
    pub fn scheduled_end(&self) -> Option<f64> {
        self.scheduled_start.map(|start| start + self.duration())
    }
}

/// Re-blocks device callbacks of arbitrary length into fixed-size blocks
///
/// Mirrors a script-processor node: the consumer sees exactly `block_size`
/// samples per call, in capture order.
pub struct BlockAccumulator {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAccumulator {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    /// Append device data, invoking `on_block` for each completed block
    pub fn push(&mut self, data: &[f32], mut on_block: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(data);
        let mut start = 0;
        while self.pending.len() - start >= self.block_size {
            on_block(&self.pending[start..start + self.block_size]);
            start += self.block_size;
        }
        if start > 0 {
            self.pending.drain(..start);
        }
    }

    /// Samples waiting for a full block
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Average interleaved frames down to mono
pub fn downmix_to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if channels == 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear resampling, adequate for speech
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let s1 = samples.get(src_idx).copied().unwrap_or(0.0);
        let s2 = samples.get(src_idx + 1).copied().unwrap_or(s1);
        output.push(s1 * (1.0 - frac) + s2 * frac);
    }

    output
}

/// Streaming linear resampler for device callbacks of arbitrary size
///
/// The source position is tracked exactly in units of `1 / to_rate` and the
/// last input sample is carried over, so feeding a stream in pieces yields
/// the same output as feeding it at once.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    from_rate: u64,
    to_rate: u64,
    pos: u64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: from_rate.max(1) as u64,
            to_rate: to_rate.max(1) as u64,
            pos: 0,
            last: None,
        }
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.from_rate == self.to_rate {
            return input.to_vec();
        }

        let last = self.last;
        let offset = usize::from(last.is_some());
        let len = input.len() + offset;
        if len == 0 {
            return Vec::new();
        }
        let sample = |k: usize| match (last, k) {
            (Some(prev), 0) => prev,
            _ => input[k - offset],
        };

        let mut output =
            Vec::with_capacity((len as u64 * self.to_rate / self.from_rate) as usize + 1);
        loop {
            let idx = (self.pos / self.to_rate) as usize;
            if idx + 1 >= len {
                break;
            }
            let frac = (self.pos % self.to_rate) as f32 / self.to_rate as f32;
            output.push(sample(idx) * (1.0 - frac) + sample(idx + 1) * frac);
            self.pos += self.from_rate;
        }

        // Rebase so the final sample becomes index 0 of the next call
        self.pos -= (len as u64 - 1) * self.to_rate;
        self.last = Some(sample(len - 1));
        output
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.last = None;
    }
}

/// Root-mean-square level of a block
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Lock-free input level shared between the capture thread and readers
#[derive(Debug, Default)]
pub struct LevelMeter {
    bits: AtomicU32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: f32) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    pub fn reset(&self) {
        self.set(0.0);
    }
}
