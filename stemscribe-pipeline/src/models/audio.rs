//! In-memory audio buffers and chunk planning

use std::collections::BTreeMap;

/// Planar multi-channel audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// One sample vector per channel, all the same length
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Copy of frames `[start, end)`, clamped to the buffer
    pub fn slice(&self, start: usize, end: usize) -> AudioBuffer {
        let frames = self.frames();
        let end = end.min(frames);
        let start = start.min(end);
        AudioBuffer::new(
            self.channels.iter().map(|c| c[start..end].to_vec()).collect(),
            self.sample_rate,
        )
    }

    /// Average all channels to mono
    pub fn to_mono(&self) -> MonoBuffer {
        let frames = self.frames();
        let count = self.channel_count();
        let samples = if count <= 1 {
            self.channels.first().cloned().unwrap_or_default()
        } else {
            (0..frames)
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / count as f32)
                .collect()
        };
        MonoBuffer::new(samples, self.sample_rate)
    }
}

/// Single-channel audio
#[derive(Debug, Clone, PartialEq)]
pub struct MonoBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl MonoBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn into_buffer(self) -> AudioBuffer {
        AudioBuffer::new(vec![self.samples], self.sample_rate)
    }
}

/// Separated stems keyed by stem name
pub type StemSet = BTreeMap<String, AudioBuffer>;

/// One chunk of a longer input handed to the separation model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBounds {
    /// 0-based chunk index
    pub index: usize,
    pub count: usize,
    /// First frame (inclusive)
    pub start_frame: usize,
    /// Last frame (exclusive)
    pub end_frame: usize,
}

impl ChunkBounds {
    /// Bounds covering a whole input
    pub fn whole(frames: usize) -> Self {
        Self {
            index: 0,
            count: 1,
            start_frame: 0,
            end_frame: frames,
        }
    }

    pub fn len(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split `total_frames` into overlapping chunks
///
/// Inputs no longer than one chunk are processed whole. Otherwise chunks
/// start every `chunk - overlap` frames and the last one is truncated at the
/// end of the input.
pub fn plan_chunks(total_frames: usize, chunk_frames: usize, overlap_frames: usize) -> Vec<ChunkBounds> {
    if total_frames <= chunk_frames || chunk_frames == 0 {
        return vec![ChunkBounds::whole(total_frames)];
    }

    let step = chunk_frames.saturating_sub(overlap_frames).max(1);
    let starts: Vec<usize> = (0..total_frames).step_by(step).collect();
    let count = starts.len();

    starts
        .into_iter()
        .enumerate()
        .map(|(index, start)| ChunkBounds {
            index,
            count,
            start_frame: start,
            end_frame: (start + chunk_frames).min(total_frames),
        })
        .collect()
}
