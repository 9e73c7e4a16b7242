//! Crossfade reassembly of separately separated chunks
//!
//! Long inputs are separated in overlapping chunks. Each chunk comes back as
//! a stem map; the stitcher joins the chunks of every stem back into one
//! continuous buffer, blending each overlap with a complementary fade pair.

use crate::models::{AudioBuffer, StemSet};
use std::collections::BTreeSet;
use stemscribe_common::FadeCurve;

/// Joins per-chunk stem maps into one buffer per stem
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkStitcher {
    curve: FadeCurve,
}

impl ChunkStitcher {
    pub fn new(curve: FadeCurve) -> Self {
        Self { curve }
    }

    /// Stitch ordered chunks that overlap by `overlap_frames` samples
    ///
    /// A stem missing from a chunk is skipped for that chunk only.
    pub fn stitch(&self, chunks: &[StemSet], overlap_frames: usize) -> StemSet {
        if chunks.len() == 1 {
            return chunks[0].clone();
        }

        let names: BTreeSet<&String> = chunks.iter().flat_map(|c| c.keys()).collect();
        let mut stitched = StemSet::new();

        for name in names {
            let mut result: Option<AudioBuffer> = None;

            for chunk in chunks {
                let Some(part) = chunk.get(name) else {
                    continue;
                };
                match result.as_mut() {
                    None => result = Some(part.clone()),
                    Some(acc) => self.append(acc, part, overlap_frames),
                }
            }

            if let Some(buffer) = result {
                stitched.insert(name.clone(), buffer);
            }
        }

        tracing::debug!(
            chunks = chunks.len(),
            stems = stitched.len(),
            overlap_frames,
            curve = %self.curve,
            "Stitched separated chunks"
        );
        stitched
    }

    /// Blend `next` into the tail of `acc`, then append its remainder
    fn append(&self, acc: &mut AudioBuffer, next: &AudioBuffer, overlap_frames: usize) {
        let overlap = overlap_frames.min(next.frames()).min(acc.frames());
        let pos = acc.frames() - overlap;

        for (out, incoming) in acc.channels.iter_mut().zip(next.channels.iter()) {
            for i in 0..overlap {
                let (fade_out, fade_in) = self.curve.gains_at(i, overlap);
                out[pos + i] = out[pos + i] * fade_out + incoming[i] * fade_in;
            }
            out.extend_from_slice(&incoming[overlap..]);
        }
    }
}
