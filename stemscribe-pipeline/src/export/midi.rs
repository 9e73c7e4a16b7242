//! MIDI export of the vocal transcription
//!
//! Format 1 file: a meta track (tempo, 4/4, key signature, name) followed by
//! one track of note on/off events.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{KeyInfo, NoteEvent};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::Path;
use stemscribe_common::music::pitch_class;

pub const TICKS_PER_BEAT: u16 = 480;
const TRACK_NAME: &[u8] = b"Vocals";

/// Sharps (+) / flats (-) of the major key on each tonic pitch class
const MAJOR_KEY_ACCIDENTALS: [i8; 12] = [0, 7, 2, -3, 4, -1, 6, 1, -4, 3, -2, 5];
/// Same for minor keys
const MINOR_KEY_ACCIDENTALS: [i8; 12] = [-3, 4, -1, 6, 1, -4, 3, -2, 5, 0, 7, 2];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiSettings {
    pub tempo_bpm: f64,
    pub ticks_per_beat: u16,
}

impl MidiSettings {
    pub fn new(tempo_bpm: f64) -> Self {
        Self {
            tempo_bpm,
            ticks_per_beat: TICKS_PER_BEAT,
        }
    }

    /// Microseconds per quarter note
    pub fn tempo_us_per_beat(&self) -> u32 {
        let bpm = if self.tempo_bpm > 0.0 { self.tempo_bpm } else { 120.0 };
        (60_000_000.0 / bpm).round().clamp(1.0, 0xFF_FFFF as f64) as u32
    }

    /// `seconds · 1e6 / tempo · ticks_per_beat`, truncated
    pub fn seconds_to_ticks(&self, seconds: f64) -> u32 {
        let beats = seconds.max(0.0) * (1_000_000.0 / self.tempo_us_per_beat() as f64);
        (beats * self.ticks_per_beat as f64) as u32
    }
}

/// `(accidentals, is_minor)` for a key
pub fn key_signature(key: &KeyInfo) -> (i8, bool) {
    let class = pitch_class(key.tonic_midi as i32);
    if key.is_minor() {
        (MINOR_KEY_ACCIDENTALS[class], true)
    } else {
        (MAJOR_KEY_ACCIDENTALS[class], false)
    }
}

/// Build the MIDI file
pub fn build_smf(notes: &[NoteEvent], key: Option<&KeyInfo>, settings: MidiSettings) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(settings.ticks_per_beat)),
    ));

    let mut meta = vec![
        meta_event(MetaMessage::Tempo(u24::new(settings.tempo_us_per_beat()))),
        meta_event(MetaMessage::TimeSignature(4, 2, 24, 8)),
    ];
    if let Some(key) = key {
        let (accidentals, minor) = key_signature(key);
        meta.push(meta_event(MetaMessage::KeySignature(accidentals, minor)));
    }
    meta.push(meta_event(MetaMessage::TrackName(TRACK_NAME)));
    meta.push(meta_event(MetaMessage::EndOfTrack));
    smf.tracks.push(meta);

    let mut timed: Vec<(u32, MidiMessage)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        let key = u7::new(note.anchor_midi.min(127));
        let vel = u7::new(note.velocity.clamp(1, 127));
        timed.push((settings.seconds_to_ticks(note.start_time), MidiMessage::NoteOn { key, vel }));
        timed.push((settings.seconds_to_ticks(note.end_time), MidiMessage::NoteOff { key, vel: u7::new(0) }));
    }
    timed.sort_by_key(|(tick, _)| *tick);

    let mut track = Vec::with_capacity(timed.len() + 1);
    let mut current = 0u32;
    for (tick, message) in timed {
        track.push(TrackEvent {
            delta: u28::new(tick.saturating_sub(current)),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message,
            },
        });
        current = tick;
    }
    track.push(meta_event(MetaMessage::EndOfTrack));
    smf.tracks.push(track);

    smf
}

fn meta_event(message: MetaMessage<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(message),
    }
}

pub fn export_midi(notes: &[NoteEvent], key: Option<&KeyInfo>, settings: MidiSettings, path: &Path) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    build_smf(notes, key, settings)
        .save(path)
        .map_err(|e| PipelineError::Export(format!("Failed to write MIDI {}: {}", path.display(), e)))?;
    tracing::info!(notes = notes.len(), path = %path.display(), "Exported MIDI");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(start: f64, end: f64, midi: u8, velocity: u8) -> NoteEvent {
        NoteEvent {
            start_time: start,
            end_time: end,
            anchor_midi: midi,
            velocity,
            frames: Vec::new(),
        }
    }

    #[test]
    fn test_tick_conversion() {
        let settings = MidiSettings::new(120.0);
        assert_eq!(settings.tempo_us_per_beat(), 500_000);
        assert_eq!(settings.seconds_to_ticks(0.5), 480);
        assert_eq!(settings.seconds_to_ticks(1.25), 1200);
    }

    #[test]
    fn test_key_signatures() {
        let mut key = KeyInfo::default();
        assert_eq!(key_signature(&key), (0, false));

        key.tonic_midi = 63;
        assert_eq!(key_signature(&key), (-3, false));

        key.tonic_midi = 69;
        key.scale_type = "minor".to_string();
        assert_eq!(key_signature(&key), (0, true));

        key.tonic_midi = 66;
        key.scale_type = "bhairavi".to_string();
        assert_eq!(key_signature(&key), (3, true));
    }

    #[test]
    fn test_tracks_and_events() {
        let notes = vec![note(0.0, 0.5, 60, 100), note(0.5, 1.0, 62, 0)];
        let key = KeyInfo::default();
        let smf = build_smf(&notes, Some(&key), MidiSettings::new(120.0));

        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.tracks.len(), 2);
        assert!(smf.tracks[0]
            .iter()
            .any(|e| e.kind == TrackEventKind::Meta(MetaMessage::Tempo(u24::new(500_000)))));
        assert!(smf.tracks[0]
            .iter()
            .any(|e| e.kind == TrackEventKind::Meta(MetaMessage::TrackName(b"Vocals"))));

        let vocal = &smf.tracks[1];
        assert_eq!(vocal.len(), 5);
        let deltas: Vec<u32> = vocal.iter().map(|e| e.delta.as_int()).collect();
        assert_eq!(deltas, vec![0, 480, 0, 480, 0]);
        match vocal[2].kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } => {
                assert_eq!(key.as_int(), 62);
                assert_eq!(vel.as_int(), 1, "velocity clamped to 1");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(vocal[4].kind, TrackEventKind::Meta(MetaMessage::EndOfTrack));
    }

    #[test]
    fn test_export_writes_parseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcription").join("vocals.mid");
        export_midi(&[note(0.25, 1.0, 67, 90)], None, MidiSettings::new(100.0), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(480)));
    }
}
