//! Pitch and note-name conversions

/// Reference pitch A4 in Hz
pub const A4_FREQUENCY: f64 = 440.0;

/// MIDI note number of A4
pub const A4_MIDI: f64 = 69.0;

/// Sharp-spelled pitch class names, index = pitch class
pub const CHROMATIC_NOTES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Convert a frequency in Hz to a fractional MIDI pitch
///
/// Returns 0.0 for non-positive frequencies (unvoiced).
pub fn frequency_to_midi(frequency: f64) -> f64 {
    if frequency <= 0.0 {
        return 0.0;
    }
    A4_MIDI + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Convert a (possibly fractional) MIDI pitch to Hz
///
/// Returns 0.0 for non-positive pitches.
pub fn midi_to_frequency(midi: f64) -> f64 {
    if midi <= 0.0 {
        return 0.0;
    }
    A4_FREQUENCY * 2f64.powf((midi - A4_MIDI) / 12.0)
}

/// Pitch class (0-11) of an integer MIDI note
pub fn pitch_class(midi: i32) -> usize {
    midi.rem_euclid(12) as usize
}

/// Name of the pitch class of `midi` (e.g. 61 -> "C#")
pub fn pitch_class_name(midi: i32) -> &'static str {
    CHROMATIC_NOTES[pitch_class(midi)]
}

/// Index of a sharp-spelled or flat-spelled root name, if recognised
pub fn pitch_class_of_name(name: &str) -> Option<usize> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    let base: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let mut offset = 0;
    for accidental in chars {
        match accidental {
            '#' => offset += 1,
            'b' => offset -= 1,
            _ => return None,
        }
    }
    Some((base + offset).rem_euclid(12) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_a4_round_trip() {
        assert!((frequency_to_midi(440.0) - 69.0).abs() < 1e-9);
        assert!((midi_to_frequency(69.0) - 440.0).abs() < 1e-9);
    }

    #[test]
    fn test_middle_c() {
        assert!((midi_to_frequency(60.0) - 261.6256).abs() < 1e-3);
    }

    #[test]
    fn test_unvoiced_is_zero() {
        assert_eq!(frequency_to_midi(0.0), 0.0);
        assert_eq!(midi_to_frequency(0.0), 0.0);
    }

    #[test]
    fn test_pitch_class_names() {
        assert_eq!(pitch_class_name(60), "C");
        assert_eq!(pitch_class_name(61), "C#");
        assert_eq!(pitch_class_name(71), "B");
        assert_eq!(pitch_class(-1), 11);
    }

    #[test]
    fn test_parse_root_names() {
        assert_eq!(pitch_class_of_name("C"), Some(0));
        assert_eq!(pitch_class_of_name("F#"), Some(6));
        assert_eq!(pitch_class_of_name("Bb"), Some(10));
        assert_eq!(pitch_class_of_name("Cb"), Some(11));
        assert_eq!(pitch_class_of_name("H"), None);
        assert_eq!(pitch_class_of_name(""), None);
    }
}
