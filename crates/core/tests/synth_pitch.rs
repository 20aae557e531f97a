use std::rc::Rc;

use realfft::RealFftPlanner;
use sensory_sketchpad_core::{ManualClock, Note, NotePlayer, NoteSynth, OfflineHost};

const SAMPLE_RATE: u32 = 8_000;

/// Renders one second of `note` and returns the strongest frequency in Hz.
fn dominant_frequency(instrument: &str, note: Note) -> f32 {
    let clock = ManualClock::new();
    let mut synth = NoteSynth::default();
    synth.initialize(&OfflineHost::new(SAMPLE_RATE, Rc::new(clock.clone())));
    assert!(synth.set_instrument(instrument));
    synth.play_note(note, 1.0, 0.0).unwrap();

    let len = SAMPLE_RATE as usize;
    let mut samples = vec![0.0; len];
    assert!(synth.render(&mut samples));

    let mut planner = RealFftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(len);
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut samples, &mut spectrum).unwrap();

    let (bin, _) = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .map(|(bin, value)| (bin, value.norm()))
        .fold((0, 0.0_f32), |best, candidate| {
            if candidate.1 > best.1 {
                candidate
            } else {
                best
            }
        });
    bin as f32 * SAMPLE_RATE as f32 / len as f32
}

#[test]
fn flute_a_sounds_at_440_hz() {
    let peak = dominant_frequency("flute", Note::A);
    assert!((peak - 440.0).abs() <= 2.0, "peak at {peak} Hz");
}

#[test]
fn high_c_is_an_octave_above_middle_c() {
    let low = dominant_frequency("flute", Note::C);
    let high = dominant_frequency("flute", Note::C2);
    assert!((low - 261.63).abs() <= 2.0, "low peak at {low} Hz");
    assert!((high / low - 2.0).abs() < 0.02, "ratio {}", high / low);
}

#[test]
fn piano_fundamental_dominates_its_harmonics() {
    let peak = dominant_frequency("piano", Note::G);
    assert!((peak - 392.0).abs() <= 2.0, "peak at {peak} Hz");
}
