//! Note synthesis: renders scale notes as scheduled oscillator voices using
//! the selected instrument.
//!
//! The synthesizer never fails loudly. If the audio host cannot be opened it
//! stays in a muted mode where every play call returns `None`.

mod graph;
mod instrument;

use std::rc::Rc;

use crate::drawing::Note;
use crate::timeline::Clock;
use crate::{Result, SketchpadError};

pub use graph::{AudioContext, Automation, Biquad, VoiceId, VoiceSpec};
pub use instrument::{
    Adsr, FilterKind, Harmonic, InstrumentBank, InstrumentConfig, InstrumentInfo, Vibrato,
    Waveform,
};

/// Minimum lead time between "now" and any scheduled event.
pub const MIN_LEAD_TIME: f64 = 0.01;

const DEFAULT_VOLUME: f32 = 0.7;

/// Host audio subsystem that can open an output graph.
pub trait AudioHost {
    fn open(&self) -> Result<AudioContext>;
}

/// Host that renders into memory on demand. Always available.
#[derive(Clone)]
pub struct OfflineHost {
    sample_rate: u32,
    clock: Rc<dyn Clock>,
}

impl OfflineHost {
    pub fn new(sample_rate: u32, clock: Rc<dyn Clock>) -> Self {
        Self { sample_rate, clock }
    }
}

impl AudioHost for OfflineHost {
    fn open(&self) -> Result<AudioContext> {
        Ok(AudioContext::new(self.sample_rate, self.clock.clone()))
    }
}

/// Host with no usable output device.
#[derive(Debug, Clone)]
pub struct UnavailableHost {
    reason: String,
}

impl UnavailableHost {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl AudioHost for UnavailableHost {
    fn open(&self) -> Result<AudioContext> {
        Err(SketchpadError::AudioUnavailable(self.reason.clone()))
    }
}

/// Description of a note that has been handed to the audio graph.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteHandle {
    pub voice: VoiceId,
    pub note: Note,
    pub instrument: String,
    pub frequency: f32,
    pub start: f64,
    pub end: f64,
    /// Carrier plus harmonics.
    pub oscillators: usize,
}

/// Anything that can sound a note. The mapper and the playback scheduler
/// only talk to the synthesizer through this seam.
pub trait NotePlayer {
    /// Current time of the audio clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedules `note` at `origin + delay`. Several calls sharing one
    /// `origin` line up even if the clock moves between them.
    fn play_note_from(
        &mut self,
        origin: f64,
        note: Note,
        duration: f64,
        delay: f64,
    ) -> Option<NoteHandle>;

    fn play_note(&mut self, note: Note, duration: f64, delay: f64) -> Option<NoteHandle> {
        let origin = self.current_time();
        self.play_note_from(origin, note, duration, delay)
    }

    fn stop_all_notes(&mut self);
}

/// Instrument-aware synthesizer backed by an [`AudioContext`].
#[derive(Debug)]
pub struct NoteSynth {
    context: Option<AudioContext>,
    initialized: bool,
    volume: f32,
    bank: InstrumentBank,
    current: usize,
}

impl NoteSynth {
    pub fn new(bank: InstrumentBank) -> Self {
        Self {
            context: None,
            initialized: false,
            volume: DEFAULT_VOLUME,
            bank,
            current: 0,
        }
    }

    /// Opens the output graph. Calling it again once ready does nothing. A
    /// host failure is logged and leaves the synthesizer muted.
    pub fn initialize(&mut self, host: &dyn AudioHost) {
        if self.initialized {
            return;
        }

        match host.open() {
            Ok(mut context) => {
                context.set_master_gain(self.volume);
                tracing::info!(
                    sample_rate = context.sample_rate(),
                    "audio system initialized"
                );
                self.context = Some(context);
                self.initialized = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to initialize audio, continuing muted");
                self.context = None;
                self.initialized = false;
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.initialized && self.context.as_ref().is_some_and(|c| !c.is_closed())
    }

    /// Switches the active instrument. Unknown ids are ignored.
    pub fn set_instrument(&mut self, id: &str) -> bool {
        match self.bank.position(id) {
            Some(index) => {
                self.current = index;
                tracing::debug!(instrument = id, "instrument selected");
                true
            }
            None => {
                tracing::debug!(instrument = id, "ignoring unknown instrument");
                false
            }
        }
    }

    pub fn instrument(&self) -> Option<&InstrumentConfig> {
        self.bank.by_index(self.current)
    }

    pub fn bank(&self) -> &InstrumentBank {
        &self.bank
    }

    pub fn catalog(&self) -> Vec<InstrumentInfo> {
        self.bank.catalog()
    }

    /// Clamps `volume` to `[0, 1]` and applies it to the master gain at once.
    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            tracing::debug!(volume, "ignoring non-finite volume");
            return;
        }
        self.volume = volume.clamp(0.0, 1.0);
        if let Some(context) = self.context.as_mut() {
            context.set_master_gain(self.volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Plays a note given by its id; unknown ids are a no-op.
    pub fn play_note_named(&mut self, note: &str, duration: f64, delay: f64) -> Option<NoteHandle> {
        match note.parse::<Note>() {
            Ok(note) => self.play_note(note, duration, delay),
            Err(err) => {
                tracing::debug!(%err, "not playing");
                None
            }
        }
    }

    pub fn active_notes(&self) -> usize {
        self.context.as_ref().map_or(0, AudioContext::active_voices)
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.context.as_ref()
    }

    /// Renders the next block of output. Fills silence and returns `false`
    /// while muted.
    pub fn render(&mut self, out: &mut [f32]) -> bool {
        match self.context.as_mut() {
            Some(context) if self.initialized && !context.is_closed() => {
                context.render(out);
                true
            }
            _ => {
                out.fill(0.0);
                false
            }
        }
    }

    /// Halts every note and closes the output graph.
    pub fn destroy(&mut self) {
        self.stop_all_notes();
        if let Some(context) = self.context.as_mut() {
            context.close();
        }
        self.initialized = false;
    }
}

impl Default for NoteSynth {
    fn default() -> Self {
        Self::new(InstrumentBank::builtin())
    }
}

impl NotePlayer for NoteSynth {
    fn current_time(&self) -> f64 {
        self.context.as_ref().map_or(0.0, AudioContext::current_time)
    }

    fn play_note_from(
        &mut self,
        origin: f64,
        note: Note,
        duration: f64,
        delay: f64,
    ) -> Option<NoteHandle> {
        if !self.initialized {
            return None;
        }
        let config = self.bank.by_index(self.current)?.clone();
        let context = self.context.as_mut()?;
        if context.is_closed() {
            tracing::warn!("cannot play note: audio context is closed");
            return None;
        }

        let now = context.current_time();
        let clamp = |t: f64| {
            if t.is_finite() && t >= now {
                t
            } else {
                now + MIN_LEAD_TIME
            }
        };

        let min_start = now + MIN_LEAD_TIME;
        let mut start = origin + delay;
        if !start.is_finite() || start < min_start {
            start = min_start;
        }
        let duration = if duration.is_finite() {
            duration.max(0.0)
        } else {
            0.0
        };
        let end = clamp(start + duration);

        let adsr = config.envelope;
        let attack_gain = config.attack_gain();
        let sustain_gain = config.sustain_gain();
        let mut envelope = Automation::new(0.0);
        envelope
            .set_value_at(0.0, start)
            .linear_ramp_to(attack_gain, clamp(start + adsr.attack))
            .linear_ramp_to(sustain_gain, clamp(start + adsr.attack + adsr.decay))
            .set_value_at(sustain_gain, clamp(end - adsr.release))
            .linear_ramp_to(0.0, end);

        let frequency = note.frequency();
        let voice = context.schedule(VoiceSpec {
            waveform: config.waveform,
            frequency,
            filter: config.filter,
            filter_cutoff: config.filter_cutoff,
            harmonics: config.harmonics.clone(),
            vibrato: config.vibrato,
            envelope,
            start,
            end,
        });

        tracing::trace!(%note, start, end, instrument = %config.id, "note scheduled");

        Some(NoteHandle {
            voice,
            note,
            instrument: config.id,
            frequency,
            start,
            end,
            oscillators: 1 + config.harmonics.len(),
        })
    }

    fn stop_all_notes(&mut self) {
        if let Some(context) = self.context.as_mut() {
            let stopped = context.stop_all();
            if stopped > 0 {
                tracing::debug!(stopped, "stopped all notes");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::ManualClock;

    fn ready_synth(clock: &ManualClock) -> NoteSynth {
        let mut synth = NoteSynth::default();
        synth.initialize(&OfflineHost::new(8_000, Rc::new(clock.clone())));
        synth
    }

    #[test]
    fn muted_when_host_is_unavailable() {
        let mut synth = NoteSynth::default();
        synth.initialize(&UnavailableHost::new("no device"));

        assert!(!synth.is_ready());
        assert!(synth.play_note(Note::C, 1.0, 0.0).is_none());
        synth.stop_all_notes();
        synth.set_volume(0.3);
        let mut block = [1.0; 8];
        assert!(!synth.render(&mut block));
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn initialize_is_idempotent() {
        let clock = ManualClock::new();
        let mut synth = ready_synth(&clock);
        synth.play_note(Note::C, 1.0, 0.0).unwrap();
        synth.initialize(&UnavailableHost::new("ignored"));

        assert!(synth.is_ready());
        assert_eq!(synth.active_notes(), 1);
    }

    #[test]
    fn never_schedules_in_the_past() {
        let clock = ManualClock::new();
        clock.set(5.0);
        let mut synth = ready_synth(&clock);

        for delay in [-10.0, 0.0, 0.001, f64::NAN, f64::NEG_INFINITY] {
            let handle = synth.play_note(Note::A, 0.5, delay).unwrap();
            assert!(handle.start >= 5.0 + MIN_LEAD_TIME - 1e-12, "delay {delay}");
            assert!(handle.end >= handle.start);
        }

        let later = synth.play_note(Note::A, 0.5, 2.0).unwrap();
        assert_eq!(later.start, 7.0);
        assert_eq!(later.end, 7.5);
    }

    #[test]
    fn handle_reflects_instrument_and_harmonics() {
        let clock = ManualClock::new();
        let mut synth = ready_synth(&clock);
        assert!(synth.set_instrument("violin"));
        assert!(!synth.set_instrument("theremin"));

        let handle = synth.play_note(Note::G, 1.0, 0.5).unwrap();
        assert_eq!(handle.instrument, "violin");
        assert_eq!(handle.frequency, 392.0);
        assert_eq!(handle.oscillators, 3);
    }

    #[test]
    fn unknown_note_ids_are_ignored() {
        let clock = ManualClock::new();
        let mut synth = ready_synth(&clock);
        assert!(synth.play_note_named("H", 1.0, 0.0).is_none());
        assert!(synth.play_note_named("C2", 1.0, 0.0).is_some());
    }

    #[test]
    fn volume_is_clamped_and_applied() {
        let clock = ManualClock::new();
        let mut synth = ready_synth(&clock);
        synth.set_volume(3.0);
        assert_eq!(synth.context().unwrap().master_gain(), 1.0);
        synth.set_volume(-1.0);
        assert_eq!(synth.volume(), 0.0);
        synth.set_volume(f32::NAN);
        assert_eq!(synth.volume(), 0.0);
    }

    #[test]
    fn stop_all_and_destroy() {
        let clock = ManualClock::new();
        let mut synth = ready_synth(&clock);
        synth.stop_all_notes();
        let first = synth.play_note(Note::C, 1.0, 0.0).unwrap();
        synth.play_note(Note::E, 1.0, 0.2);
        assert_eq!(synth.active_notes(), 2);
        assert!(synth.context().unwrap().is_scheduled(first.voice));

        synth.stop_all_notes();
        assert_eq!(synth.active_notes(), 0);
        assert!(!synth.context().unwrap().is_scheduled(first.voice));

        synth.destroy();
        assert!(!synth.is_ready());
        assert!(synth.play_note(Note::C, 1.0, 0.0).is_none());
    }

    #[test]
    fn envelope_peaks_after_attack() {
        let clock = ManualClock::new();
        let mut synth = ready_synth(&clock);
        synth.set_instrument("flute");
        synth.set_volume(1.0);
        synth.play_note(Note::A, 1.0, 0.0).unwrap();

        // 8 kHz: the attack of 30 ms ends around sample 320.
        let mut block = vec![0.0; 8_000];
        synth.render(&mut block);
        let early: f32 = block[..100].iter().map(|s| s.abs()).fold(0.0, f32::max);
        let peak: f32 = block[300..600].iter().map(|s| s.abs()).fold(0.0, f32::max);
        let tail: f32 = block[7_000..].iter().map(|s| s.abs()).fold(0.0, f32::max);

        assert!(early < peak);
        assert!(peak > 0.05 && peak < 0.15);
        assert!(tail < peak);
    }
}
