//! Software stand-in for a host audio graph: scheduled voices summed through
//! a master gain and rendered block by block.

use std::f32::consts::PI;
use std::fmt;
use std::rc::Rc;

use crate::timeline::Clock;

use super::instrument::{FilterKind, Harmonic, Vibrato, Waveform};

/// How far behind the clock the render cursor may lag before finished voices
/// are retired without being rendered.
const RENDER_GRACE: f64 = 1.0;

/// Identifier of a scheduled voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
enum AutomationEvent {
    Set { time: f64, value: f32 },
    Ramp { time: f64, value: f32 },
}

impl AutomationEvent {
    fn time(&self) -> f64 {
        match self {
            Self::Set { time, .. } | Self::Ramp { time, .. } => *time,
        }
    }

    fn value(&self) -> f32 {
        match self {
            Self::Set { value, .. } | Self::Ramp { value, .. } => *value,
        }
    }
}

/// Time-ordered parameter curve with hold and linear-ramp segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Automation {
    initial: f32,
    events: Vec<AutomationEvent>,
}

impl Automation {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    /// Jumps to `value` at `time` and holds it.
    pub fn set_value_at(&mut self, value: f32, time: f64) -> &mut Self {
        self.insert(AutomationEvent::Set { time, value })
    }

    /// Ramps linearly from the previous event so that `value` is reached at
    /// `time`.
    pub fn linear_ramp_to(&mut self, value: f32, time: f64) -> &mut Self {
        self.insert(AutomationEvent::Ramp { time, value })
    }

    fn insert(&mut self, event: AutomationEvent) -> &mut Self {
        let at = self
            .events
            .partition_point(|existing| existing.time() <= event.time());
        self.events.insert(at, event);
        self
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let index = self.events.partition_point(|event| event.time() <= time);
        let (from_time, from_value) = match index {
            0 => (0.0, self.initial),
            i => {
                let event = &self.events[i - 1];
                (event.time(), event.value())
            }
        };

        match self.events.get(index) {
            Some(AutomationEvent::Ramp { time: to_time, value }) if *to_time > from_time => {
                let t = ((time - from_time) / (to_time - from_time)).clamp(0.0, 1.0) as f32;
                from_value + (value - from_value) * t
            }
            _ => from_value,
        }
    }

    pub fn last_time(&self) -> Option<f64> {
        self.events.last().map(AutomationEvent::time)
    }
}

/// RBJ biquad with direct form I state.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

const DEFAULT_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

impl Biquad {
    pub fn new(kind: FilterKind, cutoff: f32, sample_rate: f32) -> Self {
        let nyquist = sample_rate * 0.5;
        let cutoff = cutoff.clamp(10.0, nyquist * 0.98);
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * DEFAULT_Q);

        let (b0, b1, b2) = match kind {
            FilterKind::Lowpass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterKind::Highpass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
            FilterKind::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

#[derive(Debug, Clone, Copy)]
struct Oscillator {
    waveform: Waveform,
    frequency: f32,
    gain: f32,
    phase: f32,
}

impl Oscillator {
    fn new(waveform: Waveform, frequency: f32, gain: f32) -> Self {
        Self {
            waveform,
            frequency,
            gain,
            phase: 0.0,
        }
    }

    fn next(&mut self, frequency: f32, sample_rate: f32) -> f32 {
        let value = self.waveform.sample(self.phase) * self.gain;
        self.phase = (self.phase + frequency / sample_rate).rem_euclid(1.0);
        value
    }
}

/// Everything needed to schedule one note.
#[derive(Debug, Clone)]
pub struct VoiceSpec {
    pub waveform: Waveform,
    pub frequency: f32,
    pub filter: FilterKind,
    pub filter_cutoff: f32,
    pub harmonics: Vec<Harmonic>,
    pub vibrato: Option<Vibrato>,
    pub envelope: Automation,
    pub start: f64,
    pub end: f64,
}

/// Carrier -> filter -> envelope, harmonics -> envelope, bypassing the filter.
#[derive(Debug, Clone)]
struct Voice {
    id: VoiceId,
    start: f64,
    end: f64,
    carrier: Oscillator,
    filter: Biquad,
    harmonics: Vec<Oscillator>,
    vibrato: Option<Vibrato>,
    envelope: Automation,
}

impl Voice {
    fn render_sample(&mut self, time: f64, sample_rate: f32) -> f32 {
        if time < self.start || time >= self.end {
            return 0.0;
        }

        let since_start = (time - self.start) as f32;
        let carrier_frequency = match self.vibrato {
            Some(vibrato) => {
                self.carrier.frequency
                    + vibrato.depth * (2.0 * PI * vibrato.rate * since_start).sin()
            }
            None => self.carrier.frequency,
        };

        let carrier = self.carrier.next(carrier_frequency, sample_rate);
        let mut signal = self.filter.process(carrier);
        for harmonic in &mut self.harmonics {
            let frequency = harmonic.frequency;
            signal += harmonic.next(frequency, sample_rate);
        }

        signal * self.envelope.value_at(time)
    }
}

/// Output graph of one opened audio device: a master gain and the voices
/// currently scheduled against it.
pub struct AudioContext {
    sample_rate: u32,
    clock: Rc<dyn Clock>,
    master_gain: f32,
    voices: Vec<Voice>,
    next_voice: u64,
    cursor: f64,
    closed: bool,
}

impl AudioContext {
    pub fn new(sample_rate: u32, clock: Rc<dyn Clock>) -> Self {
        let cursor = clock.now();
        Self {
            sample_rate: sample_rate.max(1),
            clock,
            master_gain: 1.0,
            voices: Vec::new(),
            next_voice: 0,
            cursor,
            closed: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.clock.now()
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.voices.clear();
        self.closed = true;
    }

    pub fn schedule(&mut self, spec: VoiceSpec) -> VoiceId {
        self.retire_finished();
        let id = VoiceId(self.next_voice);
        self.next_voice += 1;
        let sample_rate = self.sample_rate as f32;

        self.voices.push(Voice {
            id,
            start: spec.start,
            end: spec.end,
            carrier: Oscillator::new(spec.waveform, spec.frequency, 1.0),
            filter: Biquad::new(spec.filter, spec.filter_cutoff, sample_rate),
            harmonics: spec
                .harmonics
                .iter()
                .map(|h| Oscillator::new(h.waveform, spec.frequency * h.multiplier, h.gain))
                .collect(),
            vibrato: spec.vibrato,
            envelope: spec.envelope,
        });
        id
    }

    /// Drops voices that ended before the render cursor, or long before the
    /// clock when nothing is rendering.
    fn retire_finished(&mut self) {
        let horizon = self.cursor.max(self.current_time() - RENDER_GRACE);
        self.voices.retain(|voice| voice.end > horizon);
    }

    /// Halts every scheduled voice. Returns how many were dropped.
    pub fn stop_all(&mut self) -> usize {
        let count = self.voices.len();
        self.voices.clear();
        count
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn is_scheduled(&self, id: VoiceId) -> bool {
        self.voices.iter().any(|voice| voice.id == id)
    }

    /// Time of the next sample [`render`](Self::render) will produce.
    pub fn render_cursor(&self) -> f64 {
        self.cursor
    }

    /// Mixes the next `out.len()` mono samples starting at the render cursor
    /// and retires voices that have finished.
    pub fn render(&mut self, out: &mut [f32]) {
        let sample_rate = self.sample_rate as f32;
        let step = 1.0 / self.sample_rate as f64;
        let start = self.cursor;

        for (index, sample) in out.iter_mut().enumerate() {
            let time = start + index as f64 * step;
            let mut mix = 0.0;
            for voice in &mut self.voices {
                mix += voice.render_sample(time, sample_rate);
            }
            *sample = mix * self.master_gain;
        }

        self.cursor = start + out.len() as f64 * step;
        let cursor = self.cursor;
        self.voices.retain(|voice| voice.end > cursor);
    }
}

impl fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioContext")
            .field("sample_rate", &self.sample_rate)
            .field("master_gain", &self.master_gain)
            .field("voices", &self.voices.len())
            .field("cursor", &self.cursor)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::timeline::ManualClock;

    #[test]
    fn automation_holds_and_ramps() {
        let mut curve = Automation::new(0.0);
        curve
            .set_value_at(0.0, 1.0)
            .linear_ramp_to(1.0, 2.0)
            .set_value_at(1.0, 3.0)
            .linear_ramp_to(0.0, 4.0);

        assert_relative_eq!(curve.value_at(0.5), 0.0);
        assert_relative_eq!(curve.value_at(1.5), 0.5);
        assert_relative_eq!(curve.value_at(2.5), 1.0);
        assert_relative_eq!(curve.value_at(3.25), 0.75);
        assert_relative_eq!(curve.value_at(9.0), 0.0);
        assert_eq!(curve.last_time(), Some(4.0));
    }

    #[test]
    fn lowpass_passes_dc() {
        let mut filter = Biquad::new(FilterKind::Lowpass, 1000.0, 48_000.0);
        let mut last = 0.0;
        for _ in 0..4800 {
            last = filter.process(1.0);
        }
        assert_relative_eq!(last, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn renders_silence_outside_voice_window_and_retires_it() {
        let clock = ManualClock::new();
        let mut context = AudioContext::new(1000, Rc::new(clock));
        let mut envelope = Automation::new(1.0);
        envelope.set_value_at(1.0, 0.0);
        context.schedule(VoiceSpec {
            waveform: Waveform::Square,
            frequency: 100.0,
            filter: FilterKind::Lowpass,
            filter_cutoff: 400.0,
            harmonics: Vec::new(),
            vibrato: None,
            envelope,
            start: 0.1,
            end: 0.2,
        });

        let mut block = vec![0.0; 100];
        context.render(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(context.active_voices(), 1);

        context.render(&mut block);
        assert!(block.iter().any(|s| s.abs() > 0.1));
        assert_eq!(context.active_voices(), 0);
        assert_relative_eq!(context.render_cursor(), 0.2, epsilon = 1e-9);
    }

    #[test]
    fn finished_voices_are_retired_without_rendering() {
        let clock = ManualClock::new();
        let mut context = AudioContext::new(1000, Rc::new(clock.clone()));
        let spec = |start: f64, end: f64| VoiceSpec {
            waveform: Waveform::Sine,
            frequency: 100.0,
            filter: FilterKind::Lowpass,
            filter_cutoff: 400.0,
            harmonics: Vec::new(),
            vibrato: None,
            envelope: Automation::new(1.0),
            start,
            end,
        };

        let early = context.schedule(spec(0.1, 0.2));
        clock.set(0.5);
        context.schedule(spec(0.6, 0.7));
        // Still within reach of a render that is catching up.
        assert!(context.is_scheduled(early));

        clock.set(5.0);
        let late = context.schedule(spec(5.1, 5.2));
        assert!(!context.is_scheduled(early));
        assert_eq!(context.active_voices(), 1);
        assert!(context.is_scheduled(late));
    }
}
