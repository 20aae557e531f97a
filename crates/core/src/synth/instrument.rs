use serde::{Deserialize, Serialize};

/// Oscillator wave shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Value of the wave at `phase` in `[0, 1)`.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (std::f32::consts::TAU * phase).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
        }
    }
}

/// Biquad response applied to the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Attack/decay/release in seconds, sustain as a gain fraction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f32,
    pub release: f64,
}

/// Overtone layered on top of the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Harmonic {
    /// Multiple of the note's fundamental.
    pub multiplier: f32,
    pub gain: f32,
    pub waveform: Waveform,
}

/// Periodic pitch modulation of the carrier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vibrato {
    pub rate: f32,
    /// Peak deviation in Hz.
    pub depth: f32,
}

/// Static synthesis parameters for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub waveform: Waveform,
    pub filter: FilterKind,
    pub filter_cutoff: f32,
    pub envelope: Adsr,
    pub harmonics: Vec<Harmonic>,
    #[serde(default)]
    pub vibrato: Option<Vibrato>,
    pub master_gain: f32,
}

/// Fraction of the instrument gain reached at the end of the attack.
const ATTACK_PEAK: f32 = 0.4;

impl InstrumentConfig {
    pub fn piano() -> Self {
        Self {
            id: "piano".to_string(),
            name: "Piano".to_string(),
            description: "Classical grand piano with rich harmonics".to_string(),
            waveform: Waveform::Triangle,
            filter: FilterKind::Lowpass,
            filter_cutoff: 2000.0,
            envelope: Adsr {
                attack: 0.01,
                decay: 0.2,
                sustain: 0.1,
                release: 0.3,
            },
            harmonics: vec![
                Harmonic {
                    multiplier: 2.0,
                    gain: 0.15,
                    waveform: Waveform::Sine,
                },
                Harmonic {
                    multiplier: 3.0,
                    gain: 0.05,
                    waveform: Waveform::Triangle,
                },
            ],
            vibrato: None,
            master_gain: 0.3,
        }
    }

    pub fn violin() -> Self {
        Self {
            id: "violin".to_string(),
            name: "Violin".to_string(),
            description: "Smooth, expressive string instrument".to_string(),
            waveform: Waveform::Sawtooth,
            filter: FilterKind::Lowpass,
            filter_cutoff: 1500.0,
            envelope: Adsr {
                attack: 0.05,
                decay: 0.1,
                sustain: 0.6,
                release: 0.4,
            },
            harmonics: vec![
                Harmonic {
                    multiplier: 2.0,
                    gain: 0.08,
                    waveform: Waveform::Sine,
                },
                Harmonic {
                    multiplier: 3.0,
                    gain: 0.04,
                    waveform: Waveform::Triangle,
                },
            ],
            vibrato: None,
            master_gain: 0.25,
        }
    }

    pub fn flute() -> Self {
        Self {
            id: "flute".to_string(),
            name: "Flute".to_string(),
            description: "Gentle, airy woodwind sound".to_string(),
            waveform: Waveform::Sine,
            filter: FilterKind::Lowpass,
            filter_cutoff: 1800.0,
            envelope: Adsr {
                attack: 0.03,
                decay: 0.12,
                sustain: 0.5,
                release: 0.6,
            },
            harmonics: vec![
                Harmonic {
                    multiplier: 2.0,
                    gain: 0.03,
                    waveform: Waveform::Sine,
                },
                Harmonic {
                    multiplier: 3.0,
                    gain: 0.015,
                    waveform: Waveform::Sine,
                },
            ],
            vibrato: None,
            master_gain: 0.2,
        }
    }

    pub fn attack_gain(&self) -> f32 {
        ATTACK_PEAK * self.master_gain
    }

    pub fn sustain_gain(&self) -> f32 {
        self.envelope.sustain.clamp(0.0, 1.0) * self.master_gain
    }

    pub fn info(&self) -> InstrumentInfo {
        InstrumentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

/// Catalog metadata shown when picking an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Instruments available for selection, in catalog order.
#[derive(Debug, Clone)]
pub struct InstrumentBank {
    instruments: Vec<InstrumentConfig>,
}

impl InstrumentBank {
    pub fn builtin() -> Self {
        Self {
            instruments: vec![
                InstrumentConfig::piano(),
                InstrumentConfig::violin(),
                InstrumentConfig::flute(),
            ],
        }
    }

    /// Adds an instrument, replacing any existing one with the same id.
    pub fn insert(&mut self, config: InstrumentConfig) {
        match self.position(&config.id) {
            Some(index) => self.instruments[index] = config,
            None => self.instruments.push(config),
        }
    }

    pub fn get(&self, id: &str) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|config| config.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.instruments.iter().position(|config| config.id == id)
    }

    pub fn by_index(&self, index: usize) -> Option<&InstrumentConfig> {
        self.instruments.get(index)
    }

    pub fn catalog(&self) -> Vec<InstrumentInfo> {
        self.instruments.iter().map(InstrumentConfig::info).collect()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl Default for InstrumentBank {
    fn default() -> Self {
        Self::builtin()
    }
}
