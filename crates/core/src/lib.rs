//! Core library for the Sensory Sketchpad application.
//!
//! Drawings are captured as colored points, each color standing for a note of
//! a fixed scale. A drawing is turned into music by reading it left to right,
//! and drawings can be queued in a persistent stack that plays them in
//! sequence with a short visual crossfade between entries. Each module owns
//! one subsystem; [`session::Session`] wires them together.

pub mod config;
pub mod drawing;
pub mod error;
pub mod events;
pub mod mapping;
pub mod playback;
pub mod session;
pub mod stack;
pub mod surface;
pub mod synth;
pub mod timeline;

pub use config::{AppConfig, AudioConfig, MappingConfig, PlaybackConfig, StackConfig};
pub use drawing::{BrushType, DrawingCapture, Note, Point, StrokeEvent};
pub use error::{Result, SketchpadError};
pub use events::{Notice, NoticeLevel, Observers, SubscriptionId};
pub use mapping::{CanvasMusicMapper, NoteEvent, Run};
pub use playback::{PlaybackDeps, PlaybackScheduler, PlaybackState, SchedulerState, VisualState};
pub use session::Session;
pub use stack::{
    CanvasEntry, FileStorage, MemoryStorage, StackEvent, StackStore, StackSummary, Storage,
};
pub use surface::{RenderSurface, TextSurface};
pub use synth::{
    AudioContext, AudioHost, InstrumentConfig, InstrumentInfo, NoteHandle, NotePlayer, NoteSynth,
    OfflineHost, UnavailableHost,
};
pub use timeline::{Clock, ManualClock, SystemClock, TimerQueue};
