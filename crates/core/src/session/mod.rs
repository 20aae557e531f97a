//! Caller layer that owns every component and coordinates them.
//!
//! Components never reach into each other; the session is where their
//! contracts meet. In particular it stops stack playback before the stack is
//! cleared or the entry being played is removed, and it turns component
//! failures into user-facing [`Notice`]s.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::AppConfig;
use crate::drawing::{BrushType, DrawingCapture, Note, Point, StrokeEvent};
use crate::events::{Notice, NoticeLevel, SubscriptionId};
use crate::mapping::CanvasMusicMapper;
use crate::playback::{PlaybackDeps, PlaybackScheduler, PlaybackState, VisualState};
use crate::stack::{CanvasEntry, StackEvent, StackStore, StackSummary, Storage};
use crate::surface::RenderSurface;
use crate::synth::{AudioHost, InstrumentInfo, NotePlayer, NoteSynth};
use crate::timeline::{Clock, TimerQueue};

const STROKE_FEEDBACK: f64 = 0.1;
const COLOR_FEEDBACK: f64 = 0.15;
const BRUSH_FEEDBACK: f64 = 0.1;
/// Undrained notices kept before the oldest are dropped.
pub const MAX_PENDING_NOTICES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DrawingTimer {
    Finished,
}

/// Owns every component of one sketchpad.
///
/// Notices queue up until [`take_notices`](Self::take_notices) drains them;
/// past [`MAX_PENDING_NOTICES`] the oldest are discarded.
pub struct Session<S: RenderSurface> {
    config: AppConfig,
    clock: Rc<dyn Clock>,
    synth: NoteSynth,
    mapper: CanvasMusicMapper,
    store: StackStore,
    scheduler: PlaybackScheduler,
    capture: DrawingCapture,
    surface: S,
    drawing_timers: TimerQueue<DrawingTimer>,
    drawing_playing: bool,
    notices: Rc<RefCell<Vec<Notice>>>,
}

impl<S: RenderSurface> Session<S> {
    /// Builds every component from `config`. Audio and storage problems are
    /// reported as notices; the session is usable either way.
    pub fn new(
        config: AppConfig,
        clock: Rc<dyn Clock>,
        host: &dyn AudioHost,
        storage: Box<dyn Storage>,
        surface: S,
    ) -> Self {
        let notices = Rc::new(RefCell::new(Vec::new()));

        let mut synth = NoteSynth::default();
        synth.set_volume(config.audio.volume);
        if !synth.set_instrument(&config.audio.instrument) {
            tracing::warn!(
                instrument = %config.audio.instrument,
                "unknown instrument in configuration, keeping the default"
            );
        }
        synth.initialize(host);
        if !synth.is_ready() {
            push_notice(
                &notices,
                Notice::new(
                    NoticeLevel::Error,
                    "Failed to initialize audio. Some features may not work.",
                ),
            );
        }

        let mut store = StackStore::open(storage).with_default_duration(config.stack.default_duration);
        if store.load_error().is_some() {
            push_notice(
                &notices,
                Notice::warning("Saved stack could not be read. Starting with an empty stack."),
            );
        }
        {
            let inbox = notices.clone();
            store.subscribe_notices(move |notice| push_notice(&inbox, notice.clone()));
        }

        let mapper = CanvasMusicMapper::new(&config.mapping);
        let scheduler = PlaybackScheduler::new(mapper.clone(), &config.playback);
        tracing::info!(entries = store.len(), audio = synth.is_ready(), "session ready");

        Self {
            config,
            clock,
            synth,
            mapper,
            store,
            scheduler,
            capture: DrawingCapture::new(),
            surface,
            drawing_timers: TimerQueue::new(),
            drawing_playing: false,
            notices,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Drains the notices raised since the last call.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.borrow_mut())
    }

    fn notify(&self, notice: Notice) {
        tracing::debug!(level = ?notice.level, message = %notice.message, "notice");
        push_notice(&self.notices, notice);
    }

    /// Runs every timer due at the clock's current time.
    pub fn tick(&mut self) {
        let now = self.now();
        self.scheduler.poll(
            now,
            PlaybackDeps {
                player: &mut self.synth,
                surface: &mut self.surface,
            },
        );

        while let Some(timer) = self.drawing_timers.pop_due(now) {
            if !self.drawing_timers.is_current(&timer) {
                continue;
            }
            match timer.kind {
                DrawingTimer::Finished => {
                    self.drawing_playing = false;
                    tracing::debug!("drawing playback finished");
                }
            }
        }
    }

    /// Earliest time at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<f64> {
        match (self.scheduler.next_deadline(), self.drawing_timers.next_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn begin_stroke(&mut self, x: f32, y: f32) {
        let now = self.now();
        self.capture.begin_stroke(x, y, now);
        let note = self.capture.brush().note;
        self.synth.play_note(note, STROKE_FEEDBACK, 0.0);
    }

    pub fn extend_stroke(&mut self, x: f32, y: f32) {
        let now = self.now();
        self.capture.extend_stroke(x, y, now);
    }

    /// Commits the open stroke and redraws the surface.
    pub fn end_stroke(&mut self) -> usize {
        let added = self.capture.end_stroke();
        if added > 0 {
            self.surface.redraw(self.capture.points());
        }
        added
    }

    /// Selects a palette color and previews its note.
    pub fn select_color(&mut self, color: &str) -> bool {
        if !self.capture.set_color(color) {
            tracing::debug!(color, "ignoring color outside the palette");
            return false;
        }
        let note = self.capture.brush().note;
        self.synth.play_note(note, COLOR_FEEDBACK, 0.0);
        true
    }

    pub fn set_brush_type(&mut self, kind: BrushType) {
        self.capture.set_brush_type(kind);
        self.synth.play_note(Note::A, BRUSH_FEEDBACK, 0.0);
    }

    pub fn set_brush_size(&mut self, size: f32) {
        self.capture.set_brush_size(size);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.synth.set_volume(volume);
    }

    pub fn set_instrument(&mut self, id: &str) -> bool {
        self.synth.set_instrument(id)
    }

    pub fn instruments(&self) -> Vec<InstrumentInfo> {
        self.synth.catalog()
    }

    /// Playback speed for the next stack run.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        self.scheduler.set_speed(speed)
    }

    /// Replaces the live drawing with `points`.
    pub fn load_drawing(&mut self, points: &[Point]) {
        self.capture.load_points(points);
        self.surface.redraw(points);
    }

    pub fn clear_drawing(&mut self) -> bool {
        if !self.capture.has_content() {
            self.notify(Notice::info("Canvas is already empty!"));
            return false;
        }
        self.stop_drawing();
        self.capture.clear();
        self.surface.redraw(&[]);
        self.notify(Notice::success("Canvas cleared! Start a new musical journey!"));
        true
    }

    /// Plays the live drawing once over the configured drawing duration.
    pub fn play_drawing(&mut self) -> bool {
        if !self.capture.has_content() {
            self.notify(Notice::warning("Draw something first to play music!"));
            return false;
        }
        self.stop_playback();
        self.drawing_timers.invalidate();

        let width = self.surface.dimensions().0 as f32;
        let duration = self.mapper.play(
            self.capture.points(),
            width,
            self.config.playback.drawing_duration,
            &mut self.synth,
        );
        if duration <= 0.0 {
            self.drawing_playing = false;
            return false;
        }

        let now = self.now();
        self.drawing_timers.arm(now + duration, DrawingTimer::Finished);
        self.drawing_playing = true;
        tracing::debug!(duration, "drawing playback started");
        true
    }

    pub fn stop_drawing(&mut self) -> bool {
        if !self.drawing_playing {
            return false;
        }
        self.drawing_timers.invalidate();
        self.drawing_playing = false;
        self.synth.stop_all_notes();
        true
    }

    pub fn is_drawing_playing(&self) -> bool {
        self.drawing_playing
    }

    /// Captures the live drawing as a new stack entry.
    pub fn add_drawing_to_stack(&mut self, name: Option<&str>) -> Option<CanvasEntry> {
        if !self.capture.has_content() {
            self.notify(Notice::warning("Draw something first to add to stack!"));
            return None;
        }

        self.surface.redraw(self.capture.points());
        match self.store.add(self.capture.points(), &self.surface, name) {
            Ok(entry) => {
                self.notify(Notice::success(format!("Added \"{}\" to stack!", entry.name)));
                Some(entry)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to add drawing to stack");
                self.notify(Notice::new(
                    NoticeLevel::Error,
                    "This drawing could not be added to the stack.",
                ));
                None
            }
        }
    }

    /// Removes an entry, stopping playback first if it is sounding or active.
    pub fn remove_entry(&mut self, id: &str) -> bool {
        if self.scheduler.is_playing() {
            let sounding = self.scheduler.current_entry_id() == Some(id);
            let active = self.store.active().is_some_and(|entry| entry.id == id);
            if sounding || active {
                self.stop_playback();
            }
        }
        self.store.remove(id)
    }

    pub fn rename_entry(&mut self, id: &str, name: &str) -> bool {
        self.store.rename(id, name)
    }

    pub fn move_entry(&mut self, id: &str, index: usize) -> bool {
        self.store.move_to(id, index)
    }

    pub fn set_entry_duration(&mut self, id: &str, seconds: f64) -> bool {
        self.store.set_duration(id, seconds)
    }

    /// Activates an entry and loads its drawing for editing.
    pub fn select_entry(&mut self, id: &str) -> bool {
        if !self.store.set_active(id) {
            return false;
        }
        let Some(entry) = self.store.get(id) else {
            return false;
        };
        self.capture.load_points(&entry.data);
        self.surface.redraw(&entry.data);
        true
    }

    /// Stops any playback, then empties the stack.
    pub fn clear_stack(&mut self) {
        self.stop_playback();
        self.store.clear();
    }

    pub fn play_stack(&mut self) -> bool {
        if self.store.is_empty() {
            self.notify(Notice::warning("No canvases in stack to play!"));
            return false;
        }
        self.stop_drawing();
        let now = self.now();
        self.scheduler.start(
            &self.store,
            now,
            PlaybackDeps {
                player: &mut self.synth,
                surface: &mut self.surface,
            },
        )
    }

    /// Stops stack playback and silences its notes. Does nothing while the
    /// stack is idle, so drawing playback and feedback notes keep sounding.
    pub fn stop_playback(&mut self) -> bool {
        let stopped = self.scheduler.stop();
        if stopped {
            self.synth.stop_all_notes();
        }
        stopped
    }

    /// Renders the next block of audio output.
    pub fn render_audio(&mut self, out: &mut [f32]) -> bool {
        self.synth.render(out)
    }

    pub fn shutdown(&mut self) {
        self.stop_playback();
        self.stop_drawing();
        self.synth.destroy();
        tracing::info!("session shut down");
    }

    pub fn subscribe_playback(
        &mut self,
        callback: impl FnMut(&PlaybackState) + 'static,
    ) -> SubscriptionId {
        self.scheduler.subscribe(callback)
    }

    pub fn subscribe_visual(&mut self, callback: impl FnMut(&VisualState) + 'static) -> SubscriptionId {
        self.scheduler.subscribe_visual(callback)
    }

    pub fn subscribe_stack(&mut self, callback: impl FnMut(&StackEvent) + 'static) -> SubscriptionId {
        self.store.subscribe(callback)
    }

    pub fn subscribe_strokes(
        &mut self,
        callback: impl FnMut(&StrokeEvent) + 'static,
    ) -> SubscriptionId {
        self.capture.subscribe(callback)
    }

    pub fn playback_state(&self) -> &PlaybackState {
        self.scheduler.playback_state()
    }

    pub fn visual_state(&self) -> VisualState {
        self.scheduler.visual_state(self.now())
    }

    pub fn stack_summary(&self) -> StackSummary {
        self.store.summary()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &StackStore {
        &self.store
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    pub fn capture(&self) -> &DrawingCapture {
        &self.capture
    }

    pub fn synth(&self) -> &NoteSynth {
        &self.synth
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

fn push_notice(inbox: &RefCell<Vec<Notice>>, notice: Notice) {
    let mut pending = inbox.borrow_mut();
    if pending.len() >= MAX_PENDING_NOTICES {
        let excess = pending.len() + 1 - MAX_PENDING_NOTICES;
        pending.drain(..excess);
    }
    pending.push(notice);
}
