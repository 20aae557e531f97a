//! Sequential playback of the stack.
//!
//! The scheduler walks a snapshot of the stack taken at `start`, giving each
//! entry its own time slot. It never waits on anything: `start` and `poll`
//! do the work that is due and arm timers for the rest. `stop` starts a new
//! timer generation, so nothing armed by an earlier run can touch state once
//! it has been cancelled.

use serde::Serialize;

use crate::config::PlaybackConfig;
use crate::events::{Observers, SubscriptionId};
use crate::mapping::CanvasMusicMapper;
use crate::stack::{CanvasEntry, StackStore};
use crate::surface::RenderSurface;
use crate::synth::NotePlayer;
use crate::timeline::{Timer, TimerQueue};

/// Read-only view published on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub is_playing: bool,
    pub current_canvas_index: usize,
    pub current_canvas_id: Option<String>,
    /// Overall progress through the sequence in `[0, 1]`.
    pub progress: f64,
    pub total_canvases: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Playing { index: usize },
    Cancelling,
}

/// What the visible canvas should show and how opaque it is.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualState {
    pub opacity: f32,
    pub displayed_canvas_id: Option<String>,
}

impl Default for VisualState {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            displayed_canvas_id: None,
        }
    }
}

/// Quadratic ease-in-out on `[0, 1]`.
pub fn ease_in_out(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        2.0 * t * t
    } else {
        -1.0 + (4.0 - 2.0 * t) * t
    }
}

/// Fade-out of the old drawing overlapped with the fade-in of the new one.
///
/// The old drawing fades out over `duration`; halfway through, the new drawing
/// is swapped in and fades in from zero over a full `duration`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    pub started_at: f64,
    pub duration: f64,
}

impl Crossfade {
    pub fn swap_at(&self) -> f64 {
        self.started_at + self.duration / 2.0
    }

    pub fn ends_at(&self) -> f64 {
        self.swap_at() + self.duration
    }

    pub fn opacity_at(&self, now: f64) -> f32 {
        if self.duration <= 0.0 || now >= self.ends_at() {
            return 1.0;
        }
        let opacity = if now < self.swap_at() {
            1.0 - ease_in_out((now - self.started_at).max(0.0) / self.duration)
        } else {
            ease_in_out((now - self.swap_at()) / self.duration)
        };
        opacity as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum PlaybackTimer {
    Progress { index: usize },
    Complete { index: usize },
    Swap { index: usize },
    FadeEnd { index: usize },
}

/// Collaborators the scheduler drives while an entry plays.
pub struct PlaybackDeps<'a> {
    pub player: &'a mut dyn NotePlayer,
    pub surface: &'a mut dyn RenderSurface,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    start: f64,
    duration: f64,
}

impl Slot {
    fn end(&self) -> f64 {
        self.start + self.duration
    }

    fn fraction_at(&self, now: f64) -> f64 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        ((now - self.start) / self.duration).clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
pub struct PlaybackScheduler {
    mapper: CanvasMusicMapper,
    speed: f64,
    progress_interval: f64,
    crossfade: f64,
    state: SchedulerState,
    sequence: Vec<CanvasEntry>,
    slot: Option<Slot>,
    fade: Option<Crossfade>,
    playback: PlaybackState,
    visual: VisualState,
    timers: TimerQueue<PlaybackTimer>,
    observers: Observers<PlaybackState>,
    visual_observers: Observers<VisualState>,
}

impl PlaybackScheduler {
    pub fn new(mapper: CanvasMusicMapper, config: &PlaybackConfig) -> Self {
        let mut scheduler = Self {
            mapper,
            speed: 1.0,
            progress_interval: config.progress_interval(),
            crossfade: config.crossfade(),
            state: SchedulerState::Idle,
            sequence: Vec::new(),
            slot: None,
            fade: None,
            playback: PlaybackState::default(),
            visual: VisualState::default(),
            timers: TimerQueue::new(),
            observers: Observers::new(),
            visual_observers: Observers::new(),
        };
        scheduler.set_speed(config.speed);
        scheduler
    }

    /// Sets the multiplier that divides entry durations from the next
    /// `start` on. Non-positive or non-finite values are ignored.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        if !(speed.is_finite() && speed > 0.0) {
            tracing::debug!(speed, "ignoring invalid playback speed");
            return false;
        }
        self.speed = speed;
        true
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn playback_state(&self) -> &PlaybackState {
        &self.playback
    }

    /// Visual state with the crossfade opacity evaluated at `now`.
    pub fn visual_state(&self, now: f64) -> VisualState {
        VisualState {
            opacity: self.fade.map_or(1.0, |fade| fade.opacity_at(now)),
            displayed_canvas_id: self.visual.displayed_canvas_id.clone(),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, SchedulerState::Playing { .. })
    }

    /// Id of the entry currently sounding.
    pub fn current_entry_id(&self) -> Option<&str> {
        self.playback.current_canvas_id.as_deref()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&PlaybackState) + 'static) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn subscribe_visual(
        &mut self,
        callback: impl FnMut(&VisualState) + 'static,
    ) -> SubscriptionId {
        self.visual_observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    pub fn unsubscribe_visual(&mut self, id: SubscriptionId) -> bool {
        self.visual_observers.unsubscribe(id)
    }

    /// Earliest time at which `poll` has work to do.
    pub fn next_deadline(&self) -> Option<f64> {
        self.timers.next_due()
    }

    /// Begins playing the store's ordered sequence at `now`. Returns `false`
    /// without side effects when already playing or the stack is empty.
    pub fn start(&mut self, store: &StackStore, now: f64, deps: PlaybackDeps<'_>) -> bool {
        if self.is_playing() {
            tracing::debug!("playback already running");
            return false;
        }
        let sequence = store.ordered_sequence();
        if sequence.is_empty() {
            tracing::debug!("nothing to play");
            return false;
        }

        self.timers.invalidate();
        self.fade = None;
        self.playback.total_canvases = sequence.len();
        self.sequence = sequence;
        tracing::info!(
            entries = self.sequence.len(),
            speed = self.speed,
            "stack playback started"
        );

        let PlaybackDeps { player, surface } = deps;
        self.enter(0, now, player, surface);
        true
    }

    /// Cancels playback. Safe to call at any time; returns `false` when there
    /// was nothing to cancel.
    pub fn stop(&mut self) -> bool {
        if !self.is_playing() {
            return false;
        }

        self.state = SchedulerState::Cancelling;
        self.timers.invalidate();
        self.slot = None;
        self.fade = None;
        self.sequence.clear();

        self.playback.is_playing = false;
        self.playback.progress = 0.0;
        self.playback.current_canvas_id = None;
        self.playback.current_canvas_index = 0;
        self.state = SchedulerState::Idle;
        tracing::info!("stack playback stopped");

        self.observers.notify(&self.playback);
        self.publish_visual_opaque();
        true
    }

    /// Runs every timer due at or before `now`, in due order.
    pub fn poll(&mut self, now: f64, deps: PlaybackDeps<'_>) {
        let PlaybackDeps { player, surface } = deps;
        while let Some(timer) = self.timers.pop_due(now) {
            if !self.timers.is_current(&timer) {
                continue;
            }
            self.fire(timer, player, surface);
        }
    }

    fn fire(
        &mut self,
        timer: Timer<PlaybackTimer>,
        player: &mut dyn NotePlayer,
        surface: &mut dyn RenderSurface,
    ) {
        let SchedulerState::Playing { index: current } = self.state else {
            return;
        };
        let at = timer.due;

        match timer.kind {
            PlaybackTimer::Progress { index } if index == current => {
                let Some(slot) = self.slot else { return };
                let total = self.sequence.len() as f64;
                self.playback.progress = (index as f64 + slot.fraction_at(at)) / total;
                self.observers.notify(&self.playback);
                if self.fade.is_some() {
                    let visual = self.visual_state(at);
                    self.visual_observers.notify(&visual);
                }

                let next = at + self.progress_interval;
                if next < slot.end() {
                    self.timers.arm(next, PlaybackTimer::Progress { index });
                }
            }
            PlaybackTimer::Complete { index } if index == current => {
                self.timers
                    .cancel_where(|kind| *kind == PlaybackTimer::Progress { index });
                if index + 1 < self.sequence.len() {
                    self.enter(index + 1, at, player, surface);
                } else {
                    self.finish();
                }
            }
            PlaybackTimer::Swap { index } if index == current => {
                let entry = &self.sequence[index];
                surface.redraw(&entry.data);
                self.visual.displayed_canvas_id = Some(entry.id.clone());
                tracing::debug!(index, id = %entry.id, "crossfade swapped drawing");
                let visual = self.visual_state(at);
                self.visual_observers.notify(&visual);
            }
            PlaybackTimer::FadeEnd { index } if index == current => {
                self.fade = None;
                let visual = self.visual_state(at);
                self.visual_observers.notify(&visual);
            }
            _ => {}
        }
    }

    fn enter(
        &mut self,
        index: usize,
        at: f64,
        player: &mut dyn NotePlayer,
        surface: &mut dyn RenderSurface,
    ) {
        let entry = self.sequence[index].clone();
        let duration = (entry.duration / self.speed).max(0.0);
        let total = self.sequence.len();

        self.state = SchedulerState::Playing { index };
        self.slot = Some(Slot {
            start: at,
            duration,
        });
        self.playback = PlaybackState {
            is_playing: true,
            current_canvas_index: index,
            current_canvas_id: Some(entry.id.clone()),
            progress: index as f64 / total as f64,
            total_canvases: total,
        };
        tracing::debug!(index, id = %entry.id, duration, "playing stack entry");
        self.observers.notify(&self.playback);

        // Audio is submitted before any visual work.
        let canvas_width = surface.dimensions().0 as f32;
        self.mapper.play(&entry.data, canvas_width, duration, player);

        if index == 0 {
            self.fade = None;
            surface.redraw(&entry.data);
            self.visual.displayed_canvas_id = Some(entry.id.clone());
            let visual = self.visual_state(at);
            self.visual_observers.notify(&visual);
        } else {
            let fade = Crossfade {
                started_at: at,
                duration: self.crossfade,
            };
            self.fade = Some(fade);
            self.timers
                .arm(fade.swap_at(), PlaybackTimer::Swap { index });
            self.timers
                .arm(fade.ends_at(), PlaybackTimer::FadeEnd { index });
            let visual = self.visual_state(at);
            self.visual_observers.notify(&visual);
        }

        let first_tick = at + self.progress_interval;
        if first_tick < at + duration {
            self.timers
                .arm(first_tick, PlaybackTimer::Progress { index });
        }
        self.timers
            .arm(at + duration, PlaybackTimer::Complete { index });
    }

    fn finish(&mut self) {
        let last = self.sequence.len().saturating_sub(1);
        self.timers.invalidate();
        self.slot = None;
        self.fade = None;
        self.sequence.clear();
        self.state = SchedulerState::Idle;

        self.playback.is_playing = false;
        self.playback.progress = 1.0;
        self.playback.current_canvas_id = None;
        self.playback.current_canvas_index = last;
        tracing::info!("stack playback finished");

        self.observers.notify(&self.playback);
        self.publish_visual_opaque();
    }

    fn publish_visual_opaque(&mut self) {
        self.visual.opacity = 1.0;
        let visual = self.visual.clone();
        self.visual_observers.notify(&visual);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use approx::assert_relative_eq;

    use super::*;
    use crate::drawing::{Note, Point};
    use crate::stack::MemoryStorage;
    use crate::surface::TextSurface;
    use crate::synth::NoteHandle;

    #[derive(Default)]
    struct CountingPlayer {
        notes: usize,
        stops: usize,
    }

    impl NotePlayer for CountingPlayer {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn play_note_from(&mut self, _: f64, _: Note, _: f64, _: f64) -> Option<NoteHandle> {
            self.notes += 1;
            None
        }

        fn stop_all_notes(&mut self) {
            self.stops += 1;
        }
    }

    type Log = Rc<RefCell<Vec<&'static str>>>;

    struct LoggingPlayer(Log);

    impl NotePlayer for LoggingPlayer {
        fn current_time(&self) -> f64 {
            0.0
        }

        fn play_note_from(&mut self, _: f64, _: Note, _: f64, _: f64) -> Option<NoteHandle> {
            self.0.borrow_mut().push("play");
            None
        }

        fn stop_all_notes(&mut self) {}
    }

    struct LoggingSurface(Log);

    impl RenderSurface for LoggingSurface {
        fn thumbnail(&self) -> crate::Result<String> {
            Ok(String::new())
        }

        fn redraw(&mut self, _: &[Point]) {
            self.0.borrow_mut().push("redraw");
        }

        fn dimensions(&self) -> (u32, u32) {
            (800, 600)
        }
    }

    struct Rig {
        store: StackStore,
        scheduler: PlaybackScheduler,
        player: CountingPlayer,
        surface: TextSurface,
    }

    impl Rig {
        fn new(durations: &[f64]) -> Self {
            let mut store = StackStore::open(Box::new(MemoryStorage::new()));
            let mut surface = TextSurface::new(800, 600, 80, 24);
            for (i, duration) in durations.iter().enumerate() {
                let points = vec![
                    Point::new(100.0 * i as f32, 50.0, Note::ALL[i % 6]),
                    Point::new(100.0 * i as f32 + 5.0, 50.0, Note::ALL[i % 6]),
                ];
                surface.redraw(&points);
                let entry = store.add(&points, &surface, None).unwrap();
                store.set_duration(&entry.id, *duration);
            }
            Self {
                store,
                scheduler: PlaybackScheduler::new(
                    CanvasMusicMapper::default(),
                    &PlaybackConfig::default(),
                ),
                player: CountingPlayer::default(),
                surface,
            }
        }

        fn start(&mut self, now: f64) -> bool {
            self.scheduler.start(
                &self.store,
                now,
                PlaybackDeps {
                    player: &mut self.player,
                    surface: &mut self.surface,
                },
            )
        }

        fn poll(&mut self, now: f64) {
            self.scheduler.poll(
                now,
                PlaybackDeps {
                    player: &mut self.player,
                    surface: &mut self.surface,
                },
            );
        }
    }

    fn record_states(scheduler: &mut PlaybackScheduler) -> Rc<RefCell<Vec<PlaybackState>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        scheduler.subscribe(move |state| sink.borrow_mut().push(state.clone()));
        seen
    }

    #[test]
    fn ease_curve_is_symmetric() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_relative_eq!(ease_in_out(0.5), 0.5);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert_relative_eq!(ease_in_out(0.25) + ease_in_out(0.75), 1.0);
    }

    #[test]
    fn crossfade_dips_then_recovers() {
        let fade = Crossfade {
            started_at: 10.0,
            duration: 0.15,
        };
        assert_eq!(fade.opacity_at(10.0), 1.0);
        assert!(fade.opacity_at(10.07) > 0.4);
        assert!(fade.opacity_at(10.08) < 0.1);
        assert!(fade.opacity_at(10.15) > 0.4);
        assert_eq!(fade.opacity_at(10.3), 1.0);
    }

    #[test]
    fn audio_is_submitted_before_each_visual_change() {
        let rig = Rig::new(&[1.0, 1.0]);
        let mut scheduler = rig.scheduler;
        let log = Log::default();
        let mut player = LoggingPlayer(log.clone());
        let mut surface = LoggingSurface(log.clone());

        assert!(scheduler.start(
            &rig.store,
            0.0,
            PlaybackDeps {
                player: &mut player,
                surface: &mut surface,
            },
        ));
        assert_eq!(*log.borrow(), ["play", "redraw"]);
        log.borrow_mut().clear();

        // Second entry starts at t=1; its drawing swaps in mid-crossfade.
        scheduler.poll(
            1.0,
            PlaybackDeps {
                player: &mut player,
                surface: &mut surface,
            },
        );
        assert_eq!(*log.borrow(), ["play"]);
        scheduler.poll(
            1.1,
            PlaybackDeps {
                player: &mut player,
                surface: &mut surface,
            },
        );
        assert_eq!(*log.borrow(), ["play", "redraw"]);
    }

    #[test]
    fn empty_stack_does_not_start() {
        let mut rig = Rig::new(&[]);
        assert!(!rig.start(0.0));
        assert_eq!(rig.scheduler.state(), SchedulerState::Idle);
        assert!(rig.scheduler.next_deadline().is_none());
    }

    #[test]
    fn start_while_playing_is_a_no_op() {
        let mut rig = Rig::new(&[1.0, 1.0]);
        assert!(rig.start(0.0));
        let notes = rig.player.notes;
        assert!(!rig.start(0.5));
        assert_eq!(rig.player.notes, notes);
        assert_eq!(rig.scheduler.state(), SchedulerState::Playing { index: 0 });
    }

    #[test]
    fn entering_an_entry_plays_audio_and_shows_it() {
        let mut rig = Rig::new(&[2.0, 3.0]);
        let ids: Vec<_> = rig.store.ordered_sequence().into_iter().map(|e| e.id).collect();
        rig.surface.redraw(&[]);
        rig.start(0.0);

        let state = rig.scheduler.playback_state();
        assert!(state.is_playing);
        assert_eq!(state.current_canvas_id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(state.total_canvases, 2);
        assert_eq!(rig.player.notes, 1);
        assert!(!rig.surface.is_blank());
        let visual = rig.scheduler.visual_state(0.0);
        assert_eq!(visual.opacity, 1.0);
        assert_eq!(visual.displayed_canvas_id.as_deref(), Some(ids[0].as_str()));
    }

    #[test]
    fn progress_ticks_within_an_entry() {
        let mut rig = Rig::new(&[2.0, 2.0]);
        let seen = record_states(&mut rig.scheduler);
        rig.start(0.0);
        rig.poll(1.0);

        let progress = rig.scheduler.playback_state().progress;
        assert!(progress > 0.24 && progress <= 0.25, "{progress}");
        let values: Vec<f64> = seen.borrow().iter().map(|s| s.progress).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert!(values.len() > 50);
    }

    #[test]
    fn crossfade_swaps_the_drawing_midway() {
        let mut rig = Rig::new(&[1.0, 1.0]);
        let ids: Vec<_> = rig.store.ordered_sequence().into_iter().map(|e| e.id).collect();
        rig.start(0.0);

        rig.poll(1.05);
        assert_eq!(rig.scheduler.playback_state().current_canvas_index, 1);
        let visual = rig.scheduler.visual_state(1.05);
        assert!(visual.opacity < 1.0);
        assert_eq!(visual.displayed_canvas_id.as_deref(), Some(ids[0].as_str()));

        let redraws = rig.surface.redraw_count();
        rig.poll(1.08);
        assert_eq!(rig.surface.redraw_count(), redraws + 1);
        assert_eq!(
            rig.scheduler.visual_state(1.08).displayed_canvas_id.as_deref(),
            Some(ids[1].as_str())
        );

        rig.poll(1.3);
        assert_eq!(rig.scheduler.visual_state(1.3).opacity, 1.0);
    }

    #[test]
    fn speed_divides_durations() {
        let mut rig = Rig::new(&[2.0, 2.0]);
        assert!(!rig.scheduler.set_speed(0.0));
        assert!(rig.scheduler.set_speed(2.0));
        rig.start(0.0);
        rig.poll(1.01);
        assert_eq!(rig.scheduler.playback_state().current_canvas_index, 1);
        rig.poll(2.01);
        assert!(!rig.scheduler.is_playing());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut rig = Rig::new(&[1.0]);
        let seen = record_states(&mut rig.scheduler);
        assert!(!rig.scheduler.stop());
        assert!(seen.borrow().is_empty());

        rig.start(0.0);
        assert!(rig.scheduler.stop());
        let after_first = seen.borrow().len();
        assert!(!rig.scheduler.stop());
        assert_eq!(seen.borrow().len(), after_first);
        assert_eq!(*rig.scheduler.playback_state(), PlaybackState {
            total_canvases: 1,
            ..PlaybackState::default()
        });
    }

    #[test]
    fn stale_timers_never_touch_a_new_run() {
        let mut rig = Rig::new(&[2.0, 3.0, 1.0]);
        rig.start(0.0);
        rig.poll(1.0);
        rig.scheduler.stop();

        // Restart half a second later; the first run's completion at t=2
        // must not advance the second run, which completes at t=3.5.
        rig.start(1.5);
        rig.poll(2.2);
        assert_eq!(rig.scheduler.playback_state().current_canvas_index, 0);
        rig.poll(3.6);
        assert_eq!(rig.scheduler.playback_state().current_canvas_index, 1);
    }

    #[test]
    fn sequence_is_a_snapshot() {
        let mut rig = Rig::new(&[1.0, 1.0]);
        rig.start(0.0);
        let extra = vec![Point::new(1.0, 1.0, Note::A)];
        rig.store.add(&extra, &rig.surface, None).unwrap();

        rig.poll(2.5);
        let state = rig.scheduler.playback_state();
        assert!(!state.is_playing);
        assert_eq!(state.total_canvases, 2);
    }

    #[test]
    fn natural_end_reports_full_progress() {
        let mut rig = Rig::new(&[0.5, 0.5]);
        rig.start(0.0);
        rig.poll(10.0);

        let state = rig.scheduler.playback_state();
        assert!(!state.is_playing);
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.current_canvas_id, None);
        assert_eq!(state.current_canvas_index, 1);
        assert!(rig.scheduler.next_deadline().is_none());
        assert_eq!(rig.scheduler.visual_state(10.0).opacity, 1.0);
    }
}
