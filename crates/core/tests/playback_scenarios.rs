use std::cell::RefCell;
use std::rc::Rc;

use sensory_sketchpad_core::{
    AppConfig, CanvasMusicMapper, FileStorage, ManualClock, MemoryStorage, Note, NoteHandle,
    NotePlayer, OfflineHost, PlaybackState, Point, Session, StackStore, TextSurface,
};

struct Harness {
    clock: ManualClock,
    session: Session<TextSurface>,
    ids: Vec<String>,
    seen: Rc<RefCell<Vec<PlaybackState>>>,
}

impl Harness {
    fn with_durations(durations: &[f64]) -> Self {
        let clock = ManualClock::new();
        let host = OfflineHost::new(8_000, Rc::new(clock.clone()));
        let mut session = Session::new(
            AppConfig::default(),
            Rc::new(clock.clone()),
            &host,
            Box::new(MemoryStorage::new()),
            TextSurface::new(800, 600, 80, 24),
        );

        let mut ids = Vec::new();
        for (i, duration) in durations.iter().enumerate() {
            let note = Note::ALL[i % Note::ALL.len()];
            let points: Vec<Point> = (0..20)
                .map(|step| Point::new(step as f32 * 20.0, 100.0 + i as f32 * 50.0, note))
                .collect();
            session.load_drawing(&points);
            let entry = session.add_drawing_to_stack(None).unwrap();
            assert!(session.set_entry_duration(&entry.id, *duration));
            ids.push(entry.id);
        }
        session.take_notices();

        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            session.subscribe_playback(move |state| seen.borrow_mut().push(state.clone()));
        }

        Self {
            clock,
            session,
            ids,
            seen,
        }
    }

    fn at(&mut self, t: f64) -> &PlaybackState {
        self.clock.set(t);
        self.session.tick();
        self.session.playback_state()
    }
}

#[test]
fn scenario_a_walks_every_entry_in_order() {
    let mut h = Harness::with_durations(&[2.0, 3.0, 1.0]);
    assert!(h.session.play_stack());

    let state = h.session.playback_state().clone();
    assert!(state.is_playing);
    assert_eq!(state.current_canvas_index, 0);
    assert_eq!(state.current_canvas_id.as_deref(), Some(h.ids[0].as_str()));
    assert_eq!(state.total_canvases, 3);

    let state = h.at(2.01).clone();
    assert_eq!(state.current_canvas_index, 1);
    assert_eq!(state.current_canvas_id.as_deref(), Some(h.ids[1].as_str()));

    let state = h.at(5.01).clone();
    assert_eq!(state.current_canvas_index, 2);
    assert_eq!(state.current_canvas_id.as_deref(), Some(h.ids[2].as_str()));

    let state = h.at(6.01).clone();
    assert!(!state.is_playing);
    assert_eq!(state.progress, 1.0);
    assert_eq!(state.current_canvas_id, None);
}

#[test]
fn scenario_b_stop_freezes_state() {
    let mut h = Harness::with_durations(&[2.0, 3.0, 1.0]);
    h.session.play_stack();
    h.at(1.0);

    assert!(h.session.stop_playback());
    let state = h.session.playback_state().clone();
    assert!(!state.is_playing);
    assert_eq!(state.progress, 0.0);
    assert_eq!(state.current_canvas_id, None);

    let published = h.seen.borrow().len();
    for step in 1..=40 {
        h.at(1.0 + step as f64 * 0.2);
    }
    assert_eq!(h.seen.borrow().len(), published);
    assert_eq!(*h.session.playback_state(), state);
    assert!(h.session.next_deadline().is_none());
}

#[test]
fn stop_then_immediate_restart_ignores_old_timers() {
    let mut h = Harness::with_durations(&[2.0, 3.0, 1.0]);
    h.session.play_stack();
    h.at(1.9);
    h.session.stop_playback();
    assert!(h.session.play_stack());

    // The first run would have advanced at t=2.
    assert_eq!(h.at(2.5).current_canvas_index, 0);
    assert_eq!(h.at(3.95).current_canvas_index, 1);
}

#[test]
fn progress_never_goes_backwards_within_a_run() {
    let mut h = Harness::with_durations(&[1.0, 1.0, 1.0]);
    h.session.play_stack();
    let mut t = 0.0;
    while t < 3.5 {
        t += 0.016;
        h.at(t);
    }

    let progress: Vec<f64> = h.seen.borrow().iter().map(|s| s.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1] + 1e-12));
    assert_eq!(progress.last().copied(), Some(1.0));
}

#[derive(Default)]
struct CountingPlayer {
    calls: usize,
}

impl NotePlayer for CountingPlayer {
    fn current_time(&self) -> f64 {
        0.0
    }

    fn play_note_from(&mut self, _: f64, _: Note, _: f64, _: f64) -> Option<NoteHandle> {
        self.calls += 1;
        None
    }

    fn stop_all_notes(&mut self) {}
}

#[test]
fn scenario_c_empty_entry_is_silent() {
    let mut store = StackStore::open(Box::new(MemoryStorage::new()));
    let surface = TextSurface::new(800, 600, 80, 24);
    let entry = store.add(&[], &surface, Some("Empty")).unwrap();
    assert_eq!(entry.name, "Empty");

    let mut player = CountingPlayer::default();
    let mapper = CanvasMusicMapper::default();
    assert_eq!(mapper.play(&entry.data, 800.0, entry.duration, &mut player), 0.0);
    assert_eq!(player.calls, 0);
}

#[test]
fn persisted_stack_reloads_identically() {
    let storage = MemoryStorage::new();
    let surface = TextSurface::new(800, 600, 80, 24);
    let mut store = StackStore::open(Box::new(storage.clone()));
    for (i, name) in ["Dawn", "Noon", "Dusk"].iter().enumerate() {
        let points = vec![Point::new(i as f32 * 10.0, 5.0, Note::E)];
        let entry = store.add(&points, &surface, Some(*name)).unwrap();
        store.set_duration(&entry.id, 1.0 + i as f64);
    }
    let ids: Vec<_> = store.ordered_sequence().into_iter().map(|e| e.id).collect();
    store.move_to(&ids[2], 0);
    let before = store.ordered_sequence();

    let reloaded = StackStore::open(Box::new(storage));
    let after = reloaded.ordered_sequence();
    assert_eq!(after, before);

    let summary: Vec<_> = after
        .iter()
        .map(|e| (e.name.as_str(), e.duration, e.stack_order))
        .collect();
    assert_eq!(summary, [("Dusk", 3.0, 0), ("Dawn", 1.0, 1), ("Noon", 2.0, 2)]);
}

#[test]
fn file_backed_stack_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let surface = TextSurface::new(800, 600, 80, 24);
    let points = vec![Point::new(1.0, 2.0, Note::C2)];

    let id = {
        let mut store = StackStore::open(Box::new(FileStorage::new(dir.path())));
        store.add(&points, &surface, Some("Saved")).unwrap().id
    };

    let store = StackStore::open(Box::new(FileStorage::new(dir.path())));
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&id).unwrap().data, points);
    assert!(store.active().is_some());
}
