//! Turns captured points into discrete note events.
//!
//! Points are read left to right. Neighbouring points that share a note and
//! sit within the proximity threshold collapse into one run, and every run is
//! played as a single note whose start and length follow its horizontal
//! extent across the canvas.

use serde::{Deserialize, Serialize};

use crate::config::MappingConfig;
use crate::drawing::{Note, Point};
use crate::synth::NotePlayer;

/// A maximal group of adjacent same-note points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Run {
    pub note: Note,
    pub start_x: f32,
    pub end_x: f32,
    pub points: usize,
}

/// One note to schedule, relative to the start of playback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    pub note: Note,
    pub delay: f64,
    pub duration: f64,
}

#[derive(Debug, Clone)]
pub struct CanvasMusicMapper {
    proximity: f32,
    min_duration: f64,
}

impl CanvasMusicMapper {
    pub fn new(config: &MappingConfig) -> Self {
        Self {
            proximity: config.proximity,
            min_duration: config.min_note_duration,
        }
    }

    /// Groups points into runs, ordered by their left edge.
    pub fn group_runs(&self, points: &[Point]) -> Vec<Run> {
        let mut sorted: Vec<&Point> = points.iter().collect();
        sorted.sort_by(|a, b| a.x.total_cmp(&b.x));

        let mut runs: Vec<Run> = Vec::new();
        for point in sorted {
            match runs.last_mut() {
                Some(run)
                    if run.note == point.note && (point.x - run.end_x).abs() <= self.proximity =>
                {
                    run.end_x = point.x;
                    run.points += 1;
                }
                _ => runs.push(Run {
                    note: point.note,
                    start_x: point.x,
                    end_x: point.x,
                    points: 1,
                }),
            }
        }
        runs
    }

    /// Computes the note events for a canvas `canvas_width` units wide played
    /// over `playback_duration` seconds.
    pub fn events(&self, points: &[Point], canvas_width: f32, playback_duration: f64) -> Vec<NoteEvent> {
        if !(canvas_width.is_finite() && canvas_width > 0.0) {
            tracing::warn!(canvas_width, "cannot map points onto a degenerate canvas");
            return Vec::new();
        }

        let width = canvas_width as f64;
        self.group_runs(points)
            .into_iter()
            .map(|run| {
                let start = run.start_x as f64;
                let end = run.end_x as f64;
                NoteEvent {
                    note: run.note,
                    delay: start / width * playback_duration,
                    duration: ((end - start) / width * playback_duration).max(self.min_duration),
                }
            })
            .collect()
    }

    /// Schedules every note event on `player` against one shared origin and
    /// returns the playback duration callers should wait for, or `0.0` when
    /// there was nothing to play.
    pub fn play(
        &self,
        points: &[Point],
        canvas_width: f32,
        playback_duration: f64,
        player: &mut dyn NotePlayer,
    ) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let events = self.events(points, canvas_width, playback_duration);
        if events.is_empty() {
            return 0.0;
        }

        player.stop_all_notes();
        let origin = player.current_time();
        for event in &events {
            player.play_note_from(origin, event.note, event.duration, event.delay);
        }
        tracing::debug!(
            notes = events.len(),
            points = points.len(),
            playback_duration,
            "canvas music scheduled"
        );
        playback_duration
    }
}

impl Default for CanvasMusicMapper {
    fn default() -> Self {
        Self::new(&MappingConfig::default())
    }
}
