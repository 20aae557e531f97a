//! The ordered stack of captured canvases and its persistence.
//!
//! Every mutation follows the same order: change the entries, renumber
//! `stack_order`, write the whole stack to storage, then notify subscribers.
//! Subscribers therefore never see a state that was not saved (or, when the
//! storage write failed, reported as unsaved through a notice).

mod storage;

use std::collections::HashSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::drawing::Point;
use crate::events::{Notice, Observers, SubscriptionId};
use crate::surface::RenderSurface;
use crate::{Result, SketchpadError};

pub use storage::{FileStorage, MemoryStorage, Storage};

/// Storage key holding the serialised stack.
pub const STACK_KEY: &str = "sensorySketchpadStack";
pub const MAX_NAME_LEN: usize = 50;
pub const DEFAULT_ENTRY_DURATION: f64 = 3.0;

fn default_duration() -> f64 {
    DEFAULT_ENTRY_DURATION
}

/// One captured drawing queued in the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEntry {
    pub id: String,
    pub name: String,
    pub data: Vec<Point>,
    #[serde(default)]
    pub thumbnail: String,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: u64,
    /// Seconds allotted to this entry during stack playback.
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default)]
    pub stack_order: usize,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackSummary {
    pub size: usize,
    pub is_empty: bool,
    pub total_duration: f64,
}

/// Structural change notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    /// The full ordered stack after any change.
    Updated(Vec<CanvasEntry>),
    Added(CanvasEntry),
    Removed(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedStackRef<'a> {
    stack: &'a [CanvasEntry],
    next_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedStack {
    #[serde(default)]
    stack: Vec<CanvasEntry>,
    #[serde(default)]
    next_id: u64,
}

/// Trims `name` and checks it is 1..=50 characters long.
pub fn validate_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Brings stored entries back under the invariants `add` and `rename`
/// maintain: unique ids, valid names, positive durations, contiguous
/// `stack_order` and at most one active entry.
fn normalise(mut entries: Vec<CanvasEntry>, default_duration: f64) -> Vec<CanvasEntry> {
    entries.sort_by_key(|entry| entry.stack_order);

    let mut ids = HashSet::new();
    entries.retain(|entry| {
        let fresh = ids.insert(entry.id.clone());
        if !fresh {
            tracing::warn!(id = %entry.id, "dropping stored canvas with a duplicate id");
        }
        fresh
    });

    let mut seen_active = false;
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.stack_order = index;
        if entry.is_active && seen_active {
            entry.is_active = false;
        }
        seen_active |= entry.is_active;

        let trimmed = entry.name.trim();
        entry.name = if trimmed.is_empty() {
            format!("Canvas {}", index + 1)
        } else {
            trimmed.chars().take(MAX_NAME_LEN).collect()
        };
        if !(entry.duration.is_finite() && entry.duration > 0.0) {
            entry.duration = default_duration;
        }
    }
    entries
}

/// Authoritative ordered collection of [`CanvasEntry`] values.
pub struct StackStore {
    entries: Vec<CanvasEntry>,
    next_id: u64,
    default_duration: f64,
    storage: Box<dyn Storage>,
    persisted: bool,
    load_error: Option<String>,
    observers: Observers<StackEvent>,
    notices: Observers<Notice>,
}

impl StackStore {
    /// Loads the stack from `storage`. Missing or malformed data yields an
    /// empty stack.
    pub fn open(storage: Box<dyn Storage>) -> Self {
        let mut store = Self {
            entries: Vec::new(),
            next_id: 1,
            default_duration: DEFAULT_ENTRY_DURATION,
            storage,
            persisted: true,
            load_error: None,
            observers: Observers::new(),
            notices: Observers::new(),
        };
        store.load();
        store
    }

    /// Duration given to entries added from now on.
    pub fn with_default_duration(mut self, seconds: f64) -> Self {
        if seconds.is_finite() && seconds > 0.0 {
            self.default_duration = seconds;
        }
        self
    }

    fn load(&mut self) {
        let raw = match self.storage.read(STACK_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read stored stack, starting empty");
                self.load_error = Some(err.to_string());
                return;
            }
        };

        match serde_json::from_str::<PersistedStack>(&raw) {
            Ok(persisted) => {
                self.entries = normalise(persisted.stack, self.default_duration);
                self.next_id = persisted.next_id.max(1);
                tracing::debug!(entries = self.entries.len(), "stack loaded");
            }
            Err(err) => {
                tracing::warn!(error = %err, "stored stack is corrupted, starting empty");
                self.load_error = Some(err.to_string());
            }
        }
    }

    /// Why the stored stack could not be loaded, if it could not.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// `false` after the latest write to storage failed.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&StackEvent) + 'static) -> SubscriptionId {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Registers for non-fatal storage notices.
    pub fn subscribe_notices(&mut self, callback: impl FnMut(&Notice) + 'static) -> SubscriptionId {
        self.notices.subscribe(callback)
    }

    /// Captures `points` as a new active entry at the end of the stack.
    ///
    /// The thumbnail is taken from `surface` on a best-effort basis. Only
    /// points with non-finite coordinates or timestamps are rejected.
    pub fn add(
        &mut self,
        points: &[Point],
        surface: &dyn RenderSurface,
        name: Option<&str>,
    ) -> Result<CanvasEntry> {
        if !points.iter().all(Point::is_finite) {
            return Err(SketchpadError::InvalidInput(
                "points must have finite coordinates and timestamps",
            ));
        }

        let thumbnail = surface.thumbnail().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to generate thumbnail");
            String::new()
        });
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let id = self.fresh_id(created_at);
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| name.chars().take(MAX_NAME_LEN).collect())
            .unwrap_or_else(|| format!("Canvas {}", self.entries.len() + 1));

        for entry in &mut self.entries {
            entry.is_active = false;
        }
        let entry = CanvasEntry {
            id,
            name,
            data: points.to_vec(),
            thumbnail,
            created_at,
            duration: self.default_duration,
            stack_order: self.entries.len(),
            is_active: true,
        };
        self.entries.push(entry.clone());
        tracing::debug!(id = %entry.id, name = %entry.name, points = points.len(), "canvas added");

        self.commit(Some(StackEvent::Added(entry.clone())));
        Ok(entry)
    }

    /// Deletes an entry. If it was active, the last remaining entry becomes
    /// active.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };

        let removed = self.entries.remove(index);
        if removed.is_active {
            if let Some(last) = self.entries.last_mut() {
                last.is_active = true;
            }
        }
        tracing::debug!(id, "canvas removed");

        self.commit(Some(StackEvent::Removed(removed.id)));
        true
    }

    /// Makes `id` the only active entry.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.index_of(id).is_none() {
            return false;
        }
        for entry in &mut self.entries {
            entry.is_active = entry.id == id;
        }
        self.commit(None);
        true
    }

    /// Renames an entry. Names are trimmed and must be 1..=50 characters.
    pub fn rename(&mut self, id: &str, new_name: &str) -> bool {
        let Some(name) = validate_name(new_name) else {
            tracing::debug!(id, "rejecting invalid canvas name");
            return false;
        };
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.entries[index].name = name;
        self.commit(None);
        true
    }

    /// Moves an entry to `new_index` within the current bounds.
    pub fn move_to(&mut self, id: &str, new_index: usize) -> bool {
        let Some(current) = self.index_of(id) else {
            return false;
        };
        if new_index >= self.entries.len() {
            return false;
        }
        let entry = self.entries.remove(current);
        self.entries.insert(new_index, entry);
        self.commit(None);
        true
    }

    /// Sets the playback duration of an entry; `seconds` must be positive.
    pub fn set_duration(&mut self, id: &str, seconds: f64) -> bool {
        if !(seconds.is_finite() && seconds > 0.0) {
            return false;
        }
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.entries[index].duration = seconds;
        self.commit(None);
        true
    }

    /// Empties the stack. Callers must stop any playback first.
    pub fn clear(&mut self) {
        self.entries.clear();
        tracing::debug!("stack cleared");
        self.commit(None);
    }

    /// Entries sorted by `stack_order`; the canonical playback order.
    pub fn ordered_sequence(&self) -> Vec<CanvasEntry> {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|entry| entry.stack_order);
        entries
    }

    pub fn entries(&self) -> &[CanvasEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&CanvasEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn active(&self) -> Option<&CanvasEntry> {
        self.entries.iter().find(|entry| entry.is_active)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn summary(&self) -> StackSummary {
        StackSummary {
            size: self.entries.len(),
            is_empty: self.entries.is_empty(),
            total_duration: self.entries.iter().map(|entry| entry.duration).sum(),
        }
    }

    /// The persisted layout `{ "stack": [...], "nextId": n }`.
    pub fn to_json(&self) -> Result<String> {
        let snapshot = PersistedStackRef {
            stack: &self.entries,
            next_id: self.next_id,
        };
        Ok(serde_json::to_string(&snapshot)?)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    fn fresh_id(&mut self, created_at: u64) -> String {
        loop {
            let id = format!("canvas_{}_{}", self.next_id, created_at);
            self.next_id += 1;
            if self.index_of(&id).is_none() {
                return id;
            }
        }
    }

    fn commit(&mut self, event: Option<StackEvent>) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.stack_order = index;
        }
        self.persist();
        self.observers
            .notify(&StackEvent::Updated(self.entries.clone()));
        if let Some(event) = event {
            self.observers.notify(&event);
        }
    }

    fn persist(&mut self) {
        let result = self
            .to_json()
            .and_then(|raw| self.storage.write(STACK_KEY, &raw));
        match result {
            Ok(()) => {
                if !self.persisted {
                    tracing::info!("stack storage available again");
                }
                self.persisted = true;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to save stack, keeping it in memory");
                self.persisted = false;
                self.notices.notify(&Notice::warning(
                    "Your stack could not be saved. Changes are kept until you close the app.",
                ));
            }
        }
    }
}

impl fmt::Debug for StackStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackStore")
            .field("entries", &self.entries.len())
            .field("next_id", &self.next_id)
            .field("persisted", &self.persisted)
            .finish()
    }
}
