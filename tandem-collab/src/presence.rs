//! Participant roster and live cursor tracking.
//!
//! ## Data flow
//!
//! ```text
//! local selection (start, end offsets)
//!       │
//!       ▼
//! PresenceRoom::update_local()  ──► CursorPosition ──► update_cursor (if ready)
//!
//! joined / participant_joined / participant_left
//!       │
//!       ▼
//! PresenceRoom roster  ◄── cursor_moved (existing entries only)
//!       │
//!       ▼
//! PresenceRoom::remote_cursors()  ──► rendering surface
//! ```
//!
//! Roster membership comes only from `joined` and `participant_joined`;
//! a cursor for an unknown participant is dropped.

use serde::{Deserialize, Serialize};

use crate::position::index_to_position;
use crate::protocol::{CursorMoved, CursorPosition, Participant, Selection};

// ───────────────────────────────────────────────────────────────────
// Colors
// ───────────────────────────────────────────────────────────────────

/// RGB color for cursor/selection rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl CursorColor {
    /// Stable, vivid color derived from a participant id.
    ///
    /// Hue comes from an FNV-1a hash of the id; saturation and lightness
    /// are fixed so every cursor reads well on a light background.
    pub fn from_participant(id: &str) -> Self {
        let hue = (fnv1a(id.as_bytes()) % 360) as f32 / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.5);
        Self { r, g, b }
    }

    /// `#rrggbb` form used on the wire.
    pub fn to_hex(&self) -> String {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", channel(self.r), channel(self.g), channel(self.b))
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96 }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

// ───────────────────────────────────────────────────────────────────
// Local cursor
// ───────────────────────────────────────────────────────────────────

/// Build a cursor from the editing surface's selection offsets.
///
/// The caret sits at `end`. A non-empty range also carries a selection;
/// the offsets are used in the order given.
pub fn cursor_from_offsets(content: &str, start: usize, end: usize) -> CursorPosition {
    let head = index_to_position(content, end);
    let selection = (start != end).then(|| Selection {
        start: index_to_position(content, start),
        end: head,
    });
    CursorPosition {
        line: head.line,
        column: head.column,
        selection,
    }
}

// ───────────────────────────────────────────────────────────────────
// Presence room
// ───────────────────────────────────────────────────────────────────

/// What the rendering surface needs to draw one remote cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRenderData {
    pub participant_id: String,
    pub username: String,
    pub color: String,
    pub cursor: CursorPosition,
}

/// Roster of participants in one room plus the local cursor.
#[derive(Debug, Default)]
pub struct PresenceRoom {
    local_participant_id: Option<String>,
    /// Insertion ordered, unique by `id`.
    participants: Vec<Participant>,
    local_cursor: Option<CursorPosition>,
}

impl PresenceRoom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_participant_id(&mut self, id: Option<String>) {
        self.local_participant_id = id;
    }

    pub fn local_participant_id(&self) -> Option<&str> {
        self.local_participant_id.as_deref()
    }

    /// Replace the whole roster (the `joined` payload).
    ///
    /// Later duplicates of an id overwrite earlier ones in place.
    pub fn replace_all(&mut self, participants: Vec<Participant>) {
        self.participants.clear();
        for participant in participants {
            self.upsert(participant);
        }
    }

    /// Add a participant. Re-adding a known id refreshes its profile and
    /// keeps its last cursor.
    ///
    /// Returns `true` if the id was new.
    pub fn upsert(&mut self, mut participant: Participant) -> bool {
        if participant.color.is_none() {
            participant.color = Some(CursorColor::from_participant(&participant.id).to_hex());
        }

        match self.participants.iter_mut().find(|p| p.id == participant.id) {
            Some(existing) => {
                let cursor = existing.cursor.take();
                *existing = participant;
                if existing.cursor.is_none() {
                    existing.cursor = cursor;
                }
                false
            }
            None => {
                self.participants.push(participant);
                true
            }
        }
    }

    /// Remove exactly the participant with `id`, if present.
    pub fn remove(&mut self, id: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.id == id)?;
        Some(self.participants.remove(index))
    }

    /// Merge a remote cursor broadcast into an existing roster entry.
    ///
    /// Unknown participants and our own id are ignored. Returns `true` if an
    /// entry changed.
    pub fn apply_remote(&mut self, moved: CursorMoved) -> bool {
        if self.local_participant_id.as_deref() == Some(moved.participant_id.as_str()) {
            return false;
        }

        let Some(entry) = self.participants.iter_mut().find(|p| p.id == moved.participant_id) else {
            log::trace!("cursor for unknown participant {}", moved.participant_id);
            return false;
        };

        entry.cursor = Some(moved.cursor);
        if let Some(color) = moved.color {
            entry.color = Some(color);
        }
        if let Some(username) = moved.username {
            entry.username = username;
        }
        true
    }

    /// Record the local cursor computed from selection offsets.
    pub fn update_local(&mut self, content: &str, start: usize, end: usize) -> CursorPosition {
        let cursor = cursor_from_offsets(content, start, end);
        self.local_cursor = Some(cursor);
        cursor
    }

    pub fn local_cursor(&self) -> Option<CursorPosition> {
        self.local_cursor
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Cursors of every other participant that has reported one.
    pub fn remote_cursors(&self) -> Vec<CursorRenderData> {
        self.participants
            .iter()
            .filter(|p| self.local_participant_id.as_deref() != Some(p.id.as_str()))
            .filter_map(|p| {
                let cursor = p.cursor?;
                Some(CursorRenderData {
                    participant_id: p.id.clone(),
                    username: p.username.clone(),
                    color: p
                        .color
                        .clone()
                        .unwrap_or_else(|| CursorColor::from_participant(&p.id).to_hex()),
                    cursor,
                })
            })
            .collect()
    }
}
