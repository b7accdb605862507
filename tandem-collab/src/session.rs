//! Session controller: one collaboration room, one owner.
//!
//! ```text
//!  Disconnected ──connect──► Connecting ──Connected──► Handshaking ──joined+document_sync──► Active
//!                               ▲                                                            │
//!                               └────────────── Reconnecting ◄──────── channel lost ─────────┘
//!  any state ──teardown──► Closed
//! ```
//!
//! The controller owns the document, the pending change queue, the roster
//! and the transport. Every mutation happens inside [`SessionController::handle_event`]
//! or a local input method, and callers deliver those one at a time, so no
//! locking is needed.
//!
//! Replication is whole-document replacement with last-applied-wins. Two
//! clients that edit while both offline will each flush a full copy on
//! reconnect and whichever flushes last silently replaces the other's
//! work. There is no merge.

use crate::config::SessionConfig;
use crate::document::DocumentState;
use crate::error::TransportError;
use crate::position::char_len;
use crate::presence::PresenceRoom;
use crate::protocol::{
    ClientMessage, CursorMoved, DocumentChange, DocumentSnapshot, DocumentUpdated, JoinRoom,
    Joined, Participant, ParticipantLeft, ServerMessage, SyncDocument, UpdateCursor,
    UpdateDocument,
};
use crate::queue::{PendingChange, PendingQueue};
use crate::store::ParticipantStore;
use crate::transport::{ChannelEvent, Transport};

/// Coarse channel status for status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Controller state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    /// Channel is up; waiting for `joined` and `document_sync`.
    Handshaking,
    /// Joined and synced; edits go straight to the channel.
    Active,
    Reconnecting,
    /// Torn down. Terminal.
    Closed,
}

impl Phase {
    pub fn connection_status(self) -> ConnectionStatus {
        match self {
            Phase::Disconnected | Phase::Closed => ConnectionStatus::Disconnected,
            Phase::Connecting => ConnectionStatus::Connecting,
            Phase::Handshaking | Phase::Active => ConnectionStatus::Connected,
            Phase::Reconnecting => ConnectionStatus::Reconnecting,
        }
    }
}

/// Snapshot of the session-level state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub connection_status: ConnectionStatus,
    pub local_participant_id: Option<String>,
    pub last_known_content: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Handshake {
    joined: bool,
    synced: bool,
}

/// Client side of one collaboration room.
pub struct SessionController<T: Transport, S: ParticipantStore> {
    config: SessionConfig,
    transport: T,
    store: S,
    phase: Phase,
    handshake: Handshake,
    document: DocumentState,
    pending: PendingQueue,
    presence: PresenceRoom,
    local_participant_id: Option<String>,
}

impl<T: Transport, S: ParticipantStore> SessionController<T, S> {
    /// Build a controller, restoring the participant id remembered for the room.
    pub fn new(config: SessionConfig, transport: T, store: S) -> Self {
        let local_participant_id = match store.load(&config.room_id) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Could not read participant id for room {}: {e}", config.room_id);
                None
            }
        };

        let mut presence = PresenceRoom::new();
        presence.set_local_participant_id(local_participant_id.clone());

        Self {
            config,
            transport,
            store,
            phase: Phase::Disconnected,
            handshake: Handshake::default(),
            document: DocumentState::new(),
            pending: PendingQueue::new(),
            presence,
            local_participant_id,
        }
    }

    /// Ask the transport to connect. Handshaking starts on `Connected`.
    pub fn start(&mut self) -> Result<(), TransportError> {
        if self.phase == Phase::Closed {
            return Err(TransportError::Closed);
        }
        self.phase = Phase::Connecting;
        self.transport.connect()
    }

    // ───────────────────────────────────────────────────────────────
    // Channel events
    // ───────────────────────────────────────────────────────────────

    /// Apply one channel event. Events after teardown are ignored.
    pub fn handle_event(&mut self, event: ChannelEvent) {
        if self.phase == Phase::Closed {
            log::debug!("Ignoring {event:?} after teardown");
            return;
        }

        match event {
            ChannelEvent::Connecting => self.enter(Phase::Connecting),
            ChannelEvent::Reconnecting => self.enter(Phase::Reconnecting),
            ChannelEvent::Disconnected => self.enter(Phase::Disconnected),
            ChannelEvent::Connected => {
                self.enter(Phase::Handshaking);
                self.send_handshake();
            }
            ChannelEvent::Message(text) => match ServerMessage::decode(&text) {
                Ok(message) => self.handle_message(message),
                Err(e) => log::warn!("Dropping malformed frame in room {}: {e}", self.config.room_id),
            },
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!("Room {}: {:?} -> {phase:?}", self.config.room_id, self.phase);
        }
        self.phase = phase;
        self.handshake = Handshake::default();
    }

    fn send_handshake(&mut self) {
        let join = ClientMessage::JoinRoom(JoinRoom {
            room_id: self.config.room_id.clone(),
            participant_id: self.local_participant_id.clone(),
            participant: self.config.identity.profile(),
        });
        if let Err(e) = self.transport.send(&join) {
            log::warn!("join_room for room {} failed: {e}", self.config.room_id);
        }

        let sync = ClientMessage::SyncDocument(SyncDocument {
            room_id: self.config.room_id.clone(),
        });
        if let Err(e) = self.transport.send(&sync) {
            log::warn!("sync_document for room {} failed: {e}", self.config.room_id);
        }
    }

    /// Dispatch one decoded inbound message.
    pub fn handle_message(&mut self, message: ServerMessage) {
        if self.phase == Phase::Closed {
            return;
        }
        log::debug!("Room {}: {}", self.config.room_id, message.kind());

        match message {
            ServerMessage::Joined(joined) => self.on_joined(joined),
            ServerMessage::ParticipantJoined(participant) => self.on_participant_joined(participant),
            ServerMessage::ParticipantLeft(left) => self.on_participant_left(left),
            ServerMessage::DocumentSync(snapshot) => self.on_document_sync(snapshot),
            ServerMessage::DocumentUpdated(update) => self.on_document_updated(update),
            ServerMessage::CursorMoved(moved) => self.on_cursor_moved(moved),
        }
    }

    fn on_joined(&mut self, joined: Joined) {
        if let Some(id) = joined.participant.id {
            if let Err(e) = self.store.save(&self.config.room_id, &id) {
                log::warn!("Could not persist participant id for room {}: {e}", self.config.room_id);
            }
            self.presence.set_local_participant_id(Some(id.clone()));
            self.local_participant_id = Some(id);
        }

        self.presence.replace_all(joined.participants);

        if let Some(document) = joined.document {
            if self.pending.is_empty() {
                self.document.replace(document.content, None);
                self.document.set_version(document.version);
            } else {
                log::debug!(
                    "Room {}: {} pending changes, deferring joined content to document_sync",
                    self.config.room_id,
                    self.pending.len()
                );
            }
        }

        log::info!(
            "Joined room {} as {} with {} participants",
            self.config.room_id,
            self.local_participant_id.as_deref().unwrap_or("<unassigned>"),
            self.presence.len()
        );
        self.handshake.joined = true;
        self.complete_handshake();
    }

    fn on_participant_joined(&mut self, participant: Participant) {
        let id = participant.id.clone();
        if self.presence.upsert(participant) {
            log::info!("Participant {id} joined room {}", self.config.room_id);
        }
    }

    fn on_participant_left(&mut self, left: ParticipantLeft) {
        if self.presence.remove(&left.participant_id).is_some() {
            log::info!("Participant {} left room {}", left.participant_id, self.config.room_id);
        }
    }

    fn on_document_sync(&mut self, snapshot: DocumentSnapshot) {
        self.document.set_document_id(snapshot.document_id);
        self.document.set_version(snapshot.version);

        match self.pending.latest() {
            // Local wins: keep showing what the user typed, converge the
            // server by flushing against its fresh baseline.
            Some(latest) => {
                let latest = latest.to_string();
                self.document.set_baseline(snapshot.content);
                self.document.set_visible(latest);
            }
            None => self.document.replace(snapshot.content, None),
        }

        self.handshake.synced = true;
        if !self.complete_handshake() {
            self.flush();
        }
    }

    fn on_document_updated(&mut self, update: DocumentUpdated) {
        if update.user_id == self.config.identity.user_id {
            // Echo of our own change; the user may already be typing past it.
            self.document.set_baseline(update.content);
        } else {
            self.document.replace(update.content, Some(&update.user_id));
        }
    }

    fn on_cursor_moved(&mut self, moved: CursorMoved) {
        self.presence.apply_remote(moved);
    }

    /// Promote `Handshaking` to `Active` once joined and synced, then flush.
    fn complete_handshake(&mut self) -> bool {
        if self.phase != Phase::Handshaking || !(self.handshake.joined && self.handshake.synced) {
            return false;
        }
        self.phase = Phase::Active;
        log::info!("Room {} is active", self.config.room_id);
        self.flush();
        true
    }

    // ───────────────────────────────────────────────────────────────
    // Local input
    // ───────────────────────────────────────────────────────────────

    /// Local edit from the editing surface: apply optimistically, then
    /// transmit or queue.
    pub fn edit(&mut self, content: impl Into<String>) {
        if self.phase == Phase::Closed {
            return;
        }
        let content = content.into();
        let previous_len = char_len(self.document.content());
        self.document
            .apply_local(content.clone(), &self.config.identity.user_id);
        self.transmit_or_enqueue(content, previous_len);
    }

    /// Local selection change, as char offsets into the current content.
    ///
    /// Cursor updates are lossy: nothing is sent or queued unless active.
    pub fn select(&mut self, start: usize, end: usize) {
        if self.phase == Phase::Closed {
            return;
        }
        let cursor = self.presence.update_local(self.document.content(), start, end);
        if self.phase != Phase::Active {
            return;
        }
        if let Err(e) = self
            .transport
            .send(&ClientMessage::UpdateCursor(UpdateCursor { cursor }))
        {
            log::trace!("Dropping cursor update: {e}");
        }
    }

    /// The single path for outgoing edits. Offline, mid-handshake and
    /// failed sends all land in the pending queue.
    fn transmit_or_enqueue(&mut self, content: String, previous_len: usize) {
        if self.phase != Phase::Active || !self.pending.is_empty() {
            self.pending.enqueue(PendingChange::new(content));
            if self.phase == Phase::Active {
                self.flush();
            }
            return;
        }

        let message = update_message(
            self.document_id(),
            &self.config.identity.user_id,
            previous_len,
            &content,
        );
        match self.transport.send(&message) {
            Ok(()) => self.document.mark_sent(&content),
            Err(e) => {
                log::warn!("Deferring change in room {}: {e}", self.config.room_id);
                self.pending.enqueue(PendingChange::new(content));
            }
        }
    }

    /// Transmit queued changes in order if the session is active.
    pub fn flush(&mut self) {
        if self.phase != Phase::Active || self.pending.is_empty() {
            return;
        }

        let document_id = self.document_id().to_string();
        let user_id = self.config.identity.user_id.as_str();
        let transport = &mut self.transport;
        let report = self.pending.flush(self.document.baseline(), |change, replaced| {
            transport.send(&update_message(&document_id, user_id, replaced, &change.content))
        });

        if let Some(last) = report.last_sent {
            self.document.mark_sent(&last);
        }
        if report.sent > 0 {
            log::info!("Flushed {} pending changes in room {}", report.sent, self.config.room_id);
        }
        if report.requeued > 0 {
            log::warn!(
                "{} changes in room {} could not be sent; kept for the next flush",
                report.requeued,
                self.config.room_id
            );
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Teardown
    // ───────────────────────────────────────────────────────────────

    /// Close the channel. Idempotent; also runs on drop.
    pub fn teardown(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.transport.disconnect();
        self.phase = Phase::Closed;
        self.handshake = Handshake::default();
        if !self.pending.is_empty() {
            log::warn!(
                "Leaving room {} with {} unsent changes ({} bytes)",
                self.config.room_id,
                self.pending.len(),
                self.pending.total_bytes()
            );
        }
        log::info!("Left room {}", self.config.room_id);
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    /// Id used in `update_document`: server-named, configured, or the room id.
    pub fn document_id(&self) -> &str {
        self.document
            .document_id()
            .or(self.config.document_id.as_deref())
            .unwrap_or(&self.config.room_id)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.phase.connection_status()
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            connection_status: self.connection_status(),
            local_participant_id: self.local_participant_id.clone(),
            last_known_content: self.document.baseline().to_string(),
        }
    }

    /// Content the editing surface should show.
    pub fn content(&self) -> &str {
        self.document.content()
    }

    pub fn document(&self) -> &DocumentState {
        &self.document
    }

    pub fn presence(&self) -> &PresenceRoom {
        &self.presence
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn local_participant_id(&self) -> Option<&str> {
        self.local_participant_id.as_deref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<T: Transport, S: ParticipantStore> Drop for SessionController<T, S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn update_message(document_id: &str, user_id: &str, replaced: usize, content: &str) -> ClientMessage {
    ClientMessage::UpdateDocument(UpdateDocument {
        document_id: document_id.to_string(),
        changes: vec![DocumentChange::replace_all(replaced, content, user_id)],
    })
}
