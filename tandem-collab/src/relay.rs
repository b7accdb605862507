//! Reference room relay speaking the session protocol.
//!
//! ```text
//! Client A ──┐
//!            ├── RelayRoom (room id) ── content + roster ── broadcast::Sender
//! Client B ──┘                                                  │
//!                                                  ┌────────────┼────────────┐
//!                                                  ▼            ▼            ▼
//!                                              Client A     Client B     Client C
//! ```
//!
//! Each room keeps the authoritative content, an advisory version counter
//! and the roster, all in memory. Every connection subscribes to its
//! room's broadcast channel and forwards every frame not marked to skip it.
//! `document_updated` reaches the whole room, the author included, so
//! clients see their own echo; the other notifications skip the sender.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{ProtocolError, RelayError};
use crate::position::char_len;
use crate::presence::CursorColor;
use crate::protocol::{
    ChangeKind, ClientMessage, CursorMoved, DocumentChange, DocumentSnapshot, DocumentUpdated,
    JoinRoom, Joined, JoinedDocument, JoinedParticipant, Participant, ParticipantLeft,
    ServerMessage, UpdateCursor, UpdateDocument,
};

/// One pre-encoded frame on a room's broadcast channel.
#[derive(Debug)]
struct Fanout {
    /// Connection that must not receive this frame.
    skip: Option<Uuid>,
    text: String,
}

struct RelayRoom {
    content: String,
    version: u64,
    /// Insertion ordered roster.
    participants: Vec<Participant>,
    broadcast: broadcast::Sender<Arc<Fanout>>,
}

impl RelayRoom {
    fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            content: String::new(),
            version: 0,
            participants: Vec::new(),
            broadcast,
        }
    }

    fn has_participant(&self, id: &str) -> bool {
        self.participants.iter().any(|p| p.id == id)
    }

    /// Encode once and hand to every subscriber. Returns the receiver count.
    fn fan_out(&self, skip: Option<Uuid>, message: &ServerMessage) -> Result<usize, ProtocolError> {
        let text = message.encode()?;
        Ok(self.broadcast.send(Arc::new(Fanout { skip, text })).unwrap_or(0))
    }
}

type Rooms = Arc<RwLock<HashMap<String, RelayRoom>>>;

/// Apply one positional change to `content`, counting in chars.
///
/// `position` and `length` are clamped to the content.
pub fn apply_change(content: &str, change: &DocumentChange) -> String {
    match change.kind {
        ChangeKind::Replace => {
            let total = char_len(content);
            let start = change.position.min(total);
            let end = start.saturating_add(change.length).min(total);

            let mut out = String::with_capacity(content.len() + change.content.len());
            out.extend(content.chars().take(start));
            out.push_str(&change.content);
            out.extend(content.chars().skip(end));
            out
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: RelayConfig,
    rooms: Rooms,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        Ok(TcpListener::bind(&self.config.bind_addr).await?)
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        log::info!("Relay listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let capacity = self.config.broadcast_capacity;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Current content of a room.
    pub async fn content(&self, room_id: &str) -> Option<String> {
        self.rooms.read().await.get(room_id).map(|r| r.content.clone())
    }

    /// Current roster of a room.
    pub async fn participants(&self, room_id: &str) -> Vec<Participant> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|r| r.participants.clone())
            .unwrap_or_default()
    }

    /// Rooms currently held in memory.
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Rooms,
    capacity: usize,
) -> Result<(), RelayError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    log::info!("WebSocket connection established from {addr}");

    let mut conn = Connection::new(rooms, capacity);
    let result = relay_frames(&mut conn, ws_stream, addr).await;
    conn.leave().await;
    log::info!("Connection from {addr} closed");
    result
}

async fn relay_frames(
    conn: &mut Connection,
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
) -> Result<(), RelayError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let message = match ClientMessage::decode(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            log::warn!("Ignoring frame from {addr}: {e}");
                            continue;
                        }
                    };
                    for reply in conn.handle(message).await? {
                        ws_sender.send(Message::Text(reply.encode()?.into())).await?;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("Connection from {addr} dropped: {e}");
                    return Ok(());
                }
            },
            fanout = next_fanout(&mut conn.fanout) => match fanout {
                Ok(frame) => {
                    if frame.skip != Some(conn.id) {
                        ws_sender.send(Message::Text(frame.text.clone().into())).await?;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Connection {addr} lagged, dropped {n} frames");
                }
                Err(broadcast::error::RecvError::Closed) => conn.fanout = None,
            },
        }
    }
}

async fn next_fanout(
    fanout: &mut Option<broadcast::Receiver<Arc<Fanout>>>,
) -> Result<Arc<Fanout>, broadcast::error::RecvError> {
    match fanout {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Per-connection relay state.
struct Connection {
    id: Uuid,
    rooms: Rooms,
    capacity: usize,
    room_id: Option<String>,
    participant_id: Option<String>,
    fanout: Option<broadcast::Receiver<Arc<Fanout>>>,
}

impl Connection {
    fn new(rooms: Rooms, capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            rooms,
            capacity,
            room_id: None,
            participant_id: None,
            fanout: None,
        }
    }

    /// Apply one client message; returns replies for this connection only.
    async fn handle(&mut self, message: ClientMessage) -> Result<Vec<ServerMessage>, RelayError> {
        match message {
            ClientMessage::JoinRoom(join) => self.join(join).await,
            ClientMessage::SyncDocument(sync) => {
                let rooms = self.rooms.read().await;
                let (content, version) = rooms
                    .get(&sync.room_id)
                    .map(|r| (r.content.clone(), r.version))
                    .unwrap_or_default();
                Ok(vec![ServerMessage::DocumentSync(DocumentSnapshot {
                    document_id: sync.room_id,
                    content,
                    version,
                })])
            }
            ClientMessage::UpdateDocument(update) => {
                self.update_document(update).await?;
                Ok(Vec::new())
            }
            ClientMessage::UpdateCursor(update) => {
                self.update_cursor(update).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn join(&mut self, join: JoinRoom) -> Result<Vec<ServerMessage>, RelayError> {
        if self.room_id.is_some() {
            self.leave().await;
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(join.room_id.clone())
            .or_insert_with(|| RelayRoom::new(self.capacity));

        let id = match join.participant_id {
            Some(requested) if !room.has_participant(&requested) => requested,
            _ => Uuid::new_v4().to_string(),
        };
        let color = CursorColor::from_participant(&id).to_hex();
        let participant = Participant {
            id: id.clone(),
            user_id: join.participant.user_id,
            username: join.participant.username,
            color: Some(color.clone()),
            cursor: None,
        };

        self.fanout = Some(room.broadcast.subscribe());
        room.fan_out(Some(self.id), &ServerMessage::ParticipantJoined(participant.clone()))?;
        room.participants.push(participant.clone());

        let reply = ServerMessage::Joined(Joined {
            participant: JoinedParticipant {
                id: Some(id.clone()),
                color: Some(color),
            },
            participants: room.participants.clone(),
            document: Some(JoinedDocument {
                content: room.content.clone(),
                version: room.version,
            }),
        });

        log::info!(
            "Participant {id} ({}) joined room {} ({} present)",
            participant.username,
            join.room_id,
            room.participants.len()
        );
        self.room_id = Some(join.room_id);
        self.participant_id = Some(id);
        Ok(vec![reply])
    }

    async fn update_document(&mut self, update: UpdateDocument) -> Result<(), RelayError> {
        let Some(room_id) = self.room_id.as_deref() else {
            log::warn!("update_document for {} before join_room", update.document_id);
            return Ok(());
        };

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(());
        };
        let Some(author) = update.changes.last().map(|c| c.user_id.clone()) else {
            return Ok(());
        };

        for change in &update.changes {
            room.content = apply_change(&room.content, change);
        }
        room.version += 1;
        log::debug!("Room {room_id} at version {}", room.version);

        room.fan_out(
            None,
            &ServerMessage::DocumentUpdated(DocumentUpdated {
                content: room.content.clone(),
                user_id: author,
            }),
        )?;
        Ok(())
    }

    async fn update_cursor(&mut self, update: UpdateCursor) -> Result<(), RelayError> {
        let (Some(room_id), Some(participant_id)) = (self.room_id.as_deref(), self.participant_id.as_deref()) else {
            log::trace!("update_cursor before join_room");
            return Ok(());
        };

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(room_id) else {
            return Ok(());
        };
        let Some(entry) = room.participants.iter_mut().find(|p| p.id == participant_id) else {
            return Ok(());
        };
        entry.cursor = Some(update.cursor);

        let moved = ServerMessage::CursorMoved(CursorMoved {
            participant_id: entry.id.clone(),
            cursor: update.cursor,
            color: entry.color.clone(),
            username: Some(entry.username.clone()),
        });
        room.fan_out(Some(self.id), &moved)?;
        Ok(())
    }

    /// Drop out of the current room and tell the others.
    async fn leave(&mut self) {
        self.fanout = None;
        let (Some(room_id), Some(participant_id)) = (self.room_id.take(), self.participant_id.take()) else {
            return;
        };

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&room_id) else {
            return;
        };
        room.participants.retain(|p| p.id != participant_id);
        let left = ServerMessage::ParticipantLeft(ParticipantLeft {
            participant_id: participant_id.clone(),
        });
        if let Err(e) = room.fan_out(Some(self.id), &left) {
            log::error!("Failed to announce departure of {participant_id}: {e}");
        }
        log::info!("Participant {participant_id} left room {room_id}");

        // A room with content outlives its last participant
        if room.participants.is_empty() && room.content.is_empty() {
            rooms.remove(&room_id);
            log::debug!("Dropped empty room {room_id}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_change_whole_replace() {
        let change = DocumentChange::replace_all(5, "world", "u1");
        assert_eq!(apply_change("hello", &change), "world");
    }

    #[test]
    fn test_apply_change_splices_by_char() {
        let change = DocumentChange {
            position: 1,
            length: 2,
            ..DocumentChange::replace_all(0, "Ö", "u1")
        };
        assert_eq!(apply_change("aé🎉z", &change), "aÖz");
    }

    #[test]
    fn test_apply_change_clamps() {
        let change = DocumentChange {
            position: 10,
            length: 10,
            ..DocumentChange::replace_all(0, "!", "u1")
        };
        assert_eq!(apply_change("abc", &change), "abc!");
    }

    #[tokio::test]
    async fn test_join_assigns_and_honours_ids() {
        let rooms: Rooms = Arc::new(RwLock::new(HashMap::new()));
        let profile = crate::config::LocalIdentity::new("u1", "Alice").profile();

        let mut first = Connection::new(rooms.clone(), 8);
        let replies = first
            .join(JoinRoom {
                room_id: "r1".into(),
                participant_id: Some("p-keep".into()),
                participant: profile.clone(),
            })
            .await
            .unwrap();
        let ServerMessage::Joined(joined) = &replies[0] else {
            panic!("expected joined");
        };
        assert_eq!(joined.participant.id.as_deref(), Some("p-keep"));

        // Same id requested while in use gets a fresh one
        let mut second = Connection::new(rooms.clone(), 8);
        second
            .join(JoinRoom {
                room_id: "r1".into(),
                participant_id: Some("p-keep".into()),
                participant: profile,
            })
            .await
            .unwrap();
        let taken = second.participant_id.clone().unwrap();
        assert_ne!(taken, "p-keep");

        first.leave().await;
        let roster = rooms.read().await.get("r1").unwrap().participants.clone();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, taken);
    }

    #[tokio::test]
    async fn test_last_leave_drops_only_empty_rooms() {
        let rooms: Rooms = Arc::new(RwLock::new(HashMap::new()));
        let profile = crate::config::LocalIdentity::new("u1", "Alice").profile();
        let join = |room_id: &str| JoinRoom {
            room_id: room_id.into(),
            participant_id: None,
            participant: profile.clone(),
        };

        let mut idle = Connection::new(rooms.clone(), 8);
        idle.join(join("idle")).await.unwrap();
        let mut writer = Connection::new(rooms.clone(), 8);
        writer.join(join("busy")).await.unwrap();
        writer
            .update_document(UpdateDocument {
                document_id: "busy".into(),
                changes: vec![DocumentChange::replace_all(0, "kept", "u1")],
            })
            .await
            .unwrap();
        assert_eq!(rooms.read().await.len(), 2);

        idle.leave().await;
        writer.leave().await;

        let rooms = rooms.read().await;
        assert!(!rooms.contains_key("idle"));
        let busy = rooms.get("busy").unwrap();
        assert!(busy.participants.is_empty());
        assert_eq!(busy.content, "kept");
    }
}
