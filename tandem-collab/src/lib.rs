//! # tandem-collab: client side of a collaborative document session
//!
//! Keeps one local document in step with a shared room over a persistent
//! message channel. Whole-document replacement, last applied wins.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  LocalInput   ┌───────────────────┐   ClientMessage   ┌─────────────┐
//! │ Editing      │ ────────────► │ SessionController │ ────────────────► │ Transport   │
//! │ surface      │ ◄──────────── │  DocumentState    │ ◄──────────────── │ (WebSocket) │
//! └──────────────┘  SessionView  │  PendingQueue     │   ChannelEvent    └──────┬──────┘
//!                   (watch)      │  PresenceRoom     │                          │
//!                                └─────────┬─────────┘                          ▼
//!                                          │                          ┌─────────────┐
//!                                          ▼                          │ RelayServer │
//!                                ┌───────────────────┐                │ (reference) │
//!                                │ ParticipantStore  │                └─────────────┘
//!                                └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`position`]: char offset ↔ line/column codec
//! - [`queue`]: pending change queue for offline and failed sends
//! - [`presence`]: roster, remote cursors, palette colors
//! - [`document`]: visible content plus synchronized baseline
//! - [`protocol`]: JSON `{type, payload}` envelopes
//! - [`store`]: per-room participant id persistence
//! - [`transport`]: channel trait, WebSocket and in-memory transports
//! - [`session`]: the session state machine
//! - [`driver`]: tokio task that owns a session
//! - [`relay`]: reference room relay

pub mod config;
pub mod document;
pub mod driver;
pub mod error;
pub mod position;
pub mod presence;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod session;
pub mod store;
pub mod transport;

// Re-exports for convenience
pub use config::{LocalIdentity, RelayConfig, SessionConfig, TransportConfig};
pub use document::DocumentState;
pub use driver::{LocalInput, SessionHandle, SessionView};
pub use error::{ProtocolError, RelayError, StoreError, TransportError};
pub use position::{index_to_position, position_to_index, Position};
pub use presence::{CursorColor, CursorRenderData, PresenceRoom};
pub use protocol::{ClientMessage, CursorPosition, Participant, Selection, ServerMessage};
pub use queue::{FlushReport, PendingChange, PendingQueue};
pub use relay::RelayServer;
pub use session::{ConnectionStatus, Phase, SessionController, SessionState};
pub use store::{FileStore, MemoryStore, ParticipantStore};
pub use transport::{ChannelEvent, EventReceiver, MemoryRemote, MemoryTransport, Transport, WsTransport};
