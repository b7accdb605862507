//! Async driver: runs a [`SessionController`] on a tokio task.
//!
//! The task is the controller's only owner. Channel events and local
//! input are multiplexed with `tokio::select!`, applied one at a time, and
//! the resulting [`SessionView`] is published on a `watch` channel for the
//! rendering surface. Dropping the [`SessionHandle`] (or calling
//! [`SessionHandle::leave`]) ends the loop and tears the session down.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::presence::CursorRenderData;
use crate::protocol::{CursorPosition, Participant};
use crate::session::{ConnectionStatus, Phase, SessionController};
use crate::store::ParticipantStore;
use crate::transport::{EventReceiver, Transport};

/// Input from the editing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalInput {
    /// Full new document content.
    Edit(String),
    /// Selection as char offsets into the current content.
    Select { start: usize, end: usize },
    Leave,
}

/// Everything a rendering surface needs after each applied event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub status: ConnectionStatus,
    pub phase: Phase,
    pub content: String,
    pub participants: Vec<Participant>,
    pub remote_cursors: Vec<CursorRenderData>,
    pub local_cursor: Option<CursorPosition>,
    pub local_participant_id: Option<String>,
    /// Number of changes waiting for the channel.
    pub pending: usize,
    /// Visible content differs from what the room last saw from us.
    pub unsynced: bool,
}

impl SessionView {
    pub fn capture<T: Transport, S: ParticipantStore>(controller: &SessionController<T, S>) -> Self {
        Self {
            status: controller.connection_status(),
            phase: controller.phase(),
            content: controller.content().to_string(),
            participants: controller.presence().participants().to_vec(),
            remote_cursors: controller.presence().remote_cursors(),
            local_cursor: controller.presence().local_cursor(),
            local_participant_id: controller.local_participant_id().map(str::to_string),
            pending: controller.pending().len(),
            unsynced: controller.document().is_dirty(),
        }
    }
}

/// Drive `controller` until input closes or a [`LocalInput::Leave`] arrives.
///
/// Returns the final view after teardown.
pub async fn run<T: Transport, S: ParticipantStore>(
    mut controller: SessionController<T, S>,
    mut events: EventReceiver,
    mut inputs: mpsc::UnboundedReceiver<LocalInput>,
    view: watch::Sender<SessionView>,
) -> SessionView {
    if let Err(e) = controller.start() {
        log::error!("Could not start session for room {}: {e}", controller.config().room_id);
    }
    publish(&view, &controller);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => controller.handle_event(event),
                None => {
                    log::warn!("Event channel for room {} closed", controller.config().room_id);
                    break;
                }
            },
            input = inputs.recv() => match input {
                Some(LocalInput::Edit(content)) => controller.edit(content),
                Some(LocalInput::Select { start, end }) => controller.select(start, end),
                Some(LocalInput::Leave) | None => break,
            },
        }
        publish(&view, &controller);
    }

    controller.teardown();
    let last = SessionView::capture(&controller);
    view.send_replace(last.clone());
    last
}

fn publish<T: Transport, S: ParticipantStore>(view: &watch::Sender<SessionView>, controller: &SessionController<T, S>) {
    let next = SessionView::capture(controller);
    view.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Spawn [`run`] on the current tokio runtime.
pub fn spawn<T, S>(controller: SessionController<T, S>, events: EventReceiver) -> SessionHandle
where
    T: Transport + Send + 'static,
    S: ParticipantStore + Send + 'static,
{
    let (input_tx, input_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(SessionView::capture(&controller));
    let task = tokio::spawn(run(controller, events, input_rx, view_tx));
    SessionHandle {
        inputs: input_tx,
        view: view_rx,
        task,
    }
}

/// Owner-side handle to a running session.
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<LocalInput>,
    view: watch::Receiver<SessionView>,
    task: JoinHandle<SessionView>,
}

impl SessionHandle {
    /// Submit new document content. Returns `false` once the session ended.
    pub fn edit(&self, content: impl Into<String>) -> bool {
        self.inputs.send(LocalInput::Edit(content.into())).is_ok()
    }

    pub fn select(&self, start: usize, end: usize) -> bool {
        self.inputs.send(LocalInput::Select { start, end }).is_ok()
    }

    pub fn leave(&self) {
        let _ = self.inputs.send(LocalInput::Leave);
    }

    /// Latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Independent subscription to view changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Wait until a published view satisfies `predicate`.
    ///
    /// Returns `None` if the session ended first without ever matching.
    pub async fn wait_for(&mut self, predicate: impl FnMut(&SessionView) -> bool) -> Option<SessionView> {
        self.view.wait_for(predicate).await.ok().map(|view| view.clone())
    }

    /// Leave and wait for teardown to finish.
    pub async fn join(self) -> Result<SessionView, tokio::task::JoinError> {
        self.leave();
        self.task.await
    }
}
