//! Session/Utterance/Response entities and the process-wide session table.
//!
//! The table is a plain `RwLock<HashMap<..>>` with a register/unregister
//! pair, the same shape used for other process-wide connection registries
//! in this server.

use crate::voice_core::config::ProviderKind;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::info;

/// Conversation state machine (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Ended,
}

/// One assembled utterance within a session.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub caption: String,
    pub final_transcript: Option<String>,
}

impl Utterance {
    pub fn new(id: String) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            ended_at: None,
            caption: String::new(),
            final_transcript: None,
        }
    }
}

/// One assistant response generated in reply to an utterance.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub utterance_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Server-side events pushed to the session's egress WebSocket task. Shapes
/// map directly onto the `{type:...}` JSON control messages the client
/// receives, except [`EgressEvent::AudioBytes`] which travels as a binary
/// frame instead.
#[derive(Debug, Clone)]
pub enum EgressEvent {
    VadSignal { signal: &'static str },
    StreamingTranscript { transcript: String },
    FinalTranscript { transcript: String },
    AiResponseChunk { text: String, is_final: bool },
    Response { final_response: String },
    ProcessingState { is_processing: bool },
    AudioBytes(Vec<u8>),
    Error { code: &'static str, message: String },
}

/// Inbound events from the client's WebSocket ingress task, forwarded to the
/// orchestrator. Routed through [`SessionHandle`] (rather than handed
/// directly to the orchestrator task) so a reconnect can resume feeding the
/// same orchestrator without it ever observing its channel close.
#[derive(Debug)]
pub enum ClientEvent {
    Audio { bytes: Vec<u8>, rms: f32 },
    Flush,
    Text(String),
    Stop,
}

/// Durable per-connection state, kept alive across a brief reconnect so the
/// in-flight utterance/response isn't lost (§4.7 resume grace).
///
/// `id` is the client-supplied `session_id`, the reconciliation key that
/// survives reconnects for the session's whole lifetime. `db_session_id` is
/// re-minted on every bind (first connect or reconnect) and only ever
/// travels to the client inside `connection_established`.
pub struct SessionHandle {
    pub id: String,
    pub provider: ProviderKind,
    pub consultation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    db_session_id: RwLock<u64>,
    language: RwLock<String>,
    state: RwLock<ConversationState>,
    last_activity: RwLock<DateTime<Utc>>,
    reconnect_attempts: RwLock<u32>,
    /// Present while a client is actively attached; `None` during the
    /// resume grace window between disconnect and reconnect.
    egress_tx: RwLock<Option<mpsc::Sender<EgressEvent>>>,
    /// Held for the session's whole lifetime so the orchestrator's receiver
    /// never sees the channel close across a reconnect.
    ingress_tx: mpsc::Sender<ClientEvent>,
}

impl SessionHandle {
    /// Returns the handle plus the ingress receiver the orchestrator should
    /// drive for this session's whole lifetime.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        provider: ProviderKind,
        consultation_id: Option<String>,
        language: String,
        db_session_id: u64,
        egress_tx: mpsc::Sender<EgressEvent>,
        ingress_queue_depth: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ClientEvent>) {
        let (ingress_tx, ingress_rx) = mpsc::channel(ingress_queue_depth);
        let handle = Arc::new(Self {
            id,
            provider,
            consultation_id,
            created_at: Utc::now(),
            db_session_id: RwLock::new(db_session_id),
            language: RwLock::new(language),
            state: RwLock::new(ConversationState::Idle),
            last_activity: RwLock::new(Utc::now()),
            reconnect_attempts: RwLock::new(0),
            egress_tx: RwLock::new(Some(egress_tx)),
            ingress_tx,
        });
        (handle, ingress_rx)
    }

    /// Forward one client event to the orchestrator driving this session.
    pub async fn send_client_event(&self, event: ClientEvent) -> bool {
        self.ingress_tx.send(event).await.is_ok()
    }

    pub async fn state(&self) -> ConversationState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConversationState) {
        *self.state.write().await = state;
        self.touch().await;
    }

    pub async fn touch(&self) {
        *self.last_activity.write().await = Utc::now();
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().await
    }

    pub async fn db_session_id(&self) -> u64 {
        *self.db_session_id.read().await
    }

    /// Re-mint the `db_session_id` on a reconnect bind.
    pub async fn rebind_db_session_id(&self, db_session_id: u64) {
        *self.db_session_id.write().await = db_session_id;
    }

    pub async fn language(&self) -> String {
        self.language.read().await.clone()
    }

    /// Best-effort push to the attached client, if one is currently attached.
    pub async fn emit(&self, event: EgressEvent) -> Result<(), EgressEvent> {
        let guard = self.egress_tx.read().await;
        match guard.as_ref() {
            Some(tx) => tx.send(event).await.map_err(|e| e.0),
            None => Err(event),
        }
    }

    /// Detach the egress sender on disconnect, entering the resume grace window.
    pub async fn detach(&self) {
        *self.egress_tx.write().await = None;
    }

    /// Reattach a new egress sender on reconnect within the grace window.
    pub async fn reattach(&self, egress_tx: mpsc::Sender<EgressEvent>) {
        *self.egress_tx.write().await = Some(egress_tx);
        self.touch().await;
    }

    pub async fn is_attached(&self) -> bool {
        self.egress_tx.read().await.is_some()
    }

    /// Record a reconnect attempt, returning the new count.
    pub async fn record_reconnect_attempt(&self) -> u32 {
        let mut n = self.reconnect_attempts.write().await;
        *n += 1;
        *n
    }
}

/// Process-wide table of live sessions, keyed by session id.
pub struct SessionTable {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sessions: RwLock::new(HashMap::new()) })
    }

    pub async fn insert(&self, handle: Arc<SessionHandle>) {
        let id = handle.id.clone();
        self.sessions.write().await.insert(id.clone(), handle);
        info!("voice session registered: {id}");
    }

    pub async fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        if self.sessions.write().await.remove(id).is_some() {
            info!("voice session removed: {id}");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_handle(id: &str, provider: ProviderKind) -> (Arc<SessionHandle>, mpsc::Receiver<ClientEvent>, mpsc::Sender<EgressEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let (handle, ingress_rx) = SessionHandle::new(id.to_string(), provider, None, "en".to_string(), 1, tx.clone(), 8);
        (handle, ingress_rx, tx)
    }

    #[tokio::test]
    async fn insert_get_remove_round_trip() {
        let table = SessionTable::new();
        let (handle, _ingress_rx, _tx) = new_handle("s1", ProviderKind::A);

        table.insert(handle.clone()).await;
        assert_eq!(table.len().await, 1);
        assert!(table.get("s1").await.is_some());

        table.remove("s1").await;
        assert!(table.get("s1").await.is_none());
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn detach_then_reattach_preserves_handle() {
        let (handle, _ingress_rx, _tx) = new_handle("s2", ProviderKind::B);

        assert!(handle.is_attached().await);
        handle.detach().await;
        assert!(!handle.is_attached().await);

        let (tx2, mut rx2) = mpsc::channel(8);
        handle.reattach(tx2).await;
        assert!(handle.is_attached().await);

        handle.emit(EgressEvent::ProcessingState { is_processing: true }).await.unwrap();
        let event = rx2.recv().await.unwrap();
        assert!(matches!(event, EgressEvent::ProcessingState { is_processing: true }));
    }

    #[tokio::test]
    async fn reconnect_attempts_increment() {
        let (handle, _ingress_rx, _tx) = new_handle("s3", ProviderKind::A);
        assert_eq!(handle.record_reconnect_attempt().await, 1);
        assert_eq!(handle.record_reconnect_attempt().await, 2);
    }

    #[tokio::test]
    async fn ingress_channel_survives_detach_and_reattach() {
        let (handle, mut ingress_rx, _tx) = new_handle("s4", ProviderKind::A);

        handle.detach().await;
        let (tx2, _rx2) = mpsc::channel(8);
        handle.reattach(tx2).await;

        assert!(handle.send_client_event(ClientEvent::Flush).await);
        assert!(matches!(ingress_rx.recv().await, Some(ClientEvent::Flush)));
    }

    #[tokio::test]
    async fn db_session_id_is_rebound_on_reconnect() {
        let (handle, _ingress_rx, _tx) = new_handle("s5", ProviderKind::A);
        assert_eq!(handle.db_session_id().await, 1);
        handle.rebind_db_session_id(2).await;
        assert_eq!(handle.db_session_id().await, 2);
    }

    /// Ordering on egress: events emitted in sequence arrive in that sequence.
    #[tokio::test]
    async fn emitted_events_preserve_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let (handle, _ingress_rx) = SessionHandle::new("s6".to_string(), ProviderKind::B, None, "en".to_string(), 1, tx, 8);

        for i in 0..5u8 {
            handle
                .emit(EgressEvent::AiResponseChunk { text: i.to_string(), is_final: false })
                .await
                .unwrap();
        }

        for i in 0..5u8 {
            match rx.recv().await.unwrap() {
                EgressEvent::AiResponseChunk { text, .. } => assert_eq!(text, i.to_string()),
                other => panic!("unexpected event out of order: {other:?}"),
            }
        }
    }

    /// Backpressure: with the egress channel full and nobody draining, a
    /// further emit suspends rather than dropping the event, and completes
    /// only once the receiver makes room.
    #[tokio::test]
    async fn emit_suspends_on_full_channel_instead_of_dropping() {
        let (tx, mut rx) = mpsc::channel(1);
        let (handle, _ingress_rx) = SessionHandle::new("s7".to_string(), ProviderKind::B, None, "en".to_string(), 1, tx, 8);

        handle.emit(EgressEvent::ProcessingState { is_processing: true }).await.unwrap();

        let blocked_handle = handle.clone();
        let blocked = tokio::spawn(async move {
            blocked_handle.emit(EgressEvent::ProcessingState { is_processing: false }).await.unwrap();
        });

        // Give the spawned emit a chance to run and confirm it is still
        // pending on the full channel rather than having dropped the event.
        tokio::task::yield_now().await;
        assert!(!blocked.is_finished());

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, EgressEvent::ProcessingState { is_processing: true }));

        blocked.await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, EgressEvent::ProcessingState { is_processing: false }));
    }

    /// Reconnect continuity: the same session_id survives an abnormal close
    /// and reconnect with a freshly minted db_session_id, while state and the
    /// ingress channel (and thus the orchestrator driving it) are preserved.
    #[tokio::test]
    async fn reconnect_preserves_session_state_with_new_db_session_id() {
        let table = SessionTable::new();
        let (handle, mut ingress_rx, _tx) = new_handle("s8", ProviderKind::A);
        table.insert(handle.clone()).await;
        handle.set_state(ConversationState::Speaking).await;

        // Abnormal close mid-playback: egress detaches, session stays in the table.
        handle.detach().await;
        assert!(!handle.is_attached().await);
        assert_eq!(table.len().await, 1);

        // Client reconnects with the same session_id before the table entry
        // is reaped; the server looks it up, rebinds a new db_session_id, and
        // reattaches a fresh egress sender.
        let resumed = table.get("s8").await.expect("session still present across reconnect");
        resumed.rebind_db_session_id(2).await;
        let (tx2, _rx2) = mpsc::channel(8);
        resumed.reattach(tx2).await;

        assert_eq!(resumed.db_session_id().await, 2);
        assert!(resumed.is_attached().await);
        assert_eq!(resumed.state().await, ConversationState::Speaking);

        // The orchestrator's ingress receiver never saw the channel close.
        assert!(resumed.send_client_event(ClientEvent::Flush).await);
        assert!(matches!(ingress_rx.recv().await, Some(ClientEvent::Flush)));
    }
}
