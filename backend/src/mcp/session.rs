//! MCP streaming session management.
//!
//! Each session owns a bounded channel and one spawned task. The task emits
//! `init`, then `catalog`, then a `ping` every keep-alive period until the
//! session is cancelled. Cancellation happens on explicit terminate, when the
//! client stream is dropped, when a send fails, or on shutdown.

use super::handler::{capabilities, server_info, PROTOCOL_VERSION};
use chrono::Utc;
use futures::Stream;
use hindsight_types::{StreamEvent, ToolDescriptor};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Default interval between keep-alive pings.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Events buffered per session before the task waits on the client.
const SESSION_BUFFER: usize = 16;

/// Lifecycle of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, `init` not yet delivered
    Connecting,
    /// `init` delivered
    Initialized,
    /// `catalog` delivered, pinging
    Streaming,
    Closed,
}

/// State shared between the manager and the session task.
#[derive(Debug)]
struct Shared {
    state: parking_lot::RwLock<SessionState>,
    sequence: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }
}

#[derive(Debug)]
struct SessionHandle {
    cancel: CancellationToken,
    shared: Arc<Shared>,
}

type SessionMap = Arc<RwLock<HashMap<String, SessionHandle>>>;

/// Client side of a session. Dropping it cancels the session.
pub struct SessionStream {
    id: String,
    inner: ReceiverStream<StreamEvent>,
    _guard: DropGuard,
}

impl SessionStream {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Stream for SessionStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Manager for MCP streaming sessions.
#[derive(Clone)]
pub struct SessionManager {
    sessions: SessionMap,
    keepalive: Duration,
    catalog: Arc<Vec<ToolDescriptor>>,
}

impl SessionManager {
    /// Create a manager that announces `catalog` to every new session.
    pub fn new(catalog: Vec<ToolDescriptor>, keepalive: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            keepalive,
            catalog: Arc::new(catalog),
        }
    }

    /// Open a session and spawn its task.
    pub async fn open(&self) -> SessionStream {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            state: parking_lot::RwLock::new(SessionState::Connecting),
            sequence: AtomicU64::new(0),
        });

        self.sessions.write().await.insert(
            id.clone(),
            SessionHandle {
                cancel: cancel.clone(),
                shared: shared.clone(),
            },
        );
        info!("Created MCP session: {}", id);

        let task = SessionTask {
            id: id.clone(),
            tx,
            cancel: cancel.clone(),
            shared,
            keepalive: self.keepalive,
            catalog: self.catalog.clone(),
            sessions: self.sessions.clone(),
        };
        tokio::spawn(task.run());

        SessionStream {
            id,
            inner: ReceiverStream::new(rx),
            _guard: cancel.drop_guard(),
        }
    }

    /// Terminate a session.
    pub async fn terminate(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if let Some(handle) = sessions.remove(id) {
            handle.cancel.cancel();
            info!("Terminated MCP session: {}", id);
            true
        } else {
            false
        }
    }

    /// Get the number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Current state of a session, `None` once it has been removed.
    pub async fn state(&self, id: &str) -> Option<SessionState> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|h| *h.shared.state.read())
    }

    /// Sequence number of the last ping sent on a session.
    pub async fn sequence(&self, id: &str) -> Option<u64> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .map(|h| h.shared.sequence.load(Ordering::SeqCst))
    }

    /// Cancel every session.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.write().await;
        for (id, handle) in sessions.drain() {
            debug!("Cancelling MCP session {} on shutdown", id);
            handle.cancel.cancel();
        }
    }
}

struct SessionTask {
    id: String,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    shared: Arc<Shared>,
    keepalive: Duration,
    catalog: Arc<Vec<ToolDescriptor>>,
    sessions: SessionMap,
}

impl SessionTask {
    async fn run(self) {
        self.stream().await;

        self.cancel.cancel();
        self.shared.set_state(SessionState::Closed);
        self.sessions.write().await.remove(&self.id);
        info!("MCP session {} closed", self.id);
    }

    async fn stream(&self) {
        let init = StreamEvent::Init {
            session_id: self.id.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            server_info: server_info(),
            capabilities: capabilities(),
        };
        if !self.emit(init).await {
            return;
        }
        self.shared.set_state(SessionState::Initialized);

        let catalog = StreamEvent::Catalog {
            tools: self.catalog.as_ref().clone(),
        };
        if !self.emit(catalog).await {
            return;
        }
        self.shared.set_state(SessionState::Streaming);

        let mut ticker = interval_at(Instant::now() + self.keepalive, self.keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let sequence = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                    let ping = StreamEvent::Ping {
                        timestamp: Utc::now(),
                        sequence,
                    };
                    if !self.emit(ping).await {
                        return;
                    }
                }
            }
        }
    }

    /// Send one event. Returns false when the session is cancelled or the
    /// client is gone.
    async fn emit(&self, event: StreamEvent) -> bool {
        debug!("MCP session {}: sending {}", self.id, event.description());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => {
                if sent.is_err() {
                    debug!("MCP session {}: client went away", self.id);
                }
                sent.is_ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn manager() -> SessionManager {
        let catalog = vec![ToolDescriptor {
            name: "health_check".to_string(),
            description: "Check server and database health".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        SessionManager::new(catalog, DEFAULT_KEEPALIVE)
    }

    async fn wait_until_removed(sessions: &SessionManager, id: &str) {
        for _ in 0..50 {
            if sessions.state(id).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {} was not removed", id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_order_and_ping_sequence() {
        let sessions = manager();
        let mut stream = sessions.open().await;
        let opened = Instant::now();

        match stream.next().await.unwrap() {
            StreamEvent::Init {
                session_id,
                protocol_version,
                ..
            } => {
                assert_eq!(session_id, stream.id());
                assert_eq!(protocol_version, PROTOCOL_VERSION);
            }
            other => panic!("expected init, got {:?}", other),
        }
        match stream.next().await.unwrap() {
            StreamEvent::Catalog { tools } => assert_eq!(tools.len(), 1),
            other => panic!("expected catalog, got {:?}", other),
        }
        assert_eq!(
            sessions.state(stream.id()).await,
            Some(SessionState::Streaming)
        );

        for expected in 1..=3u64 {
            match stream.next().await.unwrap() {
                StreamEvent::Ping { sequence, .. } => assert_eq!(sequence, expected),
                other => panic!("expected ping, got {:?}", other),
            }
        }
        assert!(opened.elapsed() >= DEFAULT_KEEPALIVE * 3);
        assert_eq!(sessions.sequence(stream.id()).await, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_are_independent() {
        let sessions = manager();
        let mut first = sessions.open().await;
        let mut second = sessions.open().await;
        assert_ne!(first.id(), second.id());
        assert_eq!(sessions.session_count().await, 2);

        // Each session counts its own pings
        let mut first_events = Vec::new();
        for _ in 0..4 {
            first_events.push(first.next().await.unwrap());
        }
        let mut second_events = Vec::new();
        for _ in 0..3 {
            second_events.push(second.next().await.unwrap());
        }
        assert!(matches!(first_events[3], StreamEvent::Ping { sequence: 2, .. }));
        assert!(matches!(second_events[2], StreamEvent::Ping { sequence: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_one_session_keeps_the_other_pinging() {
        let sessions = manager();
        let mut kept = sessions.open().await;
        let dropped = sessions.open().await;
        let dropped_id = dropped.id().to_string();

        // init, catalog, first ping
        for _ in 0..3 {
            kept.next().await.unwrap();
        }
        let mut last_ping = Instant::now();

        drop(dropped);
        wait_until_removed(&sessions, &dropped_id).await;
        assert_eq!(sessions.session_count().await, 1);

        for expected in 2..=4u64 {
            match kept.next().await.unwrap() {
                StreamEvent::Ping { sequence, .. } => assert_eq!(sequence, expected),
                other => panic!("expected ping, got {:?}", other),
            }
            let gap = last_ping.elapsed();
            assert!(gap >= DEFAULT_KEEPALIVE - Duration::from_secs(1), "{:?}", gap);
            assert!(gap < DEFAULT_KEEPALIVE + Duration::from_secs(1), "{:?}", gap);
            last_ping = Instant::now();
        }
        assert_eq!(sessions.sequence(kept.id()).await, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_ends_stream() {
        let sessions = manager();
        let mut stream = sessions.open().await;
        let id = stream.id().to_string();
        stream.next().await.unwrap();

        assert!(sessions.terminate(&id).await);
        assert!(!sessions.terminate(&id).await);
        assert_eq!(sessions.session_count().await, 0);

        // Whatever was buffered drains, then the stream ends
        let rest: Vec<_> = stream.collect().await;
        assert!(rest.iter().all(|e| !matches!(e, StreamEvent::Ping { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_session() {
        let sessions = manager();
        let stream = sessions.open().await;
        let id = stream.id().to_string();
        assert_eq!(sessions.session_count().await, 1);

        drop(stream);
        wait_until_removed(&sessions, &id).await;
        assert_eq!(sessions.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all() {
        let sessions = manager();
        let mut a = sessions.open().await;
        let mut b = sessions.open().await;
        sessions.shutdown().await;
        assert_eq!(sessions.session_count().await, 0);

        let a_rest: Vec<_> = (&mut a).collect().await;
        let b_rest: Vec<_> = (&mut b).collect().await;
        assert!(a_rest.len() <= 2);
        assert!(b_rest.len() <= 2);
    }

    #[tokio::test]
    async fn test_terminate_unknown() {
        assert!(!manager().terminate("no-such-session").await);
    }
}
