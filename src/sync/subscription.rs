//! Relay subscription loop
//!
//! Keeps one session to the relay open for as long as the process runs:
//! connect, read frames, apply accepted messages to the clipboard, and start
//! over when the connection fails. Each wait (backoff, connect, read) is raced
//! against the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clipboard::ClipboardProvider;
use crate::sync::filter::{DedupFilter, Verdict};
use crate::transport::{
    decode_frame, BackoffPolicy, ConnectionState, Connector, InboundMessage, RelayFrame, Session,
};

/// Counters reported when the loop exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Connection attempts, successful or not
    pub connect_attempts: u64,

    /// Sessions that were established
    pub sessions: u64,

    /// Frames read from the relay
    pub frames: u64,

    /// Messages written to the clipboard
    pub applied: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Long-running subscription to the relay topic
pub struct SubscriptionLoop {
    connector: Arc<dyn Connector>,
    filter: DedupFilter,
    sink: Arc<dyn ClipboardProvider>,
    backoff: Box<dyn BackoffPolicy>,
    state: Arc<watch::Sender<ConnectionState>>,
    stats: LoopStats,
}

impl SubscriptionLoop {
    pub fn new(
        connector: Arc<dyn Connector>,
        filter: DedupFilter,
        sink: Arc<dyn ClipboardProvider>,
        backoff: Box<dyn BackoffPolicy>,
    ) -> Self {
        Self {
            connector,
            filter,
            sink,
            backoff,
            state: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            stats: LoopStats::default(),
        }
    }

    /// Report state transitions on a shared channel instead of a private one
    pub fn with_state_sender(mut self, state: Arc<watch::Sender<ConnectionState>>) -> Self {
        state.send_replace(ConnectionState::Disconnected);
        self.state = state;
        self
    }

    /// Follow the loop's connection state, also while it runs
    pub fn state_updates(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown` turns true or its sender is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LoopStats {
        let target = self.connector.target();

        while !*shutdown.borrow() {
            self.set_state(ConnectionState::Connecting);
            self.stats.connect_attempts += 1;
            debug!("Connecting to {} (attempt {})", target, self.stats.connect_attempts);

            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown.changed() => break,
            };

            let mut session = match connected {
                Ok(session) => session,
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    let delay = self.backoff.next_delay();
                    warn!("Relay connection failed, retrying in {:?}: {}", delay, e);

                    if Self::wait(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(ConnectionState::Connected);
            self.stats.sessions += 1;
            info!("Subscribed to {}, listening for clipboard messages", target);

            let frames_before = self.stats.frames;
            let end = self.read_session(session.as_mut(), &mut shutdown).await;

            if let Err(e) = session.close().await {
                warn!("Failed to close relay session: {}", e);
            }
            drop(session);
            self.set_state(ConnectionState::Disconnected);

            if end == SessionEnd::Shutdown {
                break;
            }

            // a relay that accepts and hangs up at once is treated like a
            // failed connect
            if self.stats.frames == frames_before {
                let delay = self.backoff.next_delay();
                warn!("Relay closed an empty session, retrying in {:?}", delay);
                if Self::wait(delay, &mut shutdown).await {
                    break;
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!(
            "Subscription stopped after {} connection attempts, {} messages applied",
            self.stats.connect_attempts, self.stats.applied
        );
        self.stats
    }

    /// Sleep for `delay`; true when shutdown arrived first
    async fn wait(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep(delay) => false,
            _ = shutdown.changed() => true,
        }
    }

    async fn read_session(
        &mut self,
        session: &mut dyn Session,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let frames_at_start = self.stats.frames;
        loop {
            let frame = tokio::select! {
                frame = session.next_frame() => frame,
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            };

            match frame {
                Ok(Some(text)) => {
                    if self.stats.frames == frames_at_start {
                        self.backoff.reset();
                    }
                    self.stats.frames += 1;
                    self.handle_frame(&text).await;
                }
                Ok(None) => {
                    warn!("Relay closed the subscription, reconnecting");
                    return SessionEnd::Dropped;
                }
                Err(e) => {
                    warn!("{}", e);
                    return SessionEnd::Dropped;
                }
            }
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        match decode_frame(text) {
            Ok(RelayFrame::Message(message)) => self.apply(message).await,
            Ok(RelayFrame::Control(event)) => debug!("Relay event: {}", event),
            Err(e) => warn!("Discarding relay frame: {}", e),
        }
    }

    async fn apply(&mut self, message: InboundMessage) {
        match self.filter.admit(&message).await {
            Verdict::Accept => match self.sink.set_text(&message.body).await {
                Ok(()) => {
                    self.stats.applied += 1;
                    info!(
                        "Clipboard updated from {} ({} bytes)",
                        message.origin_label,
                        message.body.len()
                    );
                }
                Err(e) => warn!("Failed to write {} clipboard: {}", self.sink.name(), e),
            },
            verdict => debug!("Ignoring message from {}: {:?}", message.origin_label, verdict),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ClipboardError;
    use crate::sync::state::SharedState;
    use crate::transport::{FixedBackoff, Result as TransportResult, TransportError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingClipboard {
        writes: Mutex<Vec<String>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl ClipboardProvider for RecordingClipboard {
        async fn get_text(&self) -> std::result::Result<String, ClipboardError> {
            Ok(self.writes.lock().unwrap().last().cloned().unwrap_or_default())
        }

        async fn set_text(&self, text: &str) -> std::result::Result<(), ClipboardError> {
            if self.fail_writes {
                return Err(ClipboardError::Platform("denied".to_string()));
            }
            self.writes.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    /// Session replaying scripted frames, then reporting a drop or hanging
    struct ScriptedSession {
        frames: VecDeque<TransportResult<Option<String>>>,
        hang_when_done: bool,
        closes: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Session for ScriptedSession {
        async fn next_frame(&mut self) -> TransportResult<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match self.frames.pop_front() {
                Some(frame) => frame,
                None if self.hang_when_done => std::future::pending().await,
                None => Ok(None),
            }
        }

        async fn close(&mut self) -> TransportResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails `failures` times, then hands out one session per script
    struct ScriptedConnector {
        failures: AtomicUsize,
        scripts: Mutex<VecDeque<Vec<TransportResult<Option<String>>>>>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        closes: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        fn new(failures: usize, scripts: Vec<Vec<TransportResult<Option<String>>>>) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                scripts: Mutex::new(scripts.into()),
                attempts: Arc::new(Mutex::new(Vec::new())),
                closes: Arc::new(AtomicUsize::new(0)),
                reads: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self) -> TransportResult<Box<dyn Session>> {
            self.attempts.lock().unwrap().push(Instant::now());

            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(TransportError::Connect {
                    url: "ws://test".to_string(),
                    message: "refused".to_string(),
                });
            }

            let mut scripts = self.scripts.lock().unwrap();
            let hang_when_done = scripts.len() <= 1;
            let frames = scripts.pop_front().unwrap_or_default();
            Ok(Box::new(ScriptedSession {
                frames: frames.into(),
                hang_when_done,
                closes: Arc::clone(&self.closes),
                reads: Arc::clone(&self.reads),
            }))
        }

        fn target(&self) -> String {
            "ws://test/topic/ws".to_string()
        }
    }

    /// Zero-delay policy that counts how often it was consulted
    struct CountingBackoff(Arc<AtomicUsize>);

    impl BackoffPolicy for CountingBackoff {
        fn next_delay(&mut self) -> Duration {
            self.0.fetch_add(1, Ordering::SeqCst);
            Duration::ZERO
        }

        fn reset(&mut self) {}
    }

    fn text(frame: &str) -> TransportResult<Option<String>> {
        Ok(Some(frame.to_string()))
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_reconnects_after_failures_then_reads() {
        let connector = Arc::new(ScriptedConnector::new(
            3,
            vec![vec![text(r#"{"title":"B","message":"hello"}"#)]],
        ));
        let backoff_calls = Arc::new(AtomicUsize::new(0));
        let clipboard = Arc::new(RecordingClipboard::default());

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", SharedState::new()),
            clipboard.clone(),
            Box::new(CountingBackoff(backoff_calls.clone())),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        wait_for(|| clipboard.writes.lock().unwrap().len() == 1).await;
        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(connector.attempts.lock().unwrap().len(), 4);
        assert_eq!(backoff_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.connect_attempts, 4);
        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_spaces_attempts() {
        let connector = Arc::new(ScriptedConnector::new(2, vec![vec![]]));
        let reads = Arc::clone(&connector.reads);

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", SharedState::new()),
            Arc::new(RecordingClipboard::default()),
            Box::new(FixedBackoff::default()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(connector.attempts.lock().unwrap().len(), 2);
        assert_eq!(reads.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(connector.attempts.lock().unwrap().len(), 3);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let attempts = connector.attempts.lock().unwrap();
        assert_eq!(attempts[1] - attempts[0], Duration::from_secs(5));
        assert_eq!(attempts[2] - attempts[1], Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_drop_triggers_reconnect_without_losing_dedup() {
        let connector = Arc::new(ScriptedConnector::new(
            0,
            vec![
                vec![
                    text(r#"{"title":"B","message":"hello"}"#),
                    Err(TransportError::Read {
                        message: "reset".to_string(),
                    }),
                ],
                vec![
                    text(r#"{"title":"B","message":"hello"}"#),
                    text(r#"{"title":"B","message":"next"}"#),
                ],
            ],
        ));
        let clipboard = Arc::new(RecordingClipboard::default());
        let state = SharedState::new();

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", state.clone()),
            clipboard.clone(),
            Box::new(FixedBackoff::immediate()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        wait_for(|| clipboard.writes.lock().unwrap().len() == 2).await;
        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(*clipboard.writes.lock().unwrap(), vec!["hello", "next"]);
        assert_eq!(state.last_applied().await, "next");
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.frames, 3);
        // each session closed exactly once
        assert_eq!(connector.closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_frames_and_sink_errors_keep_session() {
        let connector = Arc::new(ScriptedConnector::new(
            0,
            vec![vec![
                text("garbage"),
                text(r#"{"event":"open","topic":"t"}"#),
                text(r#"{"event":"message","message":"no title"}"#),
                text(r#"{"title":"B","message":"hello"}"#),
            ]],
        ));
        let clipboard = Arc::new(RecordingClipboard {
            writes: Mutex::new(Vec::new()),
            fail_writes: true,
        });
        let state = SharedState::new();

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", state.clone()),
            clipboard,
            Box::new(FixedBackoff::immediate()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        let reads = Arc::clone(&connector.reads);
        wait_for(|| reads.load(Ordering::SeqCst) >= 5).await;
        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.sessions, 1);
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.applied, 0);
        // accepted before the write, so a failed write is not retried
        assert_eq!(state.last_applied().await, "hello");
    }

    #[tokio::test]
    async fn test_shutdown_while_disconnected() {
        let connector = Arc::new(ScriptedConnector::new(usize::MAX, vec![]));

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", SharedState::new()),
            Arc::new(RecordingClipboard::default()),
            Box::new(FixedBackoff::new(Duration::from_secs(3600))),
        );
        assert_eq!(
            *subscription.state_updates().borrow(),
            ConnectionState::Disconnected
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        wait_for(|| connector.attempts.lock().unwrap().len() == 1).await;
        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.connect_attempts, 1);
        assert_eq!(stats.sessions, 0);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions_are_observable() {
        let connector = Arc::new(ScriptedConnector::new(1, vec![vec![]]));

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", SharedState::new()),
            Arc::new(RecordingClipboard::default()),
            Box::new(FixedBackoff::default()),
        );
        let mut states = subscription.state_updates();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        // first attempt failed, waiting out the backoff
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts.lock().unwrap().len(), 1);
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.attempts.lock().unwrap().len(), 2);
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shared_state_sender_sees_connecting() {
        /// Connector whose attempts never finish
        struct StalledConnector;

        #[async_trait]
        impl Connector for StalledConnector {
            async fn connect(&self) -> TransportResult<Box<dyn Session>> {
                std::future::pending().await
            }

            fn target(&self) -> String {
                "ws://stalled/t/ws".to_string()
            }
        }

        let sender = Arc::new(watch::channel(ConnectionState::Connected).0);
        let mut states = sender.subscribe();

        let subscription = SubscriptionLoop::new(
            Arc::new(StalledConnector),
            DedupFilter::new("A", SharedState::new()),
            Arc::new(RecordingClipboard::default()),
            Box::new(FixedBackoff::immediate()),
        )
        .with_state_sender(Arc::clone(&sender));
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        states.changed().await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connecting);

        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.connect_attempts, 1);
        assert_eq!(*states.borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_empty_session_backs_off_before_reconnect() {
        // first session ends without a frame, second stays open
        let connector = Arc::new(ScriptedConnector::new(0, vec![vec![], vec![]]));
        let backoff_calls = Arc::new(AtomicUsize::new(0));

        let subscription = SubscriptionLoop::new(
            connector.clone(),
            DedupFilter::new("A", SharedState::new()),
            Arc::new(RecordingClipboard::default()),
            Box::new(CountingBackoff(backoff_calls.clone())),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(subscription.run(shutdown_rx));

        let attempts = Arc::clone(&connector.attempts);
        wait_for(|| attempts.lock().unwrap().len() == 2).await;
        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(stats.sessions, 2);
        assert_eq!(backoff_calls.load(Ordering::SeqCst), 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 2);
    }
}
