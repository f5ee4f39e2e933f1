//! Clipboard synchronization engine
//!
//! Two independent flows share one [`SharedState`]:
//! - the subscription, a background task that applies other clients' clips
//! - the publish path, one short task per hotkey press
//!
//! They only meet through the relay; our own publishes come back over the
//! subscription and are dropped by the [`DedupFilter`] identity check.

pub mod filter;
pub mod publish;
pub mod state;
pub mod subscription;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use filter::{evaluate, DedupFilter, Verdict};
pub use publish::{PublishError, PublishOutcome, Publisher};
pub use state::SharedState;
pub use subscription::{LoopStats, SubscriptionLoop};

use crate::clipboard::{ArboardClipboard, ClipboardProvider};
use crate::config::Config;
use crate::transport::reconnect::policy_from_config;
use crate::transport::{BackoffPolicy, ConnectionState, Connector, WsConnector};

pub struct SyncEngine {
    config: Arc<Config>,
    clipboard: Arc<dyn ClipboardProvider>,
    publisher: Arc<Publisher>,
    state: SharedState,
    connection: Arc<watch::Sender<ConnectionState>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SyncEngine {
    pub fn new(
        config: Arc<Config>,
        clipboard: Arc<dyn ClipboardProvider>,
    ) -> Result<Self, PublishError> {
        let publisher = Arc::new(Publisher::new(&config)?);
        let (shutdown_tx, _) = watch::channel(false);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        debug!("Using {} clipboard", clipboard.name());

        Ok(Self {
            config,
            clipboard,
            publisher,
            state: SharedState::new(),
            connection: Arc::new(connection),
            shutdown_tx,
        })
    }

    /// Validate `config` and build an engine on the system clipboard
    pub fn from_config(config: Config) -> crate::Result<Self> {
        config.validate()?;
        let clipboard: Arc<dyn ClipboardProvider> = Arc::new(ArboardClipboard::new()?);
        Ok(Self::new(Arc::new(config), clipboard)?)
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current state of the subscription's relay connection
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Follow the subscription's connection state
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Start the subscription against the configured relay
    pub fn spawn_subscription(&self) -> JoinHandle<LoopStats> {
        let connector = Arc::new(WsConnector::from_config(&self.config));
        self.spawn_subscription_with(connector, policy_from_config(&self.config.reconnect))
    }

    /// Start the subscription with an explicit connector and backoff policy
    pub fn spawn_subscription_with(
        &self,
        connector: Arc<dyn Connector>,
        backoff: Box<dyn BackoffPolicy>,
    ) -> JoinHandle<LoopStats> {
        let filter = DedupFilter::new(&self.config.client_name, self.state.clone());
        let subscription =
            SubscriptionLoop::new(connector, filter, Arc::clone(&self.clipboard), backoff)
                .with_state_sender(Arc::clone(&self.connection));
        tokio::spawn(subscription.run(self.shutdown_tx.subscribe()))
    }

    /// Publish the current clipboard
    pub async fn publish_clipboard(&self) -> Result<PublishOutcome, PublishError> {
        self.publisher.publish_from(self.clipboard.as_ref()).await
    }

    /// Hotkey callback: publish in the background, logging failures
    pub fn on_hotkey(&self) -> JoinHandle<()> {
        let publisher = Arc::clone(&self.publisher);
        let clipboard = Arc::clone(&self.clipboard);

        let connection = self.connection_state();
        if connection != ConnectionState::Connected {
            // the relay still stores the clip; only our echo check is affected
            debug!("Publishing while the subscription is {:?}", connection);
        }

        tokio::spawn(async move {
            match publisher.publish_from(clipboard.as_ref()).await {
                Ok(PublishOutcome::Skipped) => debug!("Hotkey pressed with empty clipboard"),
                Ok(PublishOutcome::Published(_)) => {}
                Err(e) => warn!("Publish failed: {}", e),
            }
        })
    }

    /// Signal the subscription to close its session and stop
    pub fn shutdown(&self) {
        // send_replace succeeds even with no receivers
        self.shutdown_tx.send_replace(true);
    }

    /// Run the subscription, publishing on every hotkey signal, until
    /// `shutdown` resolves
    pub async fn run<S>(&self, mut hotkeys: mpsc::Receiver<()>, shutdown: S) -> LoopStats
    where
        S: Future<Output = ()>,
    {
        let subscription = self.spawn_subscription();
        tokio::pin!(shutdown);

        info!(
            "Syncing topic {} on {} as {}",
            self.config.url_topic, self.config.url_base, self.config.client_name
        );

        loop {
            tokio::select! {
                signal = hotkeys.recv() => match signal {
                    Some(()) => {
                        self.on_hotkey();
                    }
                    None => {
                        warn!("Hotkey listener stopped; publishing is unavailable");
                        (&mut shutdown).await;
                        break;
                    }
                },
                _ = &mut shutdown => break,
            }
        }

        info!("Shutting down");
        self.shutdown();
        match subscription.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Subscription task failed: {}", e);
                LoopStats::default()
            }
        }
    }
}
