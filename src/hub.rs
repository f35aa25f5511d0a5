//! Hub assembly and lifecycle
//!
//! A [`Hub`] owns everything that outlives a single connection: the channel
//! registry, the robot control links, the ingest adapter, the work queues
//! and the background tasks that drain them. Connections only ever see it through an `Arc<Hub>`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::control::ControlRegistry;
use crate::error::{CommandError, Result};
use crate::inference::{HttpInferenceClient, InferenceClient, InferenceConfig, InferenceWorker};
use crate::ingest::IngestAdapter;
use crate::payload::RobotId;
use crate::persistence::{HistoryStore, PersistenceConfig, PersistenceWorker, SqliteHistoryStore};
use crate::queue::{history_queue, HistoryReceiver, LatestQueue, QueueConfig, QueueItem};
use crate::registry::{ChannelRegistry, RegistryConfig};
use crate::server::ServerConfig;
use crate::stats::HubStats;
use crate::supervisor::{spawn_supervised, DEFAULT_RESTART_DELAY};

/// Complete hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub queue: QueueConfig,
    pub inference: InferenceConfig,
    pub persistence: PersistenceConfig,

    /// How often hub statistics are logged (zero disables)
    pub stats_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            registry: RegistryConfig::default(),
            queue: QueueConfig::default(),
            inference: InferenceConfig::default(),
            persistence: PersistenceConfig::default(),
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl HubConfig {
    /// Build a configuration from `ROBOT_HUB_*` environment variables
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = parse_var::<SocketAddr, _>(&lookup, "ROBOT_HUB_BIND") {
            config.server = config.server.bind(addr);
        }
        if let Some(url) = lookup("ROBOT_HUB_INFERENCE_URL").filter(|url| !url.is_empty()) {
            config.inference = config.inference.endpoint(url);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "ROBOT_HUB_INFERENCE_TIMEOUT_MS") {
            config.inference = config.inference.timeout(Duration::from_millis(ms));
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "ROBOT_HUB_HISTORY_CAPACITY") {
            config.queue = config.queue.history_capacity(capacity);
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, "ROBOT_HUB_PERSISTENCE_WORKERS") {
            config.queue = config.queue.persistence_workers(workers);
        }
        if let Some(path) = lookup("ROBOT_HUB_DATABASE").filter(|path| !path.is_empty()) {
            config.persistence = config.persistence.database(PathBuf::from(path));
        }

        config
    }

    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    pub fn queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    pub fn persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    /// Set the statistics logging interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(variable = name, value = %raw, error = %e, "Ignoring invalid setting");
            None
        }
    }
}

/// Builder for a [`Hub`]
///
/// Inference and persistence backends default to the HTTP client and the
/// SQLite store named in the configuration; either can be replaced.
pub struct HubBuilder {
    config: HubConfig,
    inference_client: Option<Arc<dyn InferenceClient>>,
    history_store: Option<Arc<dyn HistoryStore>>,
}

impl HubBuilder {
    /// Use a custom inference backend (enables the inference worker)
    pub fn inference_client(mut self, client: Arc<dyn InferenceClient>) -> Self {
        self.inference_client = Some(client);
        self
    }

    /// Use a custom history store (enables the persistence workers)
    pub fn history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    /// Create the hub and spawn its background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<Arc<Hub>> {
        let HubBuilder {
            config,
            inference_client,
            history_store,
        } = self;

        let stats = Arc::new(HubStats::new());
        let registry = Arc::new(ChannelRegistry::with_config(config.registry.clone()));
        let control = Arc::new(ControlRegistry::new(config.registry.delivery_timeout));
        let mut ingest = IngestAdapter::new(Arc::clone(&registry), Arc::clone(&stats));
        let mut workers = Vec::new();
        let mut background = Vec::new();

        let inference_client = match (inference_client, &config.inference.endpoint) {
            (Some(client), _) => Some(client),
            (None, Some(url)) => {
                let client: Arc<dyn InferenceClient> =
                    Arc::new(HttpInferenceClient::new(url.as_str(), &config.inference)?);
                Some(client)
            }
            (None, None) => None,
        };

        let inference_queue = match inference_client {
            Some(client) => {
                let queue = Arc::new(LatestQueue::new());
                let worker = Arc::new(InferenceWorker::new(
                    Arc::clone(&queue),
                    client,
                    Arc::clone(&registry),
                    Arc::clone(&stats),
                    config.inference.timeout,
                ));
                workers.push(spawn_supervised("inference", DEFAULT_RESTART_DELAY, move || {
                    let worker = Arc::clone(&worker);
                    async move { worker.run().await }
                }));
                ingest = ingest.with_inference(Arc::clone(&queue));
                Some(queue)
            }
            None => {
                tracing::info!("No inference service configured, frames are relayed only");
                None
            }
        };

        let history_store = match (history_store, &config.persistence.database) {
            (Some(store), _) => Some(store),
            (None, Some(path)) => {
                let store: Arc<dyn HistoryStore> = Arc::new(SqliteHistoryStore::open(path)?);
                tracing::info!(database = %path.display(), "History database opened");
                Some(store)
            }
            (None, None) => None,
        };

        let history_receiver = match history_store {
            Some(store) => {
                let (queue, receiver) = history_queue(config.queue.history_capacity);
                for id in 0..config.queue.persistence_workers {
                    let worker = Arc::new(PersistenceWorker::new(
                        id,
                        receiver.clone(),
                        Arc::clone(&store),
                        Arc::clone(&stats),
                    ));
                    workers.push(spawn_supervised(
                        format!("persistence-{id}"),
                        DEFAULT_RESTART_DELAY,
                        move || {
                            let worker = Arc::clone(&worker);
                            async move { worker.run().await }
                        },
                    ));
                }
                ingest = ingest.with_history(queue);
                Some(receiver)
            }
            None => {
                tracing::info!("No history store configured, telemetry is not persisted");
                None
            }
        };

        background.push(registry.spawn_reaper());
        if !config.stats_interval.is_zero() {
            background.push(stats.spawn_logger(config.stats_interval));
        }

        let persistence_workers = if history_receiver.is_some() {
            config.queue.persistence_workers
        } else {
            0
        };
        tracing::info!(
            inference = inference_queue.is_some(),
            persistence_workers = persistence_workers,
            "Hub started"
        );

        Ok(Arc::new(Hub {
            config,
            registry,
            control,
            ingest: Arc::new(ingest),
            stats,
            inference_queue,
            history_receiver,
            workers: Mutex::new(workers),
            background: Mutex::new(background),
        }))
    }
}

/// The running hub
pub struct Hub {
    config: HubConfig,
    registry: Arc<ChannelRegistry>,
    control: Arc<ControlRegistry>,
    ingest: Arc<IngestAdapter>,
    stats: Arc<HubStats>,
    inference_queue: Option<Arc<LatestQueue<QueueItem>>>,
    history_receiver: Option<HistoryReceiver<QueueItem>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Hub {
    /// Start configuring a hub
    pub fn builder(config: HubConfig) -> HubBuilder {
        HubBuilder {
            config,
            inference_client: None,
            history_store: None,
        }
    }

    /// Create a hub with default backends for `config`
    pub fn start(config: HubConfig) -> Result<Arc<Hub>> {
        Self::builder(config).start()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Get a reference to the channel registry
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Robot control links
    pub fn control(&self) -> &Arc<ControlRegistry> {
        &self.control
    }

    /// Push a JSON command to a robot over its control link
    pub async fn send_command(
        &self,
        robot: &RobotId,
        command: &Value,
    ) -> std::result::Result<(), CommandError> {
        let result = self.control.send_command(robot, command).await;
        match &result {
            Ok(()) => HubStats::incr(&self.stats.commands_sent),
            Err(_) => HubStats::incr(&self.stats.commands_failed),
        }
        result
    }

    pub fn ingest(&self) -> &Arc<IngestAdapter> {
        &self.ingest
    }

    pub fn stats(&self) -> &Arc<HubStats> {
        &self.stats
    }

    /// Whether camera frames are sent for inference
    pub fn has_inference(&self) -> bool {
        self.inference_queue.is_some()
    }

    /// Whether telemetry is persisted
    pub fn has_persistence(&self) -> bool {
        self.history_receiver.is_some()
    }

    /// Stop the hub
    ///
    /// Closes both work queues, waits for the workers to drain what was
    /// already queued, then stops the reaper and the stats logger. Ingest
    /// after shutdown still broadcasts but no longer reaches the workers.
    pub async fn shutdown(&self) {
        if let Some(queue) = &self.inference_queue {
            queue.close();
        }
        if let Some(receiver) = &self.history_receiver {
            receiver.close();
        }

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed during shutdown");
            }
        }

        let background = std::mem::take(
            &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in background {
            handle.abort();
        }

        let s = self.stats.snapshot();
        tracing::info!(
            telemetry = s.telemetry_received,
            frames = s.frames_received,
            persisted = s.history_persisted,
            "Hub stopped"
        );
    }
}
