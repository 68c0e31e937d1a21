//! A single broker running inside the current process.

use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use streamrig::ports::reserve_port;
use streamrig::types::{BrokerRegistration, ClusterIdEntry, paths};
use streamrig::{
    HarnessError, Properties, ScratchDir, ServiceHandle, ServiceState, ShutdownFailure, TopicSpec,
};
use streamrig_coordination::{ANY_VERSION, CoordinationClient, StringSerializer};
use streamrig_proto::BrokerGrpcServer;

use crate::admin::{AdminSession, RackAwareMode};
use crate::client::BrokerClient;
use crate::config::{BrokerConfig, effective_broker_config, keys, packaged_defaults};
use crate::error::BrokerError;
use crate::server::BrokerServer;
use crate::service::BrokerService;
use crate::topics::{TopicRegistry, spawn_sync_task};
use crate::{debug, info, warn};

const SERVICE_NAME: &str = "broker";
const LOG_DIR_PREFIX: &str = "kafka-embedded-logs-dir-";

type ServeTask = JoinHandle<Result<(), tonic::transport::Error>>;

struct Running {
    service: Arc<BrokerService>,
    coordination: CoordinationClient,
    serve_task: ServeTask,
    sync_task: JoinHandle<()>,
}

/// A broker with its own log directory, registered with a coordination service.
///
/// The effective configuration is the packaged defaults, overridden by the
/// caller's properties, with `log.dirs` always pointing at a fresh directory that
/// is deleted on [`stop`](Self::stop).
#[derive(Debug)]
pub struct BrokerEmbedded {
    handle: ServiceHandle,
    config: BrokerConfig,
    service: Option<Arc<BrokerService>>,
    coordination: Option<CoordinationClient>,
    shutdown_tx: Option<watch::Sender<bool>>,
    serve_task: Option<ServeTask>,
    sync_task: Option<JoinHandle<()>>,
}

impl BrokerEmbedded {
    /// Resolves the configuration and creates the log directory. Nothing is
    /// started.
    pub fn new(overrides: &Properties) -> Result<Self, HarnessError> {
        let scratch = ScratchDir::create(LOG_DIR_PREFIX)?;
        let defaults = packaged_defaults()?;
        let config = BrokerConfig::from_properties(effective_broker_config(
            &defaults,
            overrides,
            scratch.path(),
        ))?;
        if config.port != 0 {
            reserve_port(config.port);
        }

        debug!(
            "Prepared broker {} for {} (log dir {})",
            config.broker_id,
            config.broker_list(),
            scratch.path().display()
        );

        Ok(Self {
            handle: ServiceHandle::new(SERVICE_NAME, config.port, Some(scratch)),
            config,
            service: None,
            coordination: None,
            shutdown_tx: None,
            serve_task: None,
            sync_task: None,
        })
    }

    /// Registers with the coordination service and begins serving. Returns once the
    /// listener is bound, so `broker_list()` accepts connections immediately.
    #[instrument(skip_all, fields(broker_id = self.config.broker_id))]
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        self.handle.begin_start()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        match self.launch(shutdown_rx).await {
            Ok(running) => {
                self.service = Some(running.service);
                self.coordination = Some(running.coordination);
                self.serve_task = Some(running.serve_task);
                self.sync_task = Some(running.sync_task);
                self.shutdown_tx = Some(shutdown_tx);
                self.handle.mark_started();
                info!(
                    "Broker {} listening on {} (coordination {})",
                    self.config.broker_id,
                    self.broker_list(),
                    self.zookeeper_connect()
                );
                Ok(())
            }
            Err(e) => {
                self.handle.mark_failed();
                if let Err(failure) = self.handle.release_storage() {
                    warn!("Failed to remove log dir after failed start: {failure:?}");
                }
                Err(e)
            }
        }
    }

    async fn launch(&mut self, shutdown_rx: watch::Receiver<bool>) -> Result<Running, HarnessError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HarnessError::from_bind_error(e, &addr))?;
        let port = listener
            .local_addr()
            .map_err(|e| HarnessError::from_bind_error(e, &addr))?
            .port();
        if port != self.config.port {
            self.config.set_bound_port(port);
            self.handle.set_port(port);
            reserve_port(port);
        }

        let connect = self.config.zookeeper_connect().to_string();
        let coordination = CoordinationClient::connect_with_timeouts(
            &connect,
            self.config.connection_timeout,
            self.config.session_timeout,
        )
        .await?;

        for path in [paths::BROKER_IDS, paths::BROKER_TOPICS, paths::CONFIG_TOPICS] {
            ensure_path(&coordination, path).await?;
        }
        let cluster_id = ensure_cluster_id(&coordination).await?;

        let registry = Arc::new(TopicRegistry::new(&self.config.log_dir));
        let recovered = registry.sync_all(&coordination).await?;
        if recovered > 0 {
            debug!("Serving {recovered} topic(s) already registered");
        }

        self.register(&coordination).await?;

        let service = Arc::new(BrokerService::new(
            self.config.clone(),
            Arc::clone(&registry),
            coordination.clone(),
            cluster_id,
        ));

        let mut server_shutdown = shutdown_rx.clone();
        let server = BrokerServer::new(Arc::clone(&service));
        let serve_task = tokio::spawn(async move {
            Server::builder()
                .layer(TraceLayer::new_for_http())
                .add_service(BrokerGrpcServer::new(server))
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    let _ = server_shutdown.changed().await;
                })
                .await
        });
        let sync_task = spawn_sync_task(
            registry,
            coordination.clone(),
            self.config.topic_sync_interval,
            shutdown_rx,
        );

        Ok(Running {
            service,
            coordination,
            serve_task,
            sync_task,
        })
    }

    async fn register(&self, coordination: &CoordinationClient) -> Result<(), HarnessError> {
        let registration = BrokerRegistration::new(
            &self.config.host,
            self.config.port,
            self.config.rack.clone(),
        );
        let data = serde_json::to_vec(&registration)
            .map_err(|e| BrokerError::from_serialization_error(e, "encode broker registration"))?;
        match coordination
            .create(&paths::broker(self.config.broker_id), data, true)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_node_exists() => Err(HarnessError::invalid_setting(
                keys::BROKER_ID,
                format!(
                    "broker {} is already registered with the coordination service",
                    self.config.broker_id
                ),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Stops serving, waits for owned tasks, deregisters, and deletes the log
    /// directory. Every failed step is reported; none stops the others.
    #[instrument(skip_all, fields(broker_id = self.config.broker_id))]
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        self.handle.begin_stop()?;
        let mut failures = Vec::new();

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.serve_task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failures.push(ShutdownFailure::new(SERVICE_NAME, "serve", e)),
                Err(e) => failures.push(ShutdownFailure::new(SERVICE_NAME, "join server task", e)),
            }
        }
        if let Some(task) = self.sync_task.take() {
            if let Err(e) = task.await {
                failures.push(ShutdownFailure::new(SERVICE_NAME, "join topic sync task", e));
            }
        }

        if let Some(coordination) = self.coordination.take() {
            match coordination
                .delete(&paths::broker(self.config.broker_id), ANY_VERSION)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_no_node() => {}
                Err(e) => failures.push(ShutdownFailure::new(SERVICE_NAME, "deregister", e)),
            }
        }

        // Partition logs hold open segment files until the service is dropped.
        self.service = None;
        if let Err(failure) = self.handle.release_storage() {
            failures.push(failure);
        }

        if failures.is_empty() {
            info!("Broker {} stopped", self.config.broker_id);
        } else {
            warn!(
                "Broker {} stopped with {} failure(s)",
                self.config.broker_id,
                failures.len()
            );
        }
        HarnessError::from_shutdown_failures(failures)
    }

    /// Creates a topic with one partition, replication factor one, and no config.
    pub async fn create_topic(&self, topic: &str) -> Result<(), HarnessError> {
        self.create_topic_spec(&TopicSpec::new(topic)).await
    }

    pub async fn create_topic_with(
        &self,
        topic: &str,
        partitions: i32,
        replication_factor: i32,
    ) -> Result<(), HarnessError> {
        self.create_topic_spec(
            &TopicSpec::new(topic)
                .partitions(partitions)
                .replication_factor(replication_factor),
        )
        .await
    }

    pub async fn create_topic_with_config(
        &self,
        topic: &str,
        partitions: i32,
        replication_factor: i32,
        topic_config: Properties,
    ) -> Result<(), HarnessError> {
        self.create_topic_spec(
            &TopicSpec::new(topic)
                .partitions(partitions)
                .replication_factor(replication_factor)
                .config(topic_config),
        )
        .await
    }

    /// Opens a short-lived admin session, creates the topic with enforced rack-aware
    /// placement, and closes the session. Not idempotent.
    #[instrument(skip(self, spec), fields(topic = %spec.name))]
    pub async fn create_topic_spec(&self, spec: &TopicSpec) -> Result<(), HarnessError> {
        let admin = AdminSession::open_with_timeouts(
            self.config.zookeeper_connect(),
            self.config.session_timeout,
            self.config.connection_timeout,
            Arc::new(StringSerializer),
        )
        .await?;
        let created = admin.create_topic(spec, RackAwareMode::Enforced).await;
        admin.close();
        created?;

        if let Some(service) = &self.service {
            service.ensure_topic(&spec.name, false).await?;
        }
        Ok(())
    }

    /// Connects a client to this broker.
    pub async fn client(&self) -> Result<BrokerClient, HarnessError> {
        Ok(BrokerClient::connect(&self.broker_list()).await?)
    }

    /// `host:port` from the effective configuration.
    pub fn broker_list(&self) -> String {
        self.config.broker_list()
    }

    /// `zookeeper.connect`, or `127.0.0.1:2181` when it was never configured.
    pub fn zookeeper_connect(&self) -> String {
        self.config.zookeeper_connect().to_string()
    }

    /// The forced `log.dirs` value. The directory no longer exists once stopped.
    pub fn log_dir(&self) -> &Path {
        &self.config.log_dir
    }

    pub fn port(&self) -> u16 {
        self.handle.port()
    }

    pub fn state(&self) -> ServiceState {
        self.handle.state()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Effective configuration as properties.
    pub fn properties(&self) -> &Properties {
        self.config.properties()
    }

    /// The running request handler, if started.
    pub fn service(&self) -> Option<&Arc<BrokerService>> {
        self.service.as_ref()
    }
}

impl Drop for BrokerEmbedded {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }
}

async fn ensure_path(client: &CoordinationClient, path: &str) -> Result<(), HarnessError> {
    match client.create(path, Vec::new(), true).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_node_exists() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reads `/cluster/id`, creating it on first use.
async fn ensure_cluster_id(client: &CoordinationClient) -> Result<String, HarnessError> {
    let entry = ClusterIdEntry {
        version: "1".to_string(),
        id: uuid::Uuid::new_v4().simple().to_string(),
    };
    let data = serde_json::to_vec(&entry)
        .map_err(|e| BrokerError::from_serialization_error(e, "encode cluster id"))?;
    match client.create(paths::CLUSTER_ID, data, true).await {
        Ok(_) => {
            info!("Created cluster id {}", entry.id);
            Ok(entry.id)
        }
        Err(e) if e.is_node_exists() => {
            let (raw, _) = client.get_data(paths::CLUSTER_ID).await?;
            let existing: ClusterIdEntry = serde_json::from_slice(&raw)
                .map_err(|e| BrokerError::from_serialization_error(e, "decode cluster id"))?;
            Ok(existing.id)
        }
        Err(e) => Err(e.into()),
    }
}
