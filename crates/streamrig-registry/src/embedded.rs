//! A schema registry running inside the current process.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use streamrig::ports::reserve_port;
use streamrig::{
    AdminError, EmbeddedServiceConfig, HarnessError, LOCALHOST, Properties, ServiceHandle,
    ServiceState, ShutdownFailure, TopicSpec,
};
use streamrig_broker::{AdminSession, BrokerClient, BrokerError, RackAwareMode};
use streamrig_coordination::CoordinationClient;

use crate::api::{ApiState, router};
use crate::compatibility::CompatibilityLevel;
use crate::store::SchemaStore;
use crate::{debug, info, warn};

const SERVICE_NAME: &str = "schema-registry";

/// Storage topic used when the caller has no preference.
pub const DEFAULT_STORAGE_TOPIC: &str = "_schemas";

/// Keys of the settings the registry was constructed with.
pub mod keys {
    pub const LISTENERS: &str = "listeners";
    pub const KAFKASTORE_CONNECTION_URL: &str = "kafkastore.connection.url";
    pub const KAFKASTORE_TOPIC: &str = "kafkastore.topic";
    pub const COMPATIBILITY_LEVEL: &str = "schema.compatibility.level";
}

type ServeTask = JoinHandle<std::io::Result<()>>;

/// A REST schema registry that keeps its state in a compacted broker topic.
///
/// The storage topic is created by the registry on [`start`](Self::start) if it
/// does not exist yet, so the registry needs a running broker registered with the
/// same coordination service.
#[derive(Debug)]
pub struct RegistryEmbedded {
    handle: ServiceHandle,
    config: EmbeddedServiceConfig,
    storage_topic: String,
    compatibility_level: CompatibilityLevel,
    store: Option<Arc<SchemaStore>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    serve_task: Option<ServeTask>,
}

impl RegistryEmbedded {
    /// Records the settings. Nothing is contacted until `start`; port 0 binds an
    /// ephemeral port.
    pub fn new(
        port: u16,
        coordination_connect: &str,
        storage_topic: &str,
        compatibility_level: CompatibilityLevel,
    ) -> Result<Self, HarnessError> {
        if coordination_connect.trim().is_empty() {
            return Err(HarnessError::invalid_setting(
                keys::KAFKASTORE_CONNECTION_URL,
                "coordination connect string is empty",
            ));
        }
        streamrig_broker::admin::validate_topic_name(storage_topic)
            .map_err(|e| HarnessError::invalid_setting(keys::KAFKASTORE_TOPIC, e))?;
        if port != 0 {
            reserve_port(port);
        }

        let properties = Properties::new()
            .with(keys::LISTENERS, format!("http://{LOCALHOST}:{port}"))
            .with(keys::KAFKASTORE_CONNECTION_URL, coordination_connect)
            .with(keys::KAFKASTORE_TOPIC, storage_topic)
            .with(keys::COMPATIBILITY_LEVEL, compatibility_level.as_str());
        let config = EmbeddedServiceConfig::new(LOCALHOST, port)
            .with_connect_string(coordination_connect)
            .with_properties(properties);

        Ok(Self {
            handle: ServiceHandle::new(SERVICE_NAME, port, None),
            config,
            storage_topic: storage_topic.to_string(),
            compatibility_level,
            store: None,
            shutdown_tx: None,
            serve_task: None,
        })
    }

    /// Ensures the storage topic, replays it, and starts serving. Returns once the
    /// listener is bound.
    #[instrument(skip_all, fields(topic = %self.storage_topic))]
    pub async fn start(&mut self) -> Result<(), HarnessError> {
        self.handle.begin_start()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        match self.launch(shutdown_rx).await {
            Ok((store, serve_task)) => {
                self.store = Some(store);
                self.serve_task = Some(serve_task);
                self.shutdown_tx = Some(shutdown_tx);
                self.handle.mark_started();
                info!(
                    "Schema registry listening on {} (storage topic '{}')",
                    self.rest_connect(),
                    self.storage_topic
                );
                Ok(())
            }
            Err(e) => {
                self.handle.mark_failed();
                Err(e)
            }
        }
    }

    async fn launch(
        &mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(Arc<SchemaStore>, ServeTask), HarnessError> {
        let connect = self.coordination_connect().to_string();
        let coordination = CoordinationClient::connect(&connect).await?;
        let admin = AdminSession::from_client(coordination);

        let brokers = admin.brokers().await?;
        if brokers.is_empty() {
            return Err(HarnessError::Unavailable {
                service: SERVICE_NAME.to_string(),
                reason: format!("no broker is registered with the coordination service at {connect}"),
            });
        }
        let broker_list = brokers
            .iter()
            .map(|(_, registration)| registration.address())
            .collect::<Vec<_>>()
            .join(",");

        let spec = TopicSpec::new(&self.storage_topic)
            .partitions(1)
            .replication_factor(1)
            .config(Properties::new().with("cleanup.policy", "compact"));
        match admin.create_topic(&spec, RackAwareMode::Enforced).await {
            Ok(_) => debug!("Created storage topic '{}'", self.storage_topic),
            Err(BrokerError::Admin(AdminError::TopicAlreadyExists { .. })) => {
                debug!("Storage topic '{}' already exists", self.storage_topic)
            }
            Err(e) => return Err(e.into()),
        }
        admin.close();

        let client = BrokerClient::connect(&broker_list).await?;
        let store = Arc::new(SchemaStore::new(
            client,
            &self.storage_topic,
            self.compatibility_level,
        ));
        store.replay().await?;

        let addr = self.config.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| HarnessError::from_bind_error(e, &addr))?;
        let port = listener
            .local_addr()
            .map_err(|e| HarnessError::from_bind_error(e, &addr))?
            .port();
        if port != self.config.port {
            self.config.port = port;
            self.config
                .properties
                .set(keys::LISTENERS, format!("http://{LOCALHOST}:{port}"));
            self.handle.set_port(port);
            reserve_port(port);
        }

        let app = router(ApiState {
            store: Arc::clone(&store),
        })
        .layer(TraceLayer::new_for_http());
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
        });

        Ok((store, serve_task))
    }

    /// Stops serving and waits for in-flight requests. The storage topic is left
    /// to the broker.
    #[instrument(skip_all, fields(topic = %self.storage_topic))]
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
        self.store = None;

        if failures.is_empty() {
            info!("Schema registry stopped");
        } else {
            warn!("Schema registry stopped with {} failure(s)", failures.len());
        }
        HarnessError::from_shutdown_failures(failures)
    }

    /// `http://host:port`.
    pub fn rest_connect(&self) -> String {
        format!("http://{}", self.config.address())
    }

    pub fn coordination_connect(&self) -> &str {
        self.config.connect_string.as_deref().unwrap_or_default()
    }

    pub fn storage_topic(&self) -> &str {
        &self.storage_topic
    }

    pub fn compatibility_level(&self) -> CompatibilityLevel {
        self.compatibility_level
    }

    pub fn port(&self) -> u16 {
        self.handle.port()
    }

    pub fn state(&self) -> ServiceState {
        self.handle.state()
    }

    pub fn properties(&self) -> &Properties {
        &self.config.properties
    }

    /// The schema store behind the REST API, if started.
    pub fn store(&self) -> Option<&Arc<SchemaStore>> {
        self.store.as_ref()
    }
}

impl Drop for RegistryEmbedded {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
    }
}
