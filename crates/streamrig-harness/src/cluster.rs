//! Start-up and shutdown of the three services in dependency order.

use streamrig::{
    HarnessError, Properties, ServiceHandle, ServiceState, ShutdownFailure, TopicSpec,
    allocate_port,
};
use streamrig_broker::BrokerEmbedded;
use streamrig_broker::config::keys;
use streamrig_coordination::CoordinationServiceEmbedded;
use streamrig_registry::{CompatibilityLevel, RegistryEmbedded};
use tracing::instrument;

use crate::{info, warn};

/// Storage topic of the harness's schema registry.
pub const SCHEMA_REGISTRY_TOPIC: &str = "_schemas";

pub const SCHEMA_REGISTRY_COMPATIBILITY: CompatibilityLevel = CompatibilityLevel::None;

const HARNESS_NAME: &str = "cluster";

/// A port allocated up front can be taken by another process before the service
/// binds it; the whole construction is retried once when that happens.
const START_ATTEMPTS: usize = 2;

/// Coordination service, broker, and schema registry running in this process.
///
/// Services start in dependency order and stop in reverse. A failed start stops
/// whatever had already started before the error is returned.
#[derive(Debug)]
pub struct ClusterHarness {
    handle: ServiceHandle,
    coordination: CoordinationServiceEmbedded,
    broker: BrokerEmbedded,
    registry: RegistryEmbedded,
}

/// Broker overrides for a cluster: the coordination connect string and `port`,
/// with `overrides` applied last so the caller wins for every key.
pub fn broker_overrides(coordination_connect: &str, port: u16, overrides: &Properties) -> Properties {
    let mut effective = Properties::new()
        .with(keys::ZOOKEEPER_CONNECT, coordination_connect)
        .with(keys::PORT, port.to_string());
    effective.extend_from(overrides);
    effective
}

impl ClusterHarness {
    pub async fn start() -> Result<Self, HarnessError> {
        Self::start_with(&Properties::new()).await
    }

    /// Starts a cluster whose broker is configured with `broker_overrides` on top
    /// of the generated settings.
    #[instrument(skip_all)]
    pub async fn start_with(broker_overrides: &Properties) -> Result<Self, HarnessError> {
        let mut attempt = 1;
        loop {
            match Self::try_start(broker_overrides).await {
                Ok(harness) => return Ok(harness),
                Err(e) if e.is_port_bind() && attempt < START_ATTEMPTS => {
                    warn!("Cluster start lost a port race, retrying: {e}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_start(overrides: &Properties) -> Result<Self, HarnessError> {
        let mut coordination = CoordinationServiceEmbedded::new(allocate_port()?)?;
        let registry_port = allocate_port()?;
        coordination.start().await?;

        let mut broker = start_broker_or_roll_back(&mut coordination, overrides).await?;
        let registry =
            start_registry_or_roll_back(&mut broker, &mut coordination, registry_port).await?;

        let mut handle = ServiceHandle::new(HARNESS_NAME, broker.port(), None);
        handle.mark_started();
        info!(
            "Cluster started: bootstrap servers {}, coordination {}, schema registry {}",
            broker.broker_list(),
            coordination.connect_string(),
            registry.rest_connect()
        );
        Ok(Self {
            handle,
            coordination,
            broker,
            registry,
        })
    }

    /// Stops the registry, the broker, then the coordination service. Each is
    /// stopped even when an earlier one failed; all failures are reported together.
    #[instrument(skip_all)]
    pub async fn stop(&mut self) -> Result<(), HarnessError> {
        self.handle.begin_stop()?;
        let mut failures = Vec::new();

        collect_failures(&mut failures, "schema-registry", self.registry.stop().await);
        collect_failures(&mut failures, "broker", self.broker.stop().await);
        collect_failures(
            &mut failures,
            "coordination",
            self.coordination.stop().await,
        );

        if failures.is_empty() {
            info!("Cluster stopped");
        } else {
            warn!("Cluster stopped with {} failure(s)", failures.len());
        }
        HarnessError::from_shutdown_failures(failures)
    }

    /// `host:port` of the broker.
    pub fn bootstrap_servers(&self) -> String {
        self.broker.broker_list()
    }

    pub fn zookeeper_connect(&self) -> String {
        self.coordination.connect_string()
    }

    pub fn schema_registry_url(&self) -> String {
        self.registry.rest_connect()
    }

    pub async fn create_topic(&self, topic: &str) -> Result<(), HarnessError> {
        self.broker.create_topic(topic).await
    }

    pub async fn create_topic_with(
        &self,
        topic: &str,
        partitions: i32,
        replication_factor: i32,
    ) -> Result<(), HarnessError> {
        self.broker
            .create_topic_with(topic, partitions, replication_factor)
            .await
    }

    pub async fn create_topic_with_config(
        &self,
        topic: &str,
        partitions: i32,
        replication_factor: i32,
        topic_config: Properties,
    ) -> Result<(), HarnessError> {
        self.broker
            .create_topic_with_config(topic, partitions, replication_factor, topic_config)
            .await
    }

    pub async fn create_topic_spec(&self, spec: &TopicSpec) -> Result<(), HarnessError> {
        self.broker.create_topic_spec(spec).await
    }

    pub fn state(&self) -> ServiceState {
        self.handle.state()
    }

    pub fn coordination(&self) -> &CoordinationServiceEmbedded {
        &self.coordination
    }

    pub fn broker(&self) -> &BrokerEmbedded {
        &self.broker
    }

    pub fn registry(&self) -> &RegistryEmbedded {
        &self.registry
    }
}

/// Starts the broker against a running coordination service, stopping the
/// coordination service again when the broker cannot be started.
async fn start_broker_or_roll_back(
    coordination: &mut CoordinationServiceEmbedded,
    overrides: &Properties,
) -> Result<BrokerEmbedded, HarnessError> {
    match start_broker(&coordination.connect_string(), overrides).await {
        Ok(broker) => Ok(broker),
        Err(e) => {
            roll_back(None, coordination).await;
            Err(e)
        }
    }
}

async fn start_registry_or_roll_back(
    broker: &mut BrokerEmbedded,
    coordination: &mut CoordinationServiceEmbedded,
    port: u16,
) -> Result<RegistryEmbedded, HarnessError> {
    match start_registry(&coordination.connect_string(), port).await {
        Ok(registry) => Ok(registry),
        Err(e) => {
            roll_back(Some(broker), coordination).await;
            Err(e)
        }
    }
}

async fn start_broker(connect: &str, overrides: &Properties) -> Result<BrokerEmbedded, HarnessError> {
    let config = broker_overrides(connect, allocate_port()?, overrides);
    let mut broker = BrokerEmbedded::new(&config)?;
    broker.start().await?;
    Ok(broker)
}

async fn start_registry(connect: &str, port: u16) -> Result<RegistryEmbedded, HarnessError> {
    let mut registry = RegistryEmbedded::new(
        port,
        connect,
        SCHEMA_REGISTRY_TOPIC,
        SCHEMA_REGISTRY_COMPATIBILITY,
    )?;
    registry.start().await?;
    Ok(registry)
}

/// Stops already started services after a failed start, newest first. Failures
/// are logged; the start error is what the caller sees.
async fn roll_back(broker: Option<&mut BrokerEmbedded>, coordination: &mut CoordinationServiceEmbedded) {
    if let Some(broker) = broker {
        if let Err(e) = broker.stop().await {
            warn!("Rollback could not stop the broker: {e}");
        }
    }
    if let Err(e) = coordination.stop().await {
        warn!("Rollback could not stop the coordination service: {e}");
    }
}

fn collect_failures(
    failures: &mut Vec<ShutdownFailure>,
    service: &str,
    result: Result<(), HarnessError>,
) {
    match result {
        Ok(()) => {}
        Err(HarnessError::Shutdown { failures: inner }) => failures.extend(inner),
        Err(e) => failures.push(ShutdownFailure::new(service, "stop", e)),
    }
}
