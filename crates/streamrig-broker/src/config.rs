//! Broker settings: packaged defaults, the caller merge, and typed access.

use std::path::{Path, PathBuf};
use std::time::Duration;

use streamrig::{HarnessError, Properties, effective_config, warn};

/// Used when `zookeeper.connect` is missing from the effective configuration.
pub const DEFAULT_ZOOKEEPER_CONNECT: &str = "127.0.0.1:2181";

const PACKAGED_DEFAULTS: &str = include_str!("../resources/broker-defaults.properties");

pub mod keys {
    pub const BROKER_ID: &str = "broker.id";
    pub const HOST_NAME: &str = "host.name";
    pub const PORT: &str = "port";
    pub const RACK: &str = "broker.rack";
    pub const ZOOKEEPER_CONNECT: &str = "zookeeper.connect";
    pub const ZOOKEEPER_SESSION_TIMEOUT_MS: &str = "zookeeper.session.timeout.ms";
    pub const ZOOKEEPER_CONNECTION_TIMEOUT_MS: &str = "zookeeper.connection.timeout.ms";
    pub const NUM_PARTITIONS: &str = "num.partitions";
    pub const DEFAULT_REPLICATION_FACTOR: &str = "default.replication.factor";
    pub const AUTO_CREATE_TOPICS_ENABLE: &str = "auto.create.topics.enable";
    pub const MESSAGE_MAX_BYTES: &str = "message.max.bytes";
    pub const TOPIC_SYNC_INTERVAL_MS: &str = "topic.sync.interval.ms";
    pub const LOG_DIRS: &str = "log.dirs";
}

/// The broker defaults shipped with this crate.
pub fn packaged_defaults() -> Result<Properties, HarnessError> {
    Properties::parse(PACKAGED_DEFAULTS)
}

/// `defaults`, then `overrides`, then `log.dirs` forced to `log_dir`.
pub fn effective_broker_config(
    defaults: &Properties,
    overrides: &Properties,
    log_dir: &Path,
) -> Properties {
    let forced = Properties::new().with(keys::LOG_DIRS, log_dir.display().to_string());
    effective_config(defaults, overrides, &forced)
}

/// Typed view of the effective broker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub broker_id: i32,
    pub host: String,
    pub port: u16,
    pub rack: Option<String>,
    zookeeper_connect: Option<String>,
    pub session_timeout: Duration,
    pub connection_timeout: Duration,
    pub num_partitions: i32,
    pub default_replication_factor: i32,
    pub auto_create_topics: bool,
    pub message_max_bytes: usize,
    pub topic_sync_interval: Duration,
    pub log_dir: PathBuf,
    properties: Properties,
}

impl BrokerConfig {
    /// Reads every recognized setting; a malformed value fails with
    /// `Configuration` naming the key.
    pub fn from_properties(properties: Properties) -> Result<Self, HarnessError> {
        let log_dir = properties
            .get(keys::LOG_DIRS)
            .map(PathBuf::from)
            .ok_or_else(|| HarnessError::invalid_setting(keys::LOG_DIRS, "missing"))?;

        let num_partitions = properties.get_parsed_or(keys::NUM_PARTITIONS, 1)?;
        if num_partitions < 1 {
            return Err(HarnessError::invalid_setting(keys::NUM_PARTITIONS, "must be at least 1"));
        }
        let default_replication_factor =
            properties.get_parsed_or(keys::DEFAULT_REPLICATION_FACTOR, 1)?;
        if default_replication_factor < 1 {
            return Err(HarnessError::invalid_setting(
                keys::DEFAULT_REPLICATION_FACTOR,
                "must be at least 1",
            ));
        }

        Ok(Self {
            broker_id: properties.get_parsed_or(keys::BROKER_ID, 0)?,
            host: properties.get_or(keys::HOST_NAME, streamrig::LOCALHOST).to_string(),
            port: properties.get_parsed_or(keys::PORT, 9092)?,
            rack: properties
                .get(keys::RACK)
                .filter(|rack| !rack.trim().is_empty())
                .map(str::to_string),
            zookeeper_connect: properties
                .get(keys::ZOOKEEPER_CONNECT)
                .filter(|connect| !connect.trim().is_empty())
                .map(str::to_string),
            session_timeout: Duration::from_millis(
                properties.get_parsed_or(keys::ZOOKEEPER_SESSION_TIMEOUT_MS, 10_000)?,
            ),
            connection_timeout: Duration::from_millis(
                properties.get_parsed_or(keys::ZOOKEEPER_CONNECTION_TIMEOUT_MS, 8_000)?,
            ),
            num_partitions,
            default_replication_factor,
            auto_create_topics: properties.get_parsed_or(keys::AUTO_CREATE_TOPICS_ENABLE, true)?,
            message_max_bytes: properties.get_parsed_or(keys::MESSAGE_MAX_BYTES, 1_048_576)?,
            topic_sync_interval: Duration::from_millis(
                properties.get_parsed_or(keys::TOPIC_SYNC_INTERVAL_MS, 100)?,
            ),
            log_dir,
            properties,
        })
    }

    /// `host:port`.
    pub fn broker_list(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Configured `zookeeper.connect`, or [`DEFAULT_ZOOKEEPER_CONNECT`].
    pub fn zookeeper_connect(&self) -> &str {
        match &self.zookeeper_connect {
            Some(connect) => connect,
            None => {
                warn!(
                    "{} is not set, falling back to {DEFAULT_ZOOKEEPER_CONNECT}",
                    keys::ZOOKEEPER_CONNECT
                );
                DEFAULT_ZOOKEEPER_CONNECT
            }
        }
    }

    /// Records the port actually bound when `port=0` was requested.
    pub fn set_bound_port(&mut self, port: u16) {
        self.port = port;
        self.properties.set(keys::PORT, port.to_string());
    }

    /// The effective configuration this view was read from.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}
