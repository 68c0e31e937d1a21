//! A client paired with the serializer used for its string entries.

use std::sync::Arc;
use std::time::Duration;

use crate::client::{CoordinationClient, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_SESSION_TIMEOUT};
use crate::error::CoordinationError;
use crate::serializer::{EntryFormat, EntrySerializer};
use crate::store::Stat;
use crate::{ANY_VERSION, debug};

#[derive(Debug, Clone)]
pub struct CoordinationSession {
    client: CoordinationClient,
    serializer: Arc<dyn EntrySerializer>,
}

impl CoordinationSession {
    pub async fn open(
        connect_string: &str,
        serializer: Arc<dyn EntrySerializer>,
    ) -> Result<Self, CoordinationError> {
        Self::open_with_timeouts(
            connect_string,
            DEFAULT_SESSION_TIMEOUT,
            DEFAULT_CONNECTION_TIMEOUT,
            serializer,
        )
        .await
    }

    pub async fn open_with_timeouts(
        connect_string: &str,
        session_timeout: Duration,
        connection_timeout: Duration,
        serializer: Arc<dyn EntrySerializer>,
    ) -> Result<Self, CoordinationError> {
        let client =
            CoordinationClient::connect_with_timeouts(connect_string, connection_timeout, session_timeout)
                .await?;
        debug!(
            "Opened coordination session to {connect_string} ({} entries)",
            serializer.format()
        );
        Ok(Self { client, serializer })
    }

    pub fn from_client(client: CoordinationClient, serializer: Arc<dyn EntrySerializer>) -> Self {
        Self { client, serializer }
    }

    pub fn format(&self) -> EntryFormat {
        self.serializer.format()
    }

    pub fn client(&self) -> &CoordinationClient {
        &self.client
    }

    /// Creates `path` holding `value`, creating missing parents.
    pub async fn write(&self, path: &str, value: &str) -> Result<(), CoordinationError> {
        self.client
            .create(path, self.serializer.serialize(value), true)
            .await
            .map(|_| ())
    }

    /// Creates or overwrites `path`.
    pub async fn upsert(&self, path: &str, value: &str) -> Result<(), CoordinationError> {
        match self.write(path, value).await {
            Err(e) if e.is_node_exists() => self
                .client
                .set_data(path, self.serializer.serialize(value), ANY_VERSION)
                .await
                .map(|_| ()),
            other => other,
        }
    }

    pub async fn read(&self, path: &str) -> Result<String, CoordinationError> {
        let (data, _) = self.client.get_data(path).await?;
        self.serializer.deserialize(&data)
    }

    pub async fn read_with_stat(&self, path: &str) -> Result<(String, Stat), CoordinationError> {
        let (data, stat) = self.client.get_data(path).await?;
        Ok((self.serializer.deserialize(&data)?, stat))
    }

    pub async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        Ok(self.client.exists(path).await?.is_some())
    }

    pub async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        self.client.get_children_or_empty(path).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), CoordinationError> {
        self.client.delete(path, ANY_VERSION).await
    }

    /// Ends the session. The channel closes once every clone is dropped.
    pub fn close(self) {
        debug!("Closed coordination session to {}", self.client.connect_string());
    }
}
