//! Remote state gateway
//!
//! The control API of the managed cluster, seen through the operations the
//! reconcilers need. Implementations own transport, authentication and any
//! retry policy; the core only sees point-in-time snapshots and a three-way
//! failure classification.

use crate::config::GatewayConfig;
use crate::error::OperatorError;
use crate::model::{ResourcePattern, ResourceScope, Role};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::warn;

/// Failure classification reported by gateway implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The addressed resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The call failed but may succeed if repeated
    #[error("transient failure: {0}")]
    Transient(String),

    /// The call failed and repeating it will not help
    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// Result type for gateway calls
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

impl From<GatewayError> for OperatorError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(name) => OperatorError::NotFound {
                kind: "resource".to_string(),
                name,
            },
            GatewayError::Transient(msg) => OperatorError::TransientGateway(msg),
            GatewayError::Fatal(msg) => OperatorError::Gateway(msg),
        }
    }
}

/// Topic as described by the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDescription {
    pub name: String,
    pub replication_factor: i16,
    pub config: BTreeMap<String, String>,
}

/// Placement of one topic partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    /// Partition id
    pub partition: i32,
    /// Leader broker id
    pub leader: i32,
    /// Replica broker ids
    pub replicas: Vec<i32>,
    /// In-sync replica broker ids
    pub isr: Vec<i32>,
}

/// Parameters of a topic creation call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTopicRequest {
    pub name: String,
    pub partitions: i32,
    /// 0 leaves replica placement to the cluster
    pub replication_factor: i16,
    pub config: BTreeMap<String, String>,
}

/// Operations against the cluster control API
///
/// `bind`/`unbind` must tolerate repetition of a call that already succeeded;
/// how that is achieved is up to the implementation.
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// Resource patterns bound to `principal` with `role` in `scope`
    ///
    /// An empty result means no binding exists.
    async fn lookup_binding(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
    ) -> GatewayResult<Vec<ResourcePattern>>;

    async fn bind(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
        pattern: Option<&ResourcePattern>,
    ) -> GatewayResult<()>;

    async fn unbind(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
        pattern: Option<&ResourcePattern>,
    ) -> GatewayResult<()>;

    async fn get_topic(&self, cluster_id: &str, name: &str) -> GatewayResult<TopicDescription>;

    async fn create_topic(
        &self,
        cluster_id: &str,
        request: &CreateTopicRequest,
    ) -> GatewayResult<()>;

    async fn update_replication_factor(
        &self,
        cluster_id: &str,
        name: &str,
        replication_factor: i16,
    ) -> GatewayResult<()>;

    async fn update_partitions(
        &self,
        cluster_id: &str,
        name: &str,
        partitions: i32,
    ) -> GatewayResult<()>;

    /// Replace the topic config overrides in one call
    async fn update_config(
        &self,
        cluster_id: &str,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> GatewayResult<()>;

    async fn delete_topic(&self, cluster_id: &str, name: &str) -> GatewayResult<()>;

    /// Whether a replica reassignment is still in flight for the topic
    async fn is_replication_factor_updating(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> GatewayResult<bool>;

    async fn list_partitions(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> GatewayResult<Vec<PartitionInfo>>;
}

/// Gateway wrapper bounding every call with the configured operation timeout
///
/// An expired call is reported as [`GatewayError::Transient`].
pub struct TimedGateway<G> {
    inner: G,
    operation_timeout: Duration,
}

impl<G: ClusterGateway> TimedGateway<G> {
    pub fn new(inner: G, config: &GatewayConfig) -> Self {
        Self {
            inner,
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = GatewayResult<T>> + Send,
    ) -> GatewayResult<T> {
        match timeout(self.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout = ?self.operation_timeout,
                    "Gateway call timed out"
                );
                Err(GatewayError::Transient(format!(
                    "{} timed out after {:?}",
                    operation, self.operation_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl<G: ClusterGateway> ClusterGateway for TimedGateway<G> {
    async fn lookup_binding(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
    ) -> GatewayResult<Vec<ResourcePattern>> {
        self.bounded("lookup_binding", self.inner.lookup_binding(principal, role, scope))
            .await
    }

    async fn bind(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
        pattern: Option<&ResourcePattern>,
    ) -> GatewayResult<()> {
        self.bounded("bind", self.inner.bind(principal, role, scope, pattern))
            .await
    }

    async fn unbind(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
        pattern: Option<&ResourcePattern>,
    ) -> GatewayResult<()> {
        self.bounded("unbind", self.inner.unbind(principal, role, scope, pattern))
            .await
    }

    async fn get_topic(&self, cluster_id: &str, name: &str) -> GatewayResult<TopicDescription> {
        self.bounded("get_topic", self.inner.get_topic(cluster_id, name))
            .await
    }

    async fn create_topic(
        &self,
        cluster_id: &str,
        request: &CreateTopicRequest,
    ) -> GatewayResult<()> {
        self.bounded("create_topic", self.inner.create_topic(cluster_id, request))
            .await
    }

    async fn update_replication_factor(
        &self,
        cluster_id: &str,
        name: &str,
        replication_factor: i16,
    ) -> GatewayResult<()> {
        self.bounded(
            "update_replication_factor",
            self.inner
                .update_replication_factor(cluster_id, name, replication_factor),
        )
        .await
    }

    async fn update_partitions(
        &self,
        cluster_id: &str,
        name: &str,
        partitions: i32,
    ) -> GatewayResult<()> {
        self.bounded(
            "update_partitions",
            self.inner.update_partitions(cluster_id, name, partitions),
        )
        .await
    }

    async fn update_config(
        &self,
        cluster_id: &str,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        self.bounded("update_config", self.inner.update_config(cluster_id, name, config))
            .await
    }

    async fn delete_topic(&self, cluster_id: &str, name: &str) -> GatewayResult<()> {
        self.bounded("delete_topic", self.inner.delete_topic(cluster_id, name))
            .await
    }

    async fn is_replication_factor_updating(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> GatewayResult<bool> {
        self.bounded(
            "is_replication_factor_updating",
            self.inner.is_replication_factor_updating(cluster_id, name),
        )
        .await
    }

    async fn list_partitions(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> GatewayResult<Vec<PartitionInfo>> {
        self.bounded("list_partitions", self.inner.list_partitions(cluster_id, name))
            .await
    }
}
