//! Test fixtures for integration tests
//!
//! Provides reusable test infrastructure including:
//! - A harness wiring both reconcilers to one in-memory gateway
//! - Desired-state builders for topics and every binding kind

use crate::mocks::{InMemoryGateway, Lag};
use cplatform_operator::binding_controller::RoleBindingReconciler;
use cplatform_operator::config::ConvergenceConfig;
use cplatform_operator::model::{
    ClusterIds, ClusterRoleBindingSpec, ClusterType, PatternType, ResourceRoleBindingSpec, Role,
    RoleBindingSpec, TopicSpec,
};
use cplatform_operator::topic_controller::TopicReconciler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Kafka cluster id used throughout the scenarios
pub const KAFKA_CLUSTER: &str = "lkc-5-2KZs0YRYCVv8YCDdfSVw";

// ============================================================================
// TestHarness - reconcilers over one gateway
// ============================================================================

/// Both reconcilers sharing one recording gateway
pub struct TestHarness {
    pub gateway: Arc<InMemoryGateway>,
    pub topics: TopicReconciler<InMemoryGateway>,
    pub bindings: RoleBindingReconciler<InMemoryGateway>,
    pub cancel: CancellationToken,
}

impl TestHarness {
    /// Harness with default convergence timing and no propagation lag
    pub fn new() -> Self {
        Self::with_lag(Lag::default())
    }

    pub fn with_lag(lag: Lag) -> Self {
        Self::with_config(lag, ConvergenceConfig::default())
    }

    /// # Panics
    ///
    /// When `convergence` is rejected by the topic reconciler.
    pub fn with_config(lag: Lag, convergence: ConvergenceConfig) -> Self {
        let gateway = Arc::new(InMemoryGateway::with_lag(lag));
        Self {
            topics: TopicReconciler::new(gateway.clone(), convergence)
                .expect("convergence config is valid"),
            bindings: RoleBindingReconciler::new(gateway.clone()),
            gateway,
            cancel: CancellationToken::new(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Desired-state builders
// ============================================================================

/// Topic on the scenario cluster
pub fn topic(name: &str, partitions: i32, replication_factor: i16) -> TopicSpec {
    TopicSpec::new(KAFKA_CLUSTER, name, partitions).with_replication_factor(replication_factor)
}

/// `{orders, 3 partitions, RF 2, no config}`
pub fn orders_topic() -> TopicSpec {
    topic("orders", 3, 2)
}

/// Cluster-wide role on the Kafka cluster
pub fn kafka_cluster_binding(principal: &str, role: Role) -> RoleBindingSpec {
    RoleBindingSpec::Cluster(ClusterRoleBindingSpec {
        principal: principal.to_string(),
        role,
        cluster_type: ClusterType::Kafka,
        clusters: ClusterIds::kafka(KAFKA_CLUSTER),
    })
}

/// Cluster-wide role on a sub-cluster
pub fn sub_cluster_binding(
    principal: &str,
    role: Role,
    clusters: ClusterIds,
    cluster_type: ClusterType,
) -> RoleBindingSpec {
    RoleBindingSpec::Cluster(ClusterRoleBindingSpec {
        principal: principal.to_string(),
        role,
        cluster_type,
        clusters,
    })
}

/// Scope role on a Kafka topic pattern
pub fn topic_binding(
    principal: &str,
    role: Role,
    name: &str,
    pattern_type: PatternType,
) -> RoleBindingSpec {
    resource_binding(principal, role, ClusterIds::kafka(KAFKA_CLUSTER), "Topic", name, pattern_type)
}

/// Scope role on a Schema Registry subject pattern
pub fn subject_binding(principal: &str, registry: &str, name: &str) -> RoleBindingSpec {
    resource_binding(
        principal,
        Role::DeveloperRead,
        ClusterIds::kafka(KAFKA_CLUSTER).with_schema_registry(registry),
        "Subject",
        name,
        PatternType::Prefixed,
    )
}

/// Scope role on a connector pattern
pub fn connector_binding(principal: &str, connect: &str, name: &str) -> RoleBindingSpec {
    resource_binding(
        principal,
        Role::DeveloperManage,
        ClusterIds::kafka(KAFKA_CLUSTER).with_connect(connect),
        "Connector",
        name,
        PatternType::Prefixed,
    )
}

pub fn resource_binding(
    principal: &str,
    role: Role,
    clusters: ClusterIds,
    resource_type: &str,
    name: &str,
    pattern_type: PatternType,
) -> RoleBindingSpec {
    RoleBindingSpec::Resource(ResourceRoleBindingSpec {
        principal: principal.to_string(),
        role,
        clusters,
        resource_type: resource_type.to_string(),
        name: name.to_string(),
        pattern_type,
    })
}
