//! # cplatform Resource Convergence Engine
//!
//! Drives topics and role bindings on a managed Kafka platform (Kafka plus its
//! Schema Registry, Connect and KSQL sub-clusters) toward a declared desired
//! state, and waits until the remote side has actually converged.
//!
//! ## Features
//!
//! - **Topics**: create, read back, ordered update (replication factor, then
//!   partitions, then config) and delete, with a convergence wait after each
//!   mutation that needs one
//! - **Role bindings**: cluster-level and resource-pattern bindings on Kafka,
//!   Schema Registry, Connect and KSQL scopes
//! - **Composite identities**: role bindings are addressed by a `|`-delimited
//!   string that round-trips through [`identity::BindingIdentity`]
//! - **Convergence poller**: one cancellable, timeout-bounded wait primitive
//!   with a minimum-wait floor and optional backoff
//! - **Observability**: `tracing` spans on every operation, `metrics` counters
//!   and histograms per resource kind
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cplatform_operator::prelude::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn grow_orders<G: ClusterGateway + 'static>(gateway: Arc<G>) -> Result<()> {
//!     let config = OperatorConfig::default();
//!     let topics = TopicReconciler::new(gateway, config.convergence.clone())?;
//!
//!     let old = TopicSpec::new("lkc-1", "orders", 3).with_replication_factor(2);
//!     let identity = topics.create(&old).await?;
//!
//!     let new = TopicSpec::new("lkc-1", "orders", 6).with_replication_factor(2);
//!     topics.update(&identity, &old, &new, &CancellationToken::new()).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`model`] - Desired-state records, scopes, roles and resource patterns
//! - [`identity`] - Role binding identity codec
//! - [`gateway`] - Remote state gateway trait and per-call timeout wrapper
//! - [`poller`] - Convergence wait primitive
//! - [`topic_controller`] - Topic reconciliation
//! - [`binding_controller`] - Role binding reconciliation
//! - [`config`] - YAML configuration
//! - [`metrics`] - Reconciler metrics
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types
//!
//! ## Identities
//!
//! | Resource | Identity |
//! |----------|----------|
//! | Topic | topic name |
//! | Cluster binding (Kafka) | `Kafka\|<kafka-id>\|<principal>\|<role>` |
//! | Cluster binding (sub-cluster) | `<Type>:<sub-id>\|<kafka-id>\|<principal>\|<role>` |
//! | Resource binding (Kafka) | `<kafka-id>\|<principal>\|<role>\|<resType>\|<name>\|<pattern>` |
//! | Resource binding (sub-cluster) | `<kafka-id>\|<Type>:<id>\|<principal>\|<role>\|<resType>\|<name>\|<pattern>` |
//!
//! ## Metrics
//!
//! - `cplatform_reconciler_operations_total` - Operations per resource kind
//! - `cplatform_reconciler_mutations_total` - Mutating gateway calls
//! - `cplatform_reconciler_errors_total` - Failed operations
//! - `cplatform_convergence_wait_seconds` - Time spent in convergence waits

pub mod binding_controller;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod metrics;
pub mod model;
pub mod poller;
pub mod telemetry;
pub mod topic_controller;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::binding_controller::{identity_for, RoleBindingReconciler, RoleBindingState};
    pub use crate::config::{ConvergenceConfig, GatewayConfig, LoggingConfig, OperatorConfig};
    pub use crate::error::{OperatorError, Result, ResultExt};
    pub use crate::gateway::{
        ClusterGateway, CreateTopicRequest, GatewayError, GatewayResult, PartitionInfo,
        TimedGateway, TopicDescription,
    };
    pub use crate::identity::BindingIdentity;
    pub use crate::metrics::ReconcilerMetrics;
    pub use crate::model::{
        ClusterIds, ClusterRoleBindingSpec, ClusterType, PatternType, Principal,
        ResourcePattern, ResourceRoleBindingSpec, ResourceScope, Role, RoleBindingSpec,
        TopicSpec, TopicState, PLACEMENT_CONSTRAINTS_CONFIG,
    };
    pub use crate::poller::{ConvergenceTask, Converged, Observation, Probe};
    pub use crate::telemetry::init_logging;
    pub use crate::topic_controller::{plan_update, TopicReconciler, TopicUpdatePlan};
}
