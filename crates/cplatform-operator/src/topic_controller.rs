//! Topic reconciler
//!
//! Drives topics on a Kafka cluster toward their desired [`TopicSpec`]:
//! create, read back, update in three ordered legs (replication factor,
//! partitions, config) and delete, waiting for the cluster to converge after
//! each mutation that needs it.

use crate::config::ConvergenceConfig;
use crate::error::{OperatorError, Result, ResultExt};
use crate::gateway::{ClusterGateway, CreateTopicRequest};
use crate::metrics::ReconcilerMetrics;
use crate::model::{check_valid, TopicSpec, TopicState, IDENTITY_DELIMITER};
use crate::poller::{
    ConvergenceTask, Converged, Observation, Probe, STATE_DELETING, STATE_READY, STATE_UPDATING,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Reconciler for topics
pub struct TopicReconciler<G> {
    gateway: Arc<G>,
    convergence: ConvergenceConfig,
    metrics: Option<ReconcilerMetrics>,
}

impl<G: ClusterGateway + 'static> TopicReconciler<G> {
    /// # Errors
    ///
    /// [`OperatorError::InvalidConfig`] when `convergence` fails validation.
    pub fn new(gateway: Arc<G>, convergence: ConvergenceConfig) -> Result<Self> {
        convergence.validate()?;
        Ok(Self {
            gateway,
            convergence,
            metrics: None,
        })
    }

    /// Record operations through the given metrics
    pub fn with_metrics(mut self, metrics: ReconcilerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Create the topic and return its identity (the topic name)
    ///
    /// With placement constraints in the config the replication factor sent
    /// to the cluster is 0.
    #[instrument(skip(self, spec), fields(cluster_id = %spec.cluster_id, topic = %spec.name))]
    pub async fn create(&self, spec: &TopicSpec) -> Result<String> {
        self.count_operation();
        let result = self
            .create_topic(spec)
            .await
            .with_resource(|| format!("create topic {}", spec.name));
        self.observe(result)
    }

    /// Read the topic back from the cluster; `None` when it does not exist
    #[instrument(skip(self))]
    pub async fn read(&self, cluster_id: &str, identity: &str) -> Result<Option<TopicState>> {
        self.count_operation();
        let result = self
            .read_topic(cluster_id, identity)
            .await
            .with_resource(|| format!("read topic {}", identity));
        self.observe(result)
    }

    /// Move the topic from `old` to `new`
    ///
    /// Legs run in order, each only if its attribute changed:
    /// 1. replication factor, then wait for the reassignment and for the
    ///    topic to report it
    /// 2. partitions (never decreased), then wait for the new count
    /// 3. config, then one final wait for the fully updated topic
    ///
    /// Every validation happens before the first gateway call.
    #[instrument(skip(self, old, new, cancel), fields(cluster_id = %new.cluster_id))]
    pub async fn update(
        &self,
        identity: &str,
        old: &TopicSpec,
        new: &TopicSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.count_operation();
        let result = self
            .update_topic(identity, old, new, cancel)
            .await
            .with_resource(|| format!("update topic {}", identity));
        self.observe(result)
    }

    /// Delete the topic and wait until the cluster no longer reports it
    ///
    /// A topic that is already gone counts as deleted.
    #[instrument(skip(self, cancel))]
    pub async fn delete(
        &self,
        cluster_id: &str,
        identity: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.count_operation();
        let result = self
            .delete_topic(cluster_id, identity, cancel)
            .await
            .with_resource(|| format!("delete topic {}", identity));
        self.observe(result)
    }

    async fn create_topic(&self, spec: &TopicSpec) -> Result<String> {
        check_valid(spec)?;

        let request = CreateTopicRequest {
            name: spec.name.clone(),
            partitions: spec.partitions,
            replication_factor: spec.effective_replication_factor(),
            config: spec.config.clone(),
        };
        if spec.placement_constrained() && spec.replication_factor != 0 {
            debug!(
                replication_factor = spec.replication_factor,
                "Placement constraints present, leaving replica placement to the cluster"
            );
        }

        self.count_mutation();
        self.gateway.create_topic(&spec.cluster_id, &request).await?;

        info!(
            partitions = request.partitions,
            replication_factor = request.replication_factor,
            "Created topic"
        );
        Ok(spec.name.clone())
    }

    async fn read_topic(&self, cluster_id: &str, identity: &str) -> Result<Option<TopicState>> {
        check_topic_identity(identity)?;

        let description = match self.gateway.get_topic(cluster_id, identity).await {
            Ok(description) => description,
            Err(e) if e.is_not_found() => {
                debug!("Topic not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let partitions = match self.gateway.list_partitions(cluster_id, identity).await {
            Ok(partitions) => partitions,
            Err(e) if e.is_not_found() => {
                debug!("Topic disappeared while reading partitions");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Some(TopicState {
            name: description.name,
            partitions: partitions.len() as i32,
            replication_factor: description.replication_factor,
            config: description.config,
            observed_at: Utc::now(),
        }))
    }

    async fn update_topic(
        &self,
        identity: &str,
        old: &TopicSpec,
        new: &TopicSpec,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let plan = plan_update(identity, old, new)?;
        if plan.is_empty() {
            debug!("Topic unchanged");
            return Ok(());
        }
        self.execute(&new.cluster_id, identity, old, &plan, cancel).await
    }

    async fn delete_topic(
        &self,
        cluster_id: &str,
        identity: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_topic_identity(identity)?;

        self.count_mutation();
        match self.gateway.delete_topic(cluster_id, identity).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Topic already absent");
            }
            Err(e) => return Err(e.into()),
        }

        let probe = TopicDeletionProbe {
            gateway: self.gateway.clone(),
            cluster_id: cluster_id.to_string(),
            name: identity.to_string(),
        };
        let resource = format!("topic {} deletion", identity);
        let task = ConvergenceTask::new(resource, probe, &self.convergence)
            .pending(&[STATE_DELETING])
            .target(&[STATE_READY]);
        self.converge(task, cancel).await?;

        info!("Deleted topic");
        Ok(())
    }

    async fn execute(
        &self,
        cluster_id: &str,
        name: &str,
        old: &TopicSpec,
        plan: &TopicUpdatePlan,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut expected = ExpectedTopic {
            partitions: old.partitions,
            replication_factor: plan.expected_replication_factor,
        };

        if let Some(replication_factor) = plan.replication_factor {
            info!(
                from = old.effective_replication_factor(),
                to = replication_factor,
                "Updating replication factor"
            );
            self.count_mutation();
            self.gateway
                .update_replication_factor(cluster_id, name, replication_factor)
                .await?;

            let probe = ReplicationFactorProbe {
                gateway: self.gateway.clone(),
                cluster_id: cluster_id.to_string(),
                name: name.to_string(),
            };
            let resource = format!("topic {} replication factor", name);
            self.converge(ConvergenceTask::new(resource, probe, &self.convergence), cancel)
                .await?;
            self.converge(self.topic_task(cluster_id, name, expected), cancel)
                .await?;
        }

        if let Some(partitions) = plan.partitions {
            info!(from = old.partitions, to = partitions, "Updating partitions");
            self.count_mutation();
            self.gateway
                .update_partitions(cluster_id, name, partitions)
                .await?;

            expected.partitions = partitions;
            self.converge(self.topic_task(cluster_id, name, expected), cancel)
                .await?;
        }

        if let Some(config) = &plan.config {
            info!(keys = config.len(), "Updating topic config");
            self.count_mutation();
            self.gateway.update_config(cluster_id, name, config).await?;

            self.converge(self.topic_task(cluster_id, name, expected), cancel)
                .await?;
        }

        info!("Updated topic");
        Ok(())
    }

    fn topic_task(
        &self,
        cluster_id: &str,
        name: &str,
        expected: ExpectedTopic,
    ) -> ConvergenceTask<TopicProbe<G>> {
        let probe = TopicProbe {
            gateway: self.gateway.clone(),
            cluster_id: cluster_id.to_string(),
            name: name.to_string(),
            expected,
        };
        ConvergenceTask::new(format!("topic {}", name), probe, &self.convergence)
    }

    async fn converge<P: Probe>(
        &self,
        task: ConvergenceTask<P>,
        cancel: &CancellationToken,
    ) -> Result<Converged<P::Output>> {
        let converged = task.wait(cancel).await?;
        if let Some(ref metrics) = self.metrics {
            metrics.record_wait(converged.elapsed);
        }
        Ok(converged)
    }

    fn count_operation(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.operations.increment(1);
        }
    }

    fn count_mutation(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.mutations.increment(1);
        }
    }

    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            warn!(error = %e, "Topic operation failed");
            if let Some(ref metrics) = self.metrics {
                metrics.errors.increment(1);
            }
        }
        result
    }
}

// ============================================================================
// Update planning
// ============================================================================

/// Mutations needed to move a topic from one spec to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicUpdatePlan {
    /// New replication factor, if it must be updated
    pub replication_factor: Option<i16>,
    /// New partition count, if it must grow
    pub partitions: Option<i32>,
    /// Replacement config, if it changed
    pub config: Option<BTreeMap<String, String>>,
    /// Replication factor convergence checks against (`None`: not checked)
    pub expected_replication_factor: Option<i16>,
}

impl TopicUpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.replication_factor.is_none() && self.partitions.is_none() && self.config.is_none()
    }
}

/// Validate a topic update and work out the legs it needs
///
/// # Errors
///
/// Validation errors for an invalid `new` spec, a changed cluster or name, an
/// identity that does not name the topic, or a partition decrease.
pub fn plan_update(identity: &str, old: &TopicSpec, new: &TopicSpec) -> Result<TopicUpdatePlan> {
    check_valid(new)?;

    if old.cluster_id != new.cluster_id {
        return Err(OperatorError::ValidationError(format!(
            "cannot move topic from cluster {} to {}",
            old.cluster_id, new.cluster_id
        )));
    }
    if old.name != new.name || identity != new.name {
        return Err(OperatorError::ValidationError(format!(
            "cannot rename topic {} to {}",
            identity, new.name
        )));
    }
    if new.partitions < old.partitions {
        return Err(OperatorError::ValidationError(format!(
            "cannot decrease the number of partitions of topic {} from {} to {}",
            new.name, old.partitions, new.partitions
        )));
    }

    let expected_replication_factor = new.expected_replication_factor();
    let replication_factor = expected_replication_factor
        .filter(|rf| *rf != old.effective_replication_factor());

    Ok(TopicUpdatePlan {
        replication_factor,
        partitions: Some(new.partitions).filter(|p| *p != old.partitions),
        config: Some(new.config.clone()).filter(|c| *c != old.config),
        expected_replication_factor,
    })
}

fn check_topic_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(OperatorError::malformed(identity, "topic identity must not be empty"));
    }
    if identity.contains(IDENTITY_DELIMITER) {
        return Err(OperatorError::malformed(
            identity,
            format!("topic identity must not contain '{}'", IDENTITY_DELIMITER),
        ));
    }
    Ok(())
}

// ============================================================================
// Probes
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct ExpectedTopic {
    partitions: i32,
    replication_factor: Option<i16>,
}

/// `Updating` while a replica reassignment is in flight, then `Ready`
struct ReplicationFactorProbe<G> {
    gateway: Arc<G>,
    cluster_id: String,
    name: String,
}

#[async_trait]
impl<G: ClusterGateway + 'static> Probe for ReplicationFactorProbe<G> {
    type Output = ();

    fn name(&self) -> &'static str {
        "replication_factor"
    }

    async fn refresh(&mut self) -> Result<Observation<()>> {
        let updating = self
            .gateway
            .is_replication_factor_updating(&self.cluster_id, &self.name)
            .await?;
        Ok(Observation::labelled(if updating { STATE_UPDATING } else { STATE_READY }))
    }
}

/// `Ready` once partition count and replication factor match
struct TopicProbe<G> {
    gateway: Arc<G>,
    cluster_id: String,
    name: String,
    expected: ExpectedTopic,
}

#[async_trait]
impl<G: ClusterGateway + 'static> Probe for TopicProbe<G> {
    type Output = TopicState;

    fn name(&self) -> &'static str {
        "topic"
    }

    async fn refresh(&mut self) -> Result<Observation<TopicState>> {
        let description = self.gateway.get_topic(&self.cluster_id, &self.name).await?;
        let partitions = self
            .gateway
            .list_partitions(&self.cluster_id, &self.name)
            .await?;
        let partition_count = partitions.len() as i32;

        let replication_factor_matches = self
            .expected
            .replication_factor
            .map_or(true, |rf| rf == description.replication_factor);

        if partition_count == self.expected.partitions && replication_factor_matches {
            return Ok(Observation::with_value(
                STATE_READY,
                TopicState {
                    name: description.name,
                    partitions: partition_count,
                    replication_factor: description.replication_factor,
                    config: description.config,
                    observed_at: Utc::now(),
                },
            ));
        }

        debug!(
            partitions = partition_count,
            expected_partitions = self.expected.partitions,
            replication_factor = description.replication_factor,
            expected_replication_factor = ?self.expected.replication_factor,
            "Topic not converged yet"
        );
        Ok(Observation::labelled(STATE_UPDATING))
    }
}

/// `Ready` once the topic is no longer found, `Deleting` while it still is
struct TopicDeletionProbe<G> {
    gateway: Arc<G>,
    cluster_id: String,
    name: String,
}

#[async_trait]
impl<G: ClusterGateway + 'static> Probe for TopicDeletionProbe<G> {
    type Output = ();

    fn name(&self) -> &'static str {
        "topic_deletion"
    }

    async fn refresh(&mut self) -> Result<Observation<()>> {
        match self.gateway.get_topic(&self.cluster_id, &self.name).await {
            Ok(_) => Ok(Observation::labelled(STATE_DELETING)),
            Err(e) if e.is_not_found() => Ok(Observation::labelled(STATE_READY)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PLACEMENT_CONSTRAINTS_CONFIG;

    fn orders(partitions: i32, replication_factor: i16) -> TopicSpec {
        TopicSpec::new("kc-1", "orders", partitions).with_replication_factor(replication_factor)
    }

    #[test]
    fn test_plan_unchanged() {
        let plan = plan_update("orders", &orders(3, 2), &orders(3, 2)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.expected_replication_factor, Some(2));
    }

    #[test]
    fn test_plan_partitions_only() {
        let plan = plan_update("orders", &orders(3, 2), &orders(6, 2)).unwrap();
        assert_eq!(plan.partitions, Some(6));
        assert_eq!(plan.replication_factor, None);
        assert_eq!(plan.config, None);
    }

    #[test]
    fn test_plan_all_legs() {
        let new = orders(6, 3).with_config("retention.ms", "86400000");
        let plan = plan_update("orders", &orders(3, 2), &new).unwrap();
        assert_eq!(plan.replication_factor, Some(3));
        assert_eq!(plan.partitions, Some(6));
        assert_eq!(
            plan.config.unwrap().get("retention.ms").map(String::as_str),
            Some("86400000")
        );
    }

    #[test]
    fn test_plan_rejects_partition_decrease() {
        let err = plan_update("orders", &orders(6, 2), &orders(3, 2)).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("cannot decrease the number of partitions"));
    }

    #[test]
    fn test_plan_rejects_rename_and_move() {
        let renamed = TopicSpec::new("kc-1", "payments", 3);
        assert!(plan_update("orders", &orders(3, 0), &renamed).unwrap_err().is_validation());

        let moved = TopicSpec::new("kc-2", "orders", 3);
        assert!(plan_update("orders", &orders(3, 0), &moved).unwrap_err().is_validation());

        assert!(plan_update("payments", &orders(3, 0), &orders(3, 0)).is_err());
    }

    #[test]
    fn test_plan_rejects_invalid_spec() {
        let err = plan_update("orders", &orders(3, 2), &orders(0, 2)).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_plan_skips_replication_factor_under_placement_constraints() {
        let old = orders(3, 2).with_config(PLACEMENT_CONSTRAINTS_CONFIG, "{}");
        let new = orders(3, 3).with_config(PLACEMENT_CONSTRAINTS_CONFIG, "{}");
        let plan = plan_update("orders", &old, &new).unwrap();
        assert_eq!(plan.replication_factor, None);
        assert_eq!(plan.expected_replication_factor, None);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_cluster_default_replication_factor_unmanaged() {
        let plan = plan_update("orders", &orders(3, 2), &orders(3, 0)).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.expected_replication_factor, None);
    }

    #[test]
    fn test_topic_identity_checks() {
        assert!(check_topic_identity("orders").is_ok());
        assert!(matches!(
            check_topic_identity("").unwrap_err(),
            OperatorError::MalformedIdentity { .. }
        ));
        assert!(matches!(
            check_topic_identity("kc-1|orders").unwrap_err(),
            OperatorError::MalformedIdentity { .. }
        ));
    }
}
