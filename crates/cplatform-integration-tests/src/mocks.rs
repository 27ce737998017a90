//! In-memory gateway for testing
//!
//! Keeps topics and role bindings in memory, records every call in order,
//! and can simulate propagation lag and inject failures.

use async_trait::async_trait;
use cplatform_operator::gateway::{
    ClusterGateway, CreateTopicRequest, GatewayError, GatewayResult, PartitionInfo,
    TopicDescription,
};
use cplatform_operator::model::{PatternType, ResourcePattern, ResourceScope, Role};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Replication factor the fake cluster picks when asked for 0
pub const DEFAULT_REPLICATION_FACTOR: i16 = 3;

/// A gateway call captured for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    LookupBinding {
        principal: String,
        role: Role,
        scope: ResourceScope,
    },
    Bind {
        principal: String,
        role: Role,
        scope: ResourceScope,
        pattern: Option<ResourcePattern>,
    },
    Unbind {
        principal: String,
        role: Role,
        scope: ResourceScope,
        pattern: Option<ResourcePattern>,
    },
    GetTopic {
        name: String,
    },
    CreateTopic {
        cluster_id: String,
        request: CreateTopicRequest,
    },
    UpdateReplicationFactor {
        name: String,
        replication_factor: i16,
    },
    UpdatePartitions {
        name: String,
        partitions: i32,
    },
    UpdateConfig {
        name: String,
        config: BTreeMap<String, String>,
    },
    DeleteTopic {
        name: String,
    },
    IsReplicationFactorUpdating {
        name: String,
    },
    ListPartitions {
        name: String,
    },
}

impl GatewayCall {
    /// Operation name, as used for failure injection
    pub fn operation(&self) -> &'static str {
        match self {
            GatewayCall::LookupBinding { .. } => "lookup_binding",
            GatewayCall::Bind { .. } => "bind",
            GatewayCall::Unbind { .. } => "unbind",
            GatewayCall::GetTopic { .. } => "get_topic",
            GatewayCall::CreateTopic { .. } => "create_topic",
            GatewayCall::UpdateReplicationFactor { .. } => "update_replication_factor",
            GatewayCall::UpdatePartitions { .. } => "update_partitions",
            GatewayCall::UpdateConfig { .. } => "update_config",
            GatewayCall::DeleteTopic { .. } => "delete_topic",
            GatewayCall::IsReplicationFactorUpdating { .. } => "is_replication_factor_updating",
            GatewayCall::ListPartitions { .. } => "list_partitions",
        }
    }

    /// Whether the call changes remote state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            GatewayCall::Bind { .. }
                | GatewayCall::Unbind { .. }
                | GatewayCall::CreateTopic { .. }
                | GatewayCall::UpdateReplicationFactor { .. }
                | GatewayCall::UpdatePartitions { .. }
                | GatewayCall::UpdateConfig { .. }
                | GatewayCall::DeleteTopic { .. }
        )
    }
}

/// Simulated propagation delays, counted in reads
#[derive(Debug, Clone, Copy, Default)]
pub struct Lag {
    /// `list_partitions` reads that still report the old partition count
    pub partitions: u32,
    /// `get_topic` reads that still report the old replication factor
    pub replication_factor: u32,
    /// `is_replication_factor_updating` reads that report an in-flight reassignment
    pub reassignment: u32,
    /// `get_topic` reads that still find a deleted topic
    pub deletion: u32,
}

#[derive(Debug, Clone)]
struct TopicRecord {
    replication_factor: i16,
    partitions: i32,
    config: BTreeMap<String, String>,
    pending_replication_factor: Option<(i16, u32)>,
    pending_partitions: Option<(i32, u32)>,
    reassignment_reads: u32,
    deletion_reads: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BindingRecord {
    principal: String,
    role: Role,
    scope: ResourceScope,
    pattern: Option<ResourcePattern>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<(String, String), TopicRecord>,
    bindings: Vec<BindingRecord>,
    calls: Vec<GatewayCall>,
    failures: HashMap<&'static str, VecDeque<GatewayError>>,
    lag: Lag,
}

impl State {
    fn record(&mut self, call: GatewayCall) -> GatewayResult<()> {
        let operation = call.operation();
        self.calls.push(call);
        match self.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn topic_mut(&mut self, cluster_id: &str, name: &str) -> GatewayResult<&mut TopicRecord> {
        self.topics
            .get_mut(&(cluster_id.to_string(), name.to_string()))
            .ok_or_else(|| GatewayError::NotFound(format!("topic {}", name)))
    }
}

/// Recording in-memory [`ClusterGateway`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryGateway {
    state: Arc<Mutex<State>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway whose mutations take `lag` reads to become visible
    pub fn with_lag(lag: Lag) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                lag,
                ..Default::default()
            })),
        }
    }

    pub async fn set_lag(&self, lag: Lag) {
        self.state.lock().await.lag = lag;
    }

    /// Make the next call of `operation` fail with `error`
    pub async fn fail_next(&self, operation: &'static str, error: GatewayError) {
        self.state
            .lock()
            .await
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// All calls so far, in order
    pub async fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().await.calls.clone()
    }

    /// Calls of one operation
    pub async fn calls_of(&self, operation: &str) -> Vec<GatewayCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.operation() == operation)
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Seed a topic without recording a call
    pub async fn insert_topic(
        &self,
        cluster_id: &str,
        name: &str,
        partitions: i32,
        replication_factor: i16,
    ) {
        self.state.lock().await.topics.insert(
            (cluster_id.to_string(), name.to_string()),
            TopicRecord {
                replication_factor,
                partitions,
                config: BTreeMap::new(),
                pending_replication_factor: None,
                pending_partitions: None,
                reassignment_reads: 0,
                deletion_reads: None,
            },
        );
    }

    /// Current (fully propagated) partition count and replication factor
    pub async fn topic_settings(&self, cluster_id: &str, name: &str) -> Option<(i32, i16)> {
        let state = self.state.lock().await;
        state
            .topics
            .get(&(cluster_id.to_string(), name.to_string()))
            .map(|t| {
                (
                    t.pending_partitions.map_or(t.partitions, |(p, _)| p),
                    t.pending_replication_factor.map_or(t.replication_factor, |(rf, _)| rf),
                )
            })
    }

    pub async fn topic_exists(&self, cluster_id: &str, name: &str) -> bool {
        self.state
            .lock()
            .await
            .topics
            .contains_key(&(cluster_id.to_string(), name.to_string()))
    }

    pub async fn binding_count(&self) -> usize {
        self.state.lock().await.bindings.len()
    }

    /// Remove bindings of `principal` behind the reconciler's back
    pub async fn revoke_out_of_band(&self, principal: &str) {
        self.state
            .lock()
            .await
            .bindings
            .retain(|b| b.principal != principal);
    }

    /// Add a binding without recording a call
    pub async fn insert_binding(
        &self,
        principal: &str,
        role: Role,
        scope: ResourceScope,
        pattern: Option<ResourcePattern>,
    ) {
        self.state.lock().await.bindings.push(BindingRecord {
            principal: principal.to_string(),
            role,
            scope,
            pattern,
        });
    }
}

/// Pattern reported for cluster-level bindings
fn cluster_pattern(scope: &ResourceScope) -> GatewayResult<ResourcePattern> {
    ResourcePattern::new("Cluster", scope.cluster_type().as_str(), PatternType::Literal)
        .map_err(|e| GatewayError::Fatal(e.to_string()))
}

#[async_trait]
impl ClusterGateway for InMemoryGateway {
    async fn lookup_binding(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
    ) -> GatewayResult<Vec<ResourcePattern>> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::LookupBinding {
            principal: principal.to_string(),
            role,
            scope: scope.clone(),
        })?;

        state
            .bindings
            .iter()
            .filter(|b| b.principal == principal && b.role == role && &b.scope == scope)
            .map(|b| match &b.pattern {
                Some(pattern) => Ok(pattern.clone()),
                None => cluster_pattern(scope),
            })
            .collect()
    }

    async fn bind(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
        pattern: Option<&ResourcePattern>,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::Bind {
            principal: principal.to_string(),
            role,
            scope: scope.clone(),
            pattern: pattern.cloned(),
        })?;

        let record = BindingRecord {
            principal: principal.to_string(),
            role,
            scope: scope.clone(),
            pattern: pattern.cloned(),
        };
        if !state.bindings.contains(&record) {
            state.bindings.push(record);
        }
        Ok(())
    }

    async fn unbind(
        &self,
        principal: &str,
        role: Role,
        scope: &ResourceScope,
        pattern: Option<&ResourcePattern>,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::Unbind {
            principal: principal.to_string(),
            role,
            scope: scope.clone(),
            pattern: pattern.cloned(),
        })?;

        let record = BindingRecord {
            principal: principal.to_string(),
            role,
            scope: scope.clone(),
            pattern: pattern.cloned(),
        };
        let before = state.bindings.len();
        state.bindings.retain(|b| b != &record);
        if state.bindings.len() == before {
            return Err(GatewayError::NotFound(format!("binding of {} as {}", principal, role)));
        }
        Ok(())
    }

    async fn get_topic(&self, cluster_id: &str, name: &str) -> GatewayResult<TopicDescription> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::GetTopic {
            name: name.to_string(),
        })?;

        let key = (cluster_id.to_string(), name.to_string());
        let topic = state.topic_mut(cluster_id, name)?;

        if let Some(remaining) = topic.deletion_reads {
            if remaining == 0 {
                state.topics.remove(&key);
                return Err(GatewayError::NotFound(format!("topic {}", name)));
            }
            topic.deletion_reads = Some(remaining - 1);
        }

        if let Some((replication_factor, remaining)) = topic.pending_replication_factor {
            if remaining == 0 {
                topic.replication_factor = replication_factor;
                topic.pending_replication_factor = None;
            } else {
                topic.pending_replication_factor = Some((replication_factor, remaining - 1));
            }
        }

        Ok(TopicDescription {
            name: name.to_string(),
            replication_factor: topic.replication_factor,
            config: topic.config.clone(),
        })
    }

    async fn create_topic(
        &self,
        cluster_id: &str,
        request: &CreateTopicRequest,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::CreateTopic {
            cluster_id: cluster_id.to_string(),
            request: request.clone(),
        })?;

        let key = (cluster_id.to_string(), request.name.clone());
        if state.topics.contains_key(&key) {
            return Err(GatewayError::Fatal(format!("topic {} already exists", request.name)));
        }

        let replication_factor = if request.replication_factor == 0 {
            DEFAULT_REPLICATION_FACTOR
        } else {
            request.replication_factor
        };
        state.topics.insert(
            key,
            TopicRecord {
                replication_factor,
                partitions: request.partitions,
                config: request.config.clone(),
                pending_replication_factor: None,
                pending_partitions: None,
                reassignment_reads: 0,
                deletion_reads: None,
            },
        );
        Ok(())
    }

    async fn update_replication_factor(
        &self,
        cluster_id: &str,
        name: &str,
        replication_factor: i16,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::UpdateReplicationFactor {
            name: name.to_string(),
            replication_factor,
        })?;

        let lag = state.lag;
        let topic = state.topic_mut(cluster_id, name)?;
        topic.pending_replication_factor = Some((replication_factor, lag.replication_factor));
        topic.reassignment_reads = lag.reassignment;
        Ok(())
    }

    async fn update_partitions(
        &self,
        cluster_id: &str,
        name: &str,
        partitions: i32,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::UpdatePartitions {
            name: name.to_string(),
            partitions,
        })?;

        let lag = state.lag;
        let topic = state.topic_mut(cluster_id, name)?;
        if partitions < topic.partitions {
            return Err(GatewayError::Fatal(format!(
                "topic {} already has {} partitions",
                name, topic.partitions
            )));
        }
        topic.pending_partitions = Some((partitions, lag.partitions));
        Ok(())
    }

    async fn update_config(
        &self,
        cluster_id: &str,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::UpdateConfig {
            name: name.to_string(),
            config: config.clone(),
        })?;

        state.topic_mut(cluster_id, name)?.config = config.clone();
        Ok(())
    }

    async fn delete_topic(&self, cluster_id: &str, name: &str) -> GatewayResult<()> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::DeleteTopic {
            name: name.to_string(),
        })?;

        let lag = state.lag;
        let topic = state.topic_mut(cluster_id, name)?;
        if topic.deletion_reads.is_none() {
            topic.deletion_reads = Some(lag.deletion);
        }
        Ok(())
    }

    async fn is_replication_factor_updating(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> GatewayResult<bool> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::IsReplicationFactorUpdating {
            name: name.to_string(),
        })?;

        let topic = state.topic_mut(cluster_id, name)?;
        if topic.reassignment_reads > 0 {
            topic.reassignment_reads -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_partitions(
        &self,
        cluster_id: &str,
        name: &str,
    ) -> GatewayResult<Vec<PartitionInfo>> {
        let mut state = self.state.lock().await;
        state.record(GatewayCall::ListPartitions {
            name: name.to_string(),
        })?;

        let topic = state.topic_mut(cluster_id, name)?;
        if let Some((partitions, remaining)) = topic.pending_partitions {
            if remaining == 0 {
                topic.partitions = partitions;
                topic.pending_partitions = None;
            } else {
                topic.pending_partitions = Some((partitions, remaining - 1));
            }
        }

        let replicas: Vec<i32> = (0..topic.replication_factor as i32).collect();
        Ok((0..topic.partitions)
            .map(|partition| PartitionInfo {
                partition,
                leader: replicas.first().copied().unwrap_or(-1),
                replicas: replicas.clone(),
                isr: replicas.clone(),
            })
            .collect())
    }
}
