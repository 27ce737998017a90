//! Role binding reconciler
//!
//! Role bindings have no server-side id. Create resolves the scope from the
//! supplied cluster ids, binds, and returns a [`BindingIdentity`] encoding;
//! read, update and delete recover everything they need from that string.

use crate::error::{Result, ResultExt};
use crate::gateway::ClusterGateway;
use crate::identity::BindingIdentity;
use crate::metrics::ReconcilerMetrics;
use crate::model::{Principal, ResourcePattern, RoleBindingSpec};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Binding as observed on the cluster
#[derive(Debug, Clone, PartialEq)]
pub struct RoleBindingState {
    pub identity: BindingIdentity,
    /// Patterns the lookup returned for principal, role and scope
    pub patterns: Vec<ResourcePattern>,
    pub observed_at: DateTime<Utc>,
}

/// Reconciler for role bindings of every kind
pub struct RoleBindingReconciler<G> {
    gateway: Arc<G>,
    metrics: Option<ReconcilerMetrics>,
}

impl<G: ClusterGateway> RoleBindingReconciler<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcilerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Bind and return the encoded identity
    #[instrument(skip(self, spec))]
    pub async fn create(&self, spec: &RoleBindingSpec) -> Result<String> {
        self.count_operation();
        let result = self.bind(spec).await.with_resource(|| "create role binding".to_string());
        self.observe(result)
    }

    /// Look the binding up; `None` when it no longer exists
    ///
    /// A lookup that does not contain the identity's pattern is drift, not an
    /// error.
    #[instrument(skip(self))]
    pub async fn read(&self, identity: &str) -> Result<Option<RoleBindingState>> {
        self.count_operation();
        let result = self
            .lookup(identity)
            .await
            .with_resource(|| format!("read role binding {}", identity));
        self.observe(result)
    }

    /// Replace the binding at `identity` with `new`, returning the new identity
    ///
    /// Unchanged bindings issue no gateway call. Otherwise the old binding is
    /// removed before the new one is created.
    #[instrument(skip(self, old, new))]
    pub async fn update(
        &self,
        identity: &str,
        old: &RoleBindingSpec,
        new: &RoleBindingSpec,
    ) -> Result<String> {
        self.count_operation();
        let result = self
            .replace(identity, old, new)
            .await
            .with_resource(|| format!("update role binding {}", identity));
        self.observe(result)
    }

    /// Unbind; a binding that is already gone counts as deleted
    #[instrument(skip(self))]
    pub async fn delete(&self, identity: &str) -> Result<()> {
        self.count_operation();
        let result = self
            .remove(identity)
            .await
            .with_resource(|| format!("delete role binding {}", identity));
        self.observe(result)
    }

    async fn bind(&self, spec: &RoleBindingSpec) -> Result<String> {
        let identity = identity_for(spec)?;
        self.bind_identity(&identity).await?;
        Ok(identity.encode())
    }

    async fn bind_identity(&self, identity: &BindingIdentity) -> Result<()> {
        self.count_mutation();
        self.gateway
            .bind(
                identity.principal().as_str(),
                identity.role(),
                identity.scope(),
                identity.pattern(),
            )
            .await?;
        info!(
            principal = %identity.principal(),
            role = %identity.role(),
            scope = %identity.scope(),
            "Bound role"
        );
        Ok(())
    }

    async fn lookup(&self, identity: &str) -> Result<Option<RoleBindingState>> {
        let decoded = BindingIdentity::decode(identity)?;

        let patterns = match self
            .gateway
            .lookup_binding(decoded.principal().as_str(), decoded.role(), decoded.scope())
            .await
        {
            Ok(patterns) => patterns,
            Err(e) if e.is_not_found() => {
                debug!("Binding lookup found nothing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let present = match decoded.pattern() {
            Some(pattern) => patterns.contains(pattern),
            None => !patterns.is_empty(),
        };
        if !present {
            warn!(returned = patterns.len(), "Role binding drifted out of existence");
            return Ok(None);
        }

        Ok(Some(RoleBindingState {
            identity: decoded,
            patterns,
            observed_at: Utc::now(),
        }))
    }

    async fn replace(
        &self,
        identity: &str,
        old: &RoleBindingSpec,
        new: &RoleBindingSpec,
    ) -> Result<String> {
        let desired = identity_for(new)?;
        let current = BindingIdentity::decode(identity)?;

        if identity_for(old).ok().as_ref() != Some(&current) {
            warn!("Previous desired state does not match the stored identity, using the identity");
        }
        if current == desired {
            debug!("Role binding unchanged");
            return Ok(current.encode());
        }

        self.unbind_identity(&current).await?;
        self.bind_identity(&desired).await?;
        Ok(desired.encode())
    }

    async fn remove(&self, identity: &str) -> Result<()> {
        let decoded = BindingIdentity::decode(identity)?;
        self.unbind_identity(&decoded).await
    }

    async fn unbind_identity(&self, identity: &BindingIdentity) -> Result<()> {
        self.count_mutation();
        match self
            .gateway
            .unbind(
                identity.principal().as_str(),
                identity.role(),
                identity.scope(),
                identity.pattern(),
            )
            .await
        {
            Ok(()) => {
                info!(
                    principal = %identity.principal(),
                    role = %identity.role(),
                    scope = %identity.scope(),
                    "Unbound role"
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("Role binding already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
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
            warn!(error = %e, "Role binding operation failed");
            if let Some(ref metrics) = self.metrics {
                metrics.errors.increment(1);
            }
        }
        result
    }
}

/// Validate a desired binding and resolve the identity it will have
///
/// Cluster bindings use their declared cluster type; resource bindings infer
/// the scope from the single non-empty sub-cluster id.
pub fn identity_for(spec: &RoleBindingSpec) -> Result<BindingIdentity> {
    spec.check()?;

    match spec {
        RoleBindingSpec::Cluster(spec) => {
            let scope = spec.clusters.resolve(Some(spec.cluster_type))?;
            let principal = Principal::parse(&spec.principal)?;
            Ok(BindingIdentity::cluster_level(scope, principal, spec.role))
        }
        RoleBindingSpec::Resource(spec) => {
            let scope = spec.clusters.resolve(None)?;
            let principal = Principal::parse(&spec.principal)?;
            let pattern = ResourcePattern::new(&spec.resource_type, &spec.name, spec.pattern_type)?;
            BindingIdentity::pattern_scoped(scope, principal, spec.role, pattern)
        }
    }
}
