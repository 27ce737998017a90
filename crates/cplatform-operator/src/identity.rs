//! Composite identities for role bindings
//!
//! A role binding has no server-side id, so the reconciler hands the caller an
//! opaque string that packs everything needed to find the binding again:
//!
//! ```text
//! cluster-level, Kafka:
//!     Kafka|<kafka-id>|<principal>|<role>
//! cluster-level, sub-cluster:
//!     <Type>:<sub-id>|<kafka-id>|<principal>|<role>
//! pattern-scoped, Kafka:
//!     <kafka-id>|<principal>|<role>|<resType>|<name>|<pattern>
//! pattern-scoped, sub-cluster:
//!     <kafka-id>|<Type>:<sub-id>|<principal>|<role>|<resType>|<name>|<pattern>
//! ```
//!
//! Every constituent is validated to be free of `|` when it is constructed,
//! so encoding is infallible and `decode(encode(x)) == x`.

use crate::error::{OperatorError, Result};
use crate::model::{
    ClusterType, PatternType, Principal, ResourcePattern, ResourceScope, Role, IDENTITY_DELIMITER,
};
use std::fmt;
use std::str::FromStr;

const SCOPE_SEPARATOR: char = ':';

/// Scope label older connector identities were written with
const LEGACY_CONNECT_LABEL: &str = "ConnectClusterId";

/// Decoded identity of a role binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingIdentity {
    /// Role granted on a whole (sub-)cluster
    ClusterLevel {
        scope: ResourceScope,
        principal: Principal,
        role: Role,
    },
    /// Scope role granted on a resource pattern
    PatternScoped {
        scope: ResourceScope,
        principal: Principal,
        role: Role,
        pattern: ResourcePattern,
    },
}

impl BindingIdentity {
    pub fn cluster_level(scope: ResourceScope, principal: Principal, role: Role) -> Self {
        BindingIdentity::ClusterLevel {
            scope,
            principal,
            role,
        }
    }

    /// # Errors
    ///
    /// Fails when `role` is not one of the scope roles.
    pub fn pattern_scoped(
        scope: ResourceScope,
        principal: Principal,
        role: Role,
        pattern: ResourcePattern,
    ) -> Result<Self> {
        if !role.is_scope_role() {
            return Err(OperatorError::ValidationError(format!(
                "{} cannot be bound to a resource pattern",
                role
            )));
        }
        Ok(BindingIdentity::PatternScoped {
            scope,
            principal,
            role,
            pattern,
        })
    }

    pub fn scope(&self) -> &ResourceScope {
        match self {
            BindingIdentity::ClusterLevel { scope, .. }
            | BindingIdentity::PatternScoped { scope, .. } => scope,
        }
    }

    pub fn principal(&self) -> &Principal {
        match self {
            BindingIdentity::ClusterLevel { principal, .. }
            | BindingIdentity::PatternScoped { principal, .. } => principal,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            BindingIdentity::ClusterLevel { role, .. }
            | BindingIdentity::PatternScoped { role, .. } => *role,
        }
    }

    pub fn pattern(&self) -> Option<&ResourcePattern> {
        match self {
            BindingIdentity::ClusterLevel { .. } => None,
            BindingIdentity::PatternScoped { pattern, .. } => Some(pattern),
        }
    }

    /// Serialize into the opaque identity string
    pub fn encode(&self) -> String {
        let mut tokens: Vec<String> = Vec::with_capacity(7);

        match self {
            BindingIdentity::ClusterLevel {
                scope,
                principal,
                role,
            } => {
                tokens.push(scope_token(scope).unwrap_or_else(|| ClusterType::Kafka.to_string()));
                tokens.push(scope.kafka_cluster_id().to_string());
                tokens.push(principal.to_string());
                tokens.push(role.to_string());
            }
            BindingIdentity::PatternScoped {
                scope,
                principal,
                role,
                pattern,
            } => {
                tokens.push(scope.kafka_cluster_id().to_string());
                tokens.extend(scope_token(scope));
                tokens.push(principal.to_string());
                tokens.push(role.to_string());
                tokens.push(pattern.resource_type().to_string());
                tokens.push(pattern.name().to_string());
                tokens.push(pattern.pattern_type().to_string());
            }
        }

        let delimiter = IDENTITY_DELIMITER.to_string();
        tokens.join(delimiter.as_str())
    }

    /// Parse an identity produced by [`BindingIdentity::encode`]
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::MalformedIdentity`] when the token count matches
    /// no known shape or any token fails validation.
    pub fn decode(identity: &str) -> Result<Self> {
        let tokens: Vec<&str> = identity.split(IDENTITY_DELIMITER).collect();
        let malformed = |e: OperatorError| OperatorError::malformed(identity, e.to_string());

        match tokens.as_slice() {
            [scope, kafka_id, principal, role] => {
                let scope = parse_scope(identity, scope, kafka_id, true)?;
                Ok(BindingIdentity::cluster_level(
                    scope,
                    Principal::parse(principal).map_err(malformed)?,
                    role.parse().map_err(malformed)?,
                ))
            }
            [kafka_id, principal, role, resource_type, name, pattern_type] => {
                let scope = ResourceScope::kafka(*kafka_id).map_err(malformed)?;
                decode_pattern_scoped(
                    identity,
                    scope,
                    principal,
                    role,
                    resource_type,
                    name,
                    pattern_type,
                )
            }
            [kafka_id, scope, principal, role, resource_type, name, pattern_type] => {
                let scope = parse_scope(identity, scope, kafka_id, false)?;
                decode_pattern_scoped(
                    identity,
                    scope,
                    principal,
                    role,
                    resource_type,
                    name,
                    pattern_type,
                )
            }
            tokens if tokens.len() < 4 => Err(OperatorError::malformed(
                identity,
                format!("expected at least 4 '|'-separated tokens, found {}", tokens.len()),
            )),
            tokens => Err(OperatorError::malformed(
                identity,
                format!("no identity shape has {} tokens", tokens.len()),
            )),
        }
    }
}

impl fmt::Display for BindingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for BindingIdentity {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        BindingIdentity::decode(s)
    }
}

/// `<Type>:<sub-id>` for sub-cluster scopes
fn scope_token(scope: &ResourceScope) -> Option<String> {
    scope
        .sub_cluster_id()
        .map(|sub| format!("{}{}{}", scope.cluster_type(), SCOPE_SEPARATOR, sub))
}

/// Rebuild a scope from its scope token and the Kafka cluster id
///
/// A token without `:` is a bare cluster type and only valid for Kafka, and
/// only where the shape allows a bare type at all.
fn parse_scope(
    identity: &str,
    token: &str,
    kafka_id: &str,
    allow_bare: bool,
) -> Result<ResourceScope> {
    let malformed = |e: OperatorError| OperatorError::malformed(identity, e.to_string());

    match token.split_once(SCOPE_SEPARATOR) {
        Some((label, sub_id)) => {
            let cluster_type = if label == LEGACY_CONNECT_LABEL {
                ClusterType::Connect
            } else {
                label.parse::<ClusterType>().map_err(malformed)?
            };
            if cluster_type == ClusterType::Kafka {
                return Err(OperatorError::malformed(
                    identity,
                    "Kafka scope token must not carry a sub-cluster id",
                ));
            }
            if sub_id.is_empty() {
                return Err(OperatorError::malformed(
                    identity,
                    format!("scope token '{}' has an empty sub-cluster id", token),
                ));
            }
            ResourceScope::sub_cluster(cluster_type, kafka_id, sub_id).map_err(malformed)
        }
        None if allow_bare => match token.parse::<ClusterType>().map_err(malformed)? {
            ClusterType::Kafka => ResourceScope::kafka(kafka_id).map_err(malformed),
            other => Err(OperatorError::malformed(
                identity,
                format!("{} scope requires '{}:<cluster-id>'", other, other),
            )),
        },
        None => Err(OperatorError::malformed(
            identity,
            format!("scope token '{}' must have the form '<type>:<cluster-id>'", token),
        )),
    }
}

fn decode_pattern_scoped(
    identity: &str,
    scope: ResourceScope,
    principal: &str,
    role: &str,
    resource_type: &str,
    name: &str,
    pattern_type: &str,
) -> Result<BindingIdentity> {
    let malformed = |e: OperatorError| OperatorError::malformed(identity, e.to_string());

    let pattern_type: PatternType = pattern_type.parse().map_err(malformed)?;
    let pattern = ResourcePattern::new(resource_type, name, pattern_type).map_err(malformed)?;
    BindingIdentity::pattern_scoped(
        scope,
        Principal::parse(principal).map_err(malformed)?,
        role.parse().map_err(malformed)?,
        pattern,
    )
    .map_err(malformed)
}
