//! Desired-state records and the value types shared by the codec, gateway
//! and reconcilers.
//!
//! Records arrive from the declarative layer already shaped; they are
//! validated here with `validator` before any gateway call is issued.

use crate::error::{OperatorError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use validator::{Validate, ValidationError, ValidationErrors};

/// Reserved delimiter of composite identities
pub const IDENTITY_DELIMITER: char = '|';

/// Topic config key whose presence hands replica placement to the cluster
pub const PLACEMENT_CONSTRAINTS_CONFIG: &str = "confluent.placement.constraints";

/// Principals are `User:<name>` or `Group:<name>`
static PRINCIPAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(User|Group):[^|]+$").expect("principal regex is valid"));

// ============================================================================
// Cluster coordinates
// ============================================================================

/// Subsystem a binding applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterType {
    Kafka,
    SchemaRegistry,
    Connect,
    #[serde(rename = "KSQL")]
    Ksql,
}

impl ClusterType {
    pub const ALL: [ClusterType; 4] = [
        ClusterType::Kafka,
        ClusterType::SchemaRegistry,
        ClusterType::Connect,
        ClusterType::Ksql,
    ];

    /// Label used in composite identities
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterType::Kafka => "Kafka",
            ClusterType::SchemaRegistry => "SchemaRegistry",
            ClusterType::Connect => "Connect",
            ClusterType::Ksql => "KSQL",
        }
    }

    /// Attribute name carrying the sub-cluster id for this type
    pub fn id_parameter(&self) -> &'static str {
        match self {
            ClusterType::Kafka => "cluster_id",
            ClusterType::SchemaRegistry => "schema_registry_cluster_id",
            ClusterType::Connect => "connect_cluster_id",
            ClusterType::Ksql => "ksql_cluster_id",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        ClusterType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OperatorError::ValidationError(format!("unknown cluster type '{}'", s)))
    }
}

/// Where a binding or topic lives: the Kafka cluster, optionally narrowed to
/// one of its Schema Registry, Connect or KSQL clusters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceScope {
    cluster_type: ClusterType,
    kafka_cluster_id: String,
    sub_cluster_id: Option<String>,
}

impl ResourceScope {
    /// Scope of the Kafka cluster itself
    pub fn kafka(kafka_cluster_id: impl Into<String>) -> Result<Self> {
        let kafka_cluster_id = kafka_cluster_id.into();
        check_identifier("cluster_id", &kafka_cluster_id)?;
        Ok(Self {
            cluster_type: ClusterType::Kafka,
            kafka_cluster_id,
            sub_cluster_id: None,
        })
    }

    /// Scope of a Schema Registry, Connect or KSQL cluster
    pub fn sub_cluster(
        cluster_type: ClusterType,
        kafka_cluster_id: impl Into<String>,
        sub_cluster_id: impl Into<String>,
    ) -> Result<Self> {
        if cluster_type == ClusterType::Kafka {
            return Err(OperatorError::ValidationError(
                "Kafka scope does not take a sub-cluster id".to_string(),
            ));
        }
        let kafka_cluster_id = kafka_cluster_id.into();
        let sub_cluster_id = sub_cluster_id.into();
        check_identifier("cluster_id", &kafka_cluster_id)?;
        check_identifier(cluster_type.id_parameter(), &sub_cluster_id)?;
        Ok(Self {
            cluster_type,
            kafka_cluster_id,
            sub_cluster_id: Some(sub_cluster_id),
        })
    }

    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    pub fn kafka_cluster_id(&self) -> &str {
        &self.kafka_cluster_id
    }

    pub fn sub_cluster_id(&self) -> Option<&str> {
        self.sub_cluster_id.as_deref()
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_cluster_id {
            Some(sub) => write!(f, "{}/{}:{}", self.kafka_cluster_id, self.cluster_type, sub),
            None => write!(f, "{}", self.kafka_cluster_id),
        }
    }
}

/// Cluster ids as supplied by the declarative layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIds {
    /// Kafka cluster id (always required)
    #[validate(custom(function = "validate_identifier"))]
    pub kafka_cluster_id: String,

    #[serde(default)]
    pub schema_registry_cluster_id: Option<String>,

    #[serde(default)]
    pub connect_cluster_id: Option<String>,

    #[serde(default)]
    pub ksql_cluster_id: Option<String>,
}

impl ClusterIds {
    /// Ids for the Kafka cluster only
    pub fn kafka(kafka_cluster_id: impl Into<String>) -> Self {
        Self {
            kafka_cluster_id: kafka_cluster_id.into(),
            ..Default::default()
        }
    }

    pub fn with_schema_registry(mut self, id: impl Into<String>) -> Self {
        self.schema_registry_cluster_id = Some(id.into());
        self
    }

    pub fn with_connect(mut self, id: impl Into<String>) -> Self {
        self.connect_cluster_id = Some(id.into());
        self
    }

    pub fn with_ksql(mut self, id: impl Into<String>) -> Self {
        self.ksql_cluster_id = Some(id.into());
        self
    }

    /// The single non-empty sub-cluster id, if any
    ///
    /// # Errors
    ///
    /// Returns a validation error when more than one sub-cluster id is set.
    pub fn selected_sub_cluster(&self) -> Result<Option<(ClusterType, &str)>> {
        let candidates = [
            (ClusterType::SchemaRegistry, &self.schema_registry_cluster_id),
            (ClusterType::Connect, &self.connect_cluster_id),
            (ClusterType::Ksql, &self.ksql_cluster_id),
        ];
        let mut selected = candidates
            .into_iter()
            .filter_map(|(t, id)| id.as_deref().filter(|s| !s.is_empty()).map(|s| (t, s)));

        let first = selected.next();
        if selected.next().is_some() {
            return Err(OperatorError::ValidationError(
                "cannot specify schema_registry_cluster_id, connect_cluster_id \
                 and ksql_cluster_id at the same time"
                    .to_string(),
            ));
        }
        Ok(first)
    }

    /// Resolve the scope, optionally against an explicitly declared cluster type
    ///
    /// Without a declared type the scope is inferred: the set sub-cluster id
    /// wins, otherwise the Kafka cluster.
    pub fn resolve(&self, declared: Option<ClusterType>) -> Result<ResourceScope> {
        let selected = self.selected_sub_cluster()?;

        match (declared, selected) {
            (None, None) | (Some(ClusterType::Kafka), None) => {
                ResourceScope::kafka(&self.kafka_cluster_id)
            }
            (Some(ClusterType::Kafka), Some((other, _))) => {
                Err(OperatorError::ValidationError(format!(
                    "{} must not be set for a Kafka scope",
                    other.id_parameter()
                )))
            }
            (None, Some((cluster_type, id))) => {
                ResourceScope::sub_cluster(cluster_type, &self.kafka_cluster_id, id)
            }
            (Some(declared), Some((cluster_type, id))) if declared == cluster_type => {
                ResourceScope::sub_cluster(cluster_type, &self.kafka_cluster_id, id)
            }
            (Some(declared), _) => Err(OperatorError::ValidationError(format!(
                "missing parameter: {}",
                declared.id_parameter()
            ))),
        }
    }
}

// ============================================================================
// Roles and patterns
// ============================================================================

/// Predefined role a principal can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    AuditAdmin,
    ClusterAdmin,
    DeveloperManage,
    DeveloperRead,
    DeveloperWrite,
    Operator,
    ResourceOwner,
    SecurityAdmin,
    SystemAdmin,
    UserAdmin,
}

impl Role {
    pub const ALL: [Role; 10] = [
        Role::AuditAdmin,
        Role::ClusterAdmin,
        Role::DeveloperManage,
        Role::DeveloperRead,
        Role::DeveloperWrite,
        Role::Operator,
        Role::ResourceOwner,
        Role::SecurityAdmin,
        Role::SystemAdmin,
        Role::UserAdmin,
    ];

    /// Roles that may be narrowed to a resource pattern
    pub const SCOPE_ROLES: [Role; 4] = [
        Role::DeveloperRead,
        Role::DeveloperWrite,
        Role::DeveloperManage,
        Role::ResourceOwner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::AuditAdmin => "AuditAdmin",
            Role::ClusterAdmin => "ClusterAdmin",
            Role::DeveloperManage => "DeveloperManage",
            Role::DeveloperRead => "DeveloperRead",
            Role::DeveloperWrite => "DeveloperWrite",
            Role::Operator => "Operator",
            Role::ResourceOwner => "ResourceOwner",
            Role::SecurityAdmin => "SecurityAdmin",
            Role::SystemAdmin => "SystemAdmin",
            Role::UserAdmin => "UserAdmin",
        }
    }

    pub fn is_scope_role(&self) -> bool {
        Role::SCOPE_ROLES.contains(self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| OperatorError::ValidationError(format!("unknown role '{}'", s)))
    }
}

/// How a resource pattern name is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PatternType {
    Literal,
    Prefixed,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Literal => "LITERAL",
            PatternType::Prefixed => "PREFIXED",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LITERAL" => Ok(PatternType::Literal),
            "PREFIXED" => Ok(PatternType::Prefixed),
            _ => Err(OperatorError::ValidationError(format!(
                "pattern type must be LITERAL or PREFIXED, got '{}'",
                s
            ))),
        }
    }
}

/// Resource a scoped role binding is narrowed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePattern {
    resource_type: String,
    name: String,
    pattern_type: PatternType,
}

impl ResourcePattern {
    pub fn new(
        resource_type: impl Into<String>,
        name: impl Into<String>,
        pattern_type: PatternType,
    ) -> Result<Self> {
        let resource_type = resource_type.into();
        let name = name.into();
        check_identifier("resource_type", &resource_type)?;
        check_identifier("name", &name)?;
        Ok(Self {
            resource_type,
            name,
            pattern_type,
        })
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pattern_type(&self) -> PatternType {
        self.pattern_type
    }
}

/// A `User:` or `Group:` principal free of the identity delimiter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn parse(value: &str) -> Result<Self> {
        validate_principal(value).map_err(|e| {
            OperatorError::ValidationError(
                e.message
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid principal '{}'", value)),
            )
        })?;
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Desired-state records
// ============================================================================

/// Desired state of a topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    /// Kafka cluster the topic lives in
    #[validate(custom(function = "validate_identifier"))]
    pub cluster_id: String,

    /// Topic name (immutable)
    #[validate(custom(function = "validate_identifier"))]
    pub name: String,

    /// Number of partitions; can only grow
    #[validate(range(min = 1, message = "partitions must be at least 1"))]
    pub partitions: i32,

    /// Replication factor; 0 leaves replica placement to the cluster
    #[serde(default)]
    #[validate(range(min = 0, message = "replication factor must not be negative"))]
    pub replication_factor: i16,

    /// Topic configuration overrides
    #[serde(default)]
    #[validate(custom(function = "validate_topic_config"))]
    pub config: BTreeMap<String, String>,
}

impl TopicSpec {
    pub fn new(cluster_id: impl Into<String>, name: impl Into<String>, partitions: i32) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            name: name.into(),
            partitions,
            replication_factor: 0,
            config: BTreeMap::new(),
        }
    }

    pub fn with_replication_factor(mut self, replication_factor: i16) -> Self {
        self.replication_factor = replication_factor;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Whether replica placement is managed by placement constraints
    pub fn placement_constrained(&self) -> bool {
        self.config.contains_key(PLACEMENT_CONSTRAINTS_CONFIG)
    }

    /// Replication factor actually sent to the cluster
    pub fn effective_replication_factor(&self) -> i16 {
        if self.placement_constrained() {
            0
        } else {
            self.replication_factor
        }
    }

    /// Replication factor convergence should check, if this topic manages it
    pub fn expected_replication_factor(&self) -> Option<i16> {
        Some(self.effective_replication_factor()).filter(|rf| *rf > 0)
    }
}

/// Cluster-wide role binding, optionally on a sub-cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBindingSpec {
    #[validate(custom(function = "validate_principal"))]
    pub principal: String,

    pub role: Role,

    pub cluster_type: ClusterType,

    #[serde(flatten)]
    #[validate(nested)]
    pub clusters: ClusterIds,
}

/// Role binding narrowed to a named resource pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRoleBindingSpec {
    #[validate(custom(function = "validate_principal"))]
    pub principal: String,

    #[validate(custom(function = "validate_scope_role"))]
    pub role: Role,

    #[serde(flatten)]
    #[validate(nested)]
    pub clusters: ClusterIds,

    /// e.g. `Topic`, `Group`, `Subject`, `Connector`
    #[validate(custom(function = "validate_identifier"))]
    pub resource_type: String,

    #[validate(custom(function = "validate_identifier"))]
    pub name: String,

    pub pattern_type: PatternType,
}

/// Any desired role binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RoleBindingSpec {
    Cluster(ClusterRoleBindingSpec),
    Resource(ResourceRoleBindingSpec),
}

impl RoleBindingSpec {
    /// Run field validation, joining every failure into one error
    pub fn check(&self) -> Result<()> {
        match self {
            RoleBindingSpec::Cluster(spec) => check_valid(spec),
            RoleBindingSpec::Resource(spec) => check_valid(spec),
        }
    }
}

// ============================================================================
// Observed state
// ============================================================================

/// Topic as read back from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicState {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    pub config: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

// ============================================================================
// Validation helpers
// ============================================================================

/// Validate a record and fold its field errors into one message
pub fn check_valid<T: Validate>(record: &T) -> Result<()> {
    record
        .validate()
        .map_err(|errors| OperatorError::ValidationError(describe_errors(&errors)))
}

fn describe_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .errors()
        .iter()
        .flat_map(|(field, kind)| match kind {
            validator::ValidationErrorsKind::Field(errs) => errs
                .iter()
                .map(|e| match &e.message {
                    Some(m) => format!("{}: {}", field, m),
                    None => format!("{}: {}", field, e.code),
                })
                .collect::<Vec<_>>(),
            validator::ValidationErrorsKind::Struct(inner) => vec![describe_errors(inner)],
            validator::ValidationErrorsKind::List(items) => {
                items.values().map(|inner| describe_errors(inner)).collect()
            }
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

fn check_identifier(field: &str, value: &str) -> Result<()> {
    validate_identifier(value).map_err(|e| {
        OperatorError::ValidationError(format!(
            "{}: {}",
            field,
            e.message.map(|m| m.to_string()).unwrap_or_default()
        ))
    })
}

fn validate_identifier(value: &str) -> std::result::Result<(), ValidationError> {
    if value.is_empty() {
        return Err(
            ValidationError::new("empty_identifier").with_message("must not be empty".into())
        );
    }
    if value.contains(IDENTITY_DELIMITER) {
        return Err(ValidationError::new("reserved_delimiter")
            .with_message(format!("'{}' must not contain '{}'", value, IDENTITY_DELIMITER).into()));
    }
    Ok(())
}

fn validate_topic_config(
    config: &BTreeMap<String, String>,
) -> std::result::Result<(), ValidationError> {
    if let Some(constraints) = config.get(PLACEMENT_CONSTRAINTS_CONFIG) {
        match serde_json::from_str::<serde_json::Value>(constraints) {
            Ok(value) if value.is_object() => {}
            _ => {
                return Err(ValidationError::new("invalid_placement_constraints").with_message(
                    format!("{} must be a JSON object", PLACEMENT_CONSTRAINTS_CONFIG).into(),
                ))
            }
        }
    }
    Ok(())
}

fn validate_principal(principal: &str) -> std::result::Result<(), ValidationError> {
    if PRINCIPAL_REGEX.is_match(principal) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_principal").with_message(
            format!(
                "principal must start with User: or Group: and must not contain '|', got '{}'",
                principal
            )
            .into(),
        ))
    }
}

fn validate_scope_role(role: &Role) -> std::result::Result<(), ValidationError> {
    if role.is_scope_role() {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_scope_role").with_message(
            format!(
                "{} cannot be bound to a resource pattern; expected one of \
                 DeveloperRead, DeveloperWrite, DeveloperManage, ResourceOwner",
                role
            )
            .into(),
        ))
    }
}
