//! Role binding integration tests
//!
//! Lifecycle of every binding kind (cluster, topic, subject, connector)
//! against the recording gateway, including drift and replacement.
//!
//! Run with: cargo test -p cplatform-integration-tests --test role_bindings -- --nocapture

use anyhow::Result;
use cplatform_integration_tests::fixtures::*;
use cplatform_integration_tests::helpers::*;
use cplatform_integration_tests::mocks::GatewayCall;
use cplatform_operator::error::OperatorError;
use cplatform_operator::gateway::GatewayError;
use cplatform_operator::identity::BindingIdentity;
use cplatform_operator::model::{
    ClusterIds, ClusterType, PatternType, ResourcePattern, ResourceScope, Role,
};
use tracing::info;

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_topic_binding_lifecycle() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let spec = topic_binding("User:alice", Role::DeveloperRead, "orders", PatternType::Literal);

    let identity = harness.bindings.create(&spec).await?;
    info!(identity = %identity, "Created binding");
    assert_eq!(
        identity,
        format!("{}|User:alice|DeveloperRead|Topic|orders|LITERAL", KAFKA_CLUSTER)
    );
    assert_eq!(operations(&harness.gateway.calls().await), vec!["bind"]);

    let state = harness.bindings.read(&identity).await?.expect("binding exists");
    assert_eq!(state.identity.encode(), identity);
    assert_eq!(
        state.patterns,
        vec![ResourcePattern::new("Topic", "orders", PatternType::Literal)?]
    );

    harness.bindings.delete(&identity).await?;
    assert!(harness.bindings.read(&identity).await?.is_none());

    // Already gone
    harness.bindings.delete(&identity).await?;
    assert_eq!(harness.gateway.binding_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_kafka_cluster_binding() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();

    let identity = harness
        .bindings
        .create(&kafka_cluster_binding("Group:platform-ops", Role::SystemAdmin))
        .await?;
    assert_eq!(identity, format!("Kafka|{}|Group:platform-ops|SystemAdmin", KAFKA_CLUSTER));

    match &harness.gateway.calls().await[0] {
        GatewayCall::Bind { scope, pattern, .. } => {
            assert_eq!(scope.cluster_type(), ClusterType::Kafka);
            assert!(pattern.is_none());
        }
        other => panic!("expected bind, got {:?}", other),
    }

    assert!(harness.bindings.read(&identity).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_sub_cluster_bindings() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();

    let cases = [
        (
            sub_cluster_binding(
                "User:bob",
                Role::ClusterAdmin,
                ClusterIds::kafka(KAFKA_CLUSTER).with_schema_registry("schema-registry"),
                ClusterType::SchemaRegistry,
            ),
            format!("SchemaRegistry:schema-registry|{}|User:bob|ClusterAdmin", KAFKA_CLUSTER),
        ),
        (
            sub_cluster_binding(
                "User:bob",
                Role::Operator,
                ClusterIds::kafka(KAFKA_CLUSTER).with_connect("connect-taiwan"),
                ClusterType::Connect,
            ),
            format!("Connect:connect-taiwan|{}|User:bob|Operator", KAFKA_CLUSTER),
        ),
        (
            sub_cluster_binding(
                "User:bob",
                Role::ResourceOwner,
                ClusterIds::kafka(KAFKA_CLUSTER).with_ksql("ksql-1"),
                ClusterType::Ksql,
            ),
            format!("KSQL:ksql-1|{}|User:bob|ResourceOwner", KAFKA_CLUSTER),
        ),
    ];

    for (spec, expected) in cases {
        let identity = harness.bindings.create(&spec).await?;
        assert_eq!(identity, expected);
        assert!(harness.bindings.read(&identity).await?.is_some());
    }
    assert_eq!(harness.gateway.binding_count().await, 3);
    Ok(())
}

#[tokio::test]
async fn test_subject_and_connector_bindings() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();

    let subject = harness
        .bindings
        .create(&subject_binding("User:carol", "schema-registry", "orders-"))
        .await?;
    assert_eq!(
        subject,
        format!(
            "{}|SchemaRegistry:schema-registry|User:carol|DeveloperRead|Subject|orders-|PREFIXED",
            KAFKA_CLUSTER
        )
    );

    let connector = harness
        .bindings
        .create(&connector_binding("User:carol", "connect-taiwan", "system-platform-"))
        .await?;
    assert_eq!(
        connector,
        format!(
            "{}|Connect:connect-taiwan|User:carol|DeveloperManage|Connector|system-platform-|PREFIXED",
            KAFKA_CLUSTER
        )
    );

    for identity in [&subject, &connector] {
        let state = harness.bindings.read(identity).await?.expect("binding exists");
        assert_eq!(&state.identity.encode(), identity);
    }
    Ok(())
}

#[tokio::test]
async fn test_legacy_connect_identity_reads_connect_scope() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();

    let identity = harness
        .bindings
        .create(&connector_binding("User:carol", "connect-taiwan", "system-platform-"))
        .await?;
    let legacy = identity.replace("Connect:", "ConnectClusterId:");

    let state = harness.bindings.read(&legacy).await?.expect("binding exists");
    assert_eq!(state.identity.scope().cluster_type(), ClusterType::Connect);
    assert_eq!(state.identity.encode(), identity);

    harness.bindings.delete(&legacy).await?;
    assert_eq!(harness.gateway.binding_count().await, 0);
    Ok(())
}

// ============================================================================
// DRIFT
// ============================================================================

#[tokio::test]
async fn test_out_of_band_removal_is_drift() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let identity = harness
        .bindings
        .create(&topic_binding("User:alice", Role::DeveloperWrite, "orders", PatternType::Literal))
        .await?;

    harness.gateway.revoke_out_of_band("User:alice").await;

    assert!(harness.bindings.read(&identity).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_pattern_type_mismatch_is_absent() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let scope = ResourceScope::kafka(KAFKA_CLUSTER)?;
    harness
        .gateway
        .insert_binding(
            "User:alice",
            Role::DeveloperRead,
            scope,
            Some(ResourcePattern::new("Topic", "orders", PatternType::Prefixed)?),
        )
        .await;

    let literal = format!("{}|User:alice|DeveloperRead|Topic|orders|LITERAL", KAFKA_CLUSTER);
    assert!(harness.bindings.read(&literal).await?.is_none());

    let prefixed = format!("{}|User:alice|DeveloperRead|Topic|orders|PREFIXED", KAFKA_CLUSTER);
    assert!(harness.bindings.read(&prefixed).await?.is_some());
    Ok(())
}

// ============================================================================
// UPDATE
// ============================================================================

#[tokio::test]
async fn test_unchanged_update_issues_no_calls() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let spec = topic_binding("User:alice", Role::DeveloperRead, "orders", PatternType::Literal);
    let identity = harness.bindings.create(&spec).await?;
    harness.gateway.clear_calls().await;

    let updated = harness.bindings.update(&identity, &spec, &spec).await?;

    assert_eq!(updated, identity);
    assert!(harness.gateway.calls().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_changed_binding_is_replaced() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let old = topic_binding("User:alice", Role::DeveloperRead, "orders", PatternType::Literal);
    let new = topic_binding("User:alice", Role::DeveloperRead, "payments-", PatternType::Prefixed);
    let identity = harness.bindings.create(&old).await?;
    harness.gateway.clear_calls().await;

    let replaced = harness.bindings.update(&identity, &old, &new).await?;

    assert_eq!(
        replaced,
        format!("{}|User:alice|DeveloperRead|Topic|payments-|PREFIXED", KAFKA_CLUSTER)
    );
    assert_eq!(operations(&harness.gateway.calls().await), vec!["unbind", "bind"]);
    assert!(harness.bindings.read(&identity).await?.is_none());
    assert!(harness.bindings.read(&replaced).await?.is_some());
    assert_eq!(harness.gateway.binding_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_replacement_leaves_binding() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let old = topic_binding("User:alice", Role::DeveloperRead, "orders", PatternType::Literal);
    let identity = harness.bindings.create(&old).await?;
    harness.gateway.clear_calls().await;

    let invalid = topic_binding("User:alice", Role::SystemAdmin, "orders", PatternType::Literal);
    let err = harness.bindings.update(&identity, &old, &invalid).await.unwrap_err();

    assert!(err.is_validation());
    assert!(harness.gateway.calls().await.is_empty());
    assert_eq!(harness.gateway.binding_count().await, 1);
    Ok(())
}

// ============================================================================
// REJECTION AND FAILURES
// ============================================================================

#[tokio::test]
async fn test_ambiguous_scope_rejected_without_calls() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let spec = resource_binding(
        "User:alice",
        Role::DeveloperRead,
        ClusterIds::kafka(KAFKA_CLUSTER)
            .with_schema_registry("schema-registry")
            .with_connect("connect-taiwan"),
        "Subject",
        "orders",
        PatternType::Literal,
    );

    let err = harness.bindings.create(&spec).await.unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("at the same time"));
    assert!(harness.gateway.calls().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_principals_rejected() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();

    for principal in ["alice", "User:ali|ce", "ServiceAccount:sa-1"] {
        let spec = topic_binding(principal, Role::DeveloperRead, "orders", PatternType::Literal);
        let err = harness.bindings.create(&spec).await.unwrap_err();
        assert!(err.is_validation(), "{} should be rejected", principal);
    }
    assert!(harness.gateway.calls().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_identities_rejected() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();

    for identity in [
        "",
        "orders",
        "Kafka|lkc-1|User:alice",
        "Schema:sr-1|lkc-1|User:alice|Operator",
        "lkc-1|User:alice|DeveloperRead|Topic|orders|FUZZY",
    ] {
        let err = harness.bindings.read(identity).await.unwrap_err();
        assert!(
            matches!(err.root_cause(), OperatorError::MalformedIdentity { .. }),
            "{:?} should be malformed, got {}",
            identity,
            err
        );
        assert!(harness.bindings.delete(identity).await.is_err());
    }
    assert!(harness.gateway.calls().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_bind_failure_then_retry() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let spec = topic_binding("User:alice", Role::ResourceOwner, "orders", PatternType::Literal);
    harness
        .gateway
        .fail_next("bind", GatewayError::Transient("connection reset".to_string()))
        .await;

    let err = harness.bindings.create(&spec).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(harness.gateway.binding_count().await, 0);

    let identity = harness.bindings.create(&spec).await?;
    // Repeating a successful bind is harmless
    assert_eq!(harness.bindings.create(&spec).await?, identity);
    assert_eq!(harness.gateway.binding_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn test_lookup_failure_is_not_drift() -> Result<()> {
    init_tracing();
    let harness = TestHarness::new();
    let identity = harness
        .bindings
        .create(&topic_binding("User:alice", Role::DeveloperRead, "orders", PatternType::Literal))
        .await?;
    harness
        .gateway
        .fail_next("lookup_binding", GatewayError::Fatal("401 unauthorized".to_string()))
        .await;

    let err = harness.bindings.read(&identity).await.unwrap_err();
    assert!(matches!(err.root_cause(), OperatorError::Gateway(_)));

    let decoded = BindingIdentity::decode(&identity)?;
    assert_eq!(decoded.role(), Role::DeveloperRead);
    Ok(())
}
