//! Gateway integration tests
//!
//! End-to-end tests through the public API: configuration, the decision
//! cycle, the wire response, and the audit trail feeding the memory and
//! JSONL sinks.

use anzen_core::audit::{
    AuditAction, AuditPersistence, AuditQueryFilter, ComplianceReport, MemorySink,
    PersistenceConfig, ReportScope, RetryPolicy,
};
use anzen_core::engine::RiskLevel;
use anzen_core::wire::CheckResponse;
use anzen_core::{
    Action, AnzenConfig, AssessRequest, Direction, Gateway, RawEntity, RawScore, ReasonCode,
    Route,
};
use std::sync::Arc;

const CONFIG: &str = r#"
policies = {
  "public:chat" = {
    block_entities  = ["US_SSN", "CREDIT_CARD"]
    redact_entities = ["EMAIL_ADDRESS", "PERSON", "PHONE_NUMBER"]
    risk_threshold  = 0.7
  }
  "private:support" = {
    redact_entities   = ["*"]
    risk_threshold    = 0.9
    rejection_message = "Request rejected"
  }
}

audit {
  hash_key = "integration-test-key-0123456789"
}

safety {
  weight_per_hit = 0.5
  dimensions = {
    toxicity = ["idiot", "moron"]
  }
}
"#;

fn test_gateway() -> Gateway {
    Gateway::from_config(&AnzenConfig::parse(CONFIG).unwrap()).unwrap()
}

fn request(text: &str, route: &str, pii: Vec<RawEntity>) -> AssessRequest {
    AssessRequest {
        text: text.to_string(),
        route: route.to_string(),
        pii_findings: pii,
        ..Default::default()
    }
}

// ─── Scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn test_ssn_is_blocked_with_pii_detected() {
    let gateway = test_gateway();
    let sink = Arc::new(MemorySink::new(16));
    let handle = gateway.trail().spawn_sink(sink.clone(), RetryPolicy::default());

    let assessment = gateway.assess(request(
        "My SSN is 123-45-6789",
        "public:chat",
        vec![RawEntity::new("US_SSN", 0.95, 10, 21)],
    ));
    assert_eq!(assessment.decision.action, Action::Block);
    assert!(assessment.decision.safe_text.is_none());

    drop(gateway);
    handle.await.unwrap();

    let log = sink.log().read().await;
    let record = log.recent(1)[0];
    assert_eq!(record.reason, ReasonCode::PiiDetected);
    assert_eq!(record.decision, Action::Block);
    assert_eq!(record.policy_applied, "public:chat");
}

#[test]
fn test_email_is_redacted() {
    let gateway = test_gateway();
    let assessment = gateway.assess(request(
        "Email me at john@example.com",
        "public:chat",
        vec![RawEntity::new("EMAIL_ADDRESS", 0.8, 12, 28)],
    ));
    assert_eq!(assessment.decision.action, Action::Redact);
    assert_eq!(
        assessment.decision.safe_text.as_deref(),
        Some("Email me at [EMAIL_ADDRESS]")
    );
}

#[test]
fn test_clean_text_is_allowed_verbatim() {
    let gateway = test_gateway();
    let text = "What's the weather in Paris?";
    let assessment = gateway.assess(request(text, "public:chat", Vec::new()));
    assert_eq!(assessment.decision.action, Action::Allow);
    assert_eq!(assessment.decision.safe_text.as_deref(), Some(text));
    assert_eq!(assessment.decision.reason, ReasonCode::Clean);
}

#[test]
fn test_overlapping_spans_mask_higher_confidence() {
    let gateway = test_gateway();
    let text = "Contact: jane.doe.smith@example.org today";
    let assessment = gateway.assess(request(
        text,
        "public:chat",
        vec![
            RawEntity::new("EMAIL_ADDRESS", 0.95, 10, 30),
            RawEntity::new("PERSON", 0.70, 15, 25),
        ],
    ));

    let decision = &assessment.decision;
    assert_eq!(decision.action, Action::Redact);
    assert_eq!(decision.conflicts.len(), 1);
    assert_eq!(decision.conflicts[0].kept_label, "EMAIL_ADDRESS");
    assert_eq!(decision.conflicts[0].dropped_label, "PERSON");

    let safe = decision.safe_text.as_deref().unwrap();
    assert_eq!(safe, format!("{}[EMAIL_ADDRESS]{}", &text[..10], &text[30..]));
    assert!(!safe.contains("[PERSON]"));
}

#[test]
fn test_unknown_route_uses_restrictive_default() {
    let gateway = test_gateway();
    let policy = gateway.resolver().resolve(&Route::parse("foo:bar"));
    assert_eq!(policy.id, "default");
    assert_eq!(policy.risk_threshold, 0.0);

    let assessment = gateway.assess(request(
        "Call Jane Smith",
        "foo:bar",
        vec![RawEntity::new("PERSON", 0.6, 5, 15)],
    ));
    assert_eq!(assessment.decision.action, Action::Block);
    assert_eq!(assessment.decision.policy_id, "default");
}

// ─── Safety Scores ───────────────────────────────────────────────

#[test]
fn test_safety_score_above_threshold_blocks() {
    let gateway = test_gateway();
    let assessment = gateway.assess(AssessRequest {
        text: "some text".into(),
        route: "public:chat".into(),
        safety_findings: vec![RawScore::new("toxicity", 0.75)],
        ..Default::default()
    });
    assert_eq!(assessment.decision.action, Action::Block);
    assert_eq!(assessment.decision.reason, ReasonCode::UnsafeContent);
}

#[tokio::test]
async fn test_lexicon_scorer_feeds_decision() {
    let gateway = test_gateway();
    let assessment = gateway
        .check("You idiot, you moron", "public:chat", "en", Direction::Input, None)
        .await;
    assert_eq!(assessment.decision.action, Action::Block);
    assert_eq!(assessment.decision.risk_level, RiskLevel::High);
}

// ─── Wire Response ───────────────────────────────────────────────

#[tokio::test]
async fn test_wire_response_shape() {
    let gateway = test_gateway();
    let assessment = gateway
        .check(
            "Email me at john@example.com",
            "public:chat",
            "en",
            Direction::Input,
            None,
        )
        .await;
    let response = CheckResponse::from_assessment(&assessment, "en");
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["decision"], "REDACT");
    assert_eq!(json["safe_text"], "Email me at [EMAIL_ADDRESS]");
    assert_eq!(json["entities"][0]["type"], "EMAIL_ADDRESS");
    assert_eq!(json["entities"][0]["location"], "12-28");
    assert_eq!(json["entities"][0]["action"], "REDACT");
    assert_eq!(json["risk_level"], "high");
    assert_eq!(json["metadata"]["reason"], "PII_REDACTED");
    assert_eq!(json["metadata"]["policy_id"], "public:chat");
    assert_eq!(json["trace_id"], assessment.trace_id.as_str());
}

#[tokio::test]
async fn test_wire_response_substitutes_rejection_message() {
    let gateway = test_gateway();
    let assessment = gateway
        .check("You absolute moron idiot", "private:support", "en", Direction::Output, None)
        .await;
    let response = CheckResponse::from_assessment(&assessment, "en");
    assert_eq!(response.decision, Action::Block);
    assert_eq!(response.safe_text, "Request rejected");
}

// ─── Audit Trail ─────────────────────────────────────────────────

#[tokio::test]
async fn test_audit_records_never_contain_raw_pii() {
    let gateway = test_gateway();
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(
        AuditPersistence::new(dir.path(), PersistenceConfig::default())
            .await
            .unwrap(),
    );
    let handle = gateway
        .trail()
        .spawn_sink(persistence.clone(), RetryPolicy::default());

    let payloads = [
        "My SSN is 123-45-6789",
        "Email me at john@example.com",
        "Call John Smith at 555-123-4567",
        "Card 4111 1111 1111 1111 please",
    ];
    for text in payloads {
        gateway
            .check(text, "public:chat", "en", Direction::Input, None)
            .await;
    }
    drop(gateway);
    handle.await.unwrap();

    let raw = std::fs::read_to_string(persistence.dir().join("audit.jsonl")).unwrap();
    assert_eq!(raw.lines().count(), payloads.len());
    for secret in [
        "123-45-6789",
        "john@example.com",
        "John Smith",
        "555-123-4567",
        "4111 1111 1111 1111",
    ] {
        assert!(!raw.contains(secret), "audit trail leaked {secret}");
    }

    let records = persistence.export_all().await;
    assert!(records.iter().all(|r| r.entities_detected.iter().all(|e| e.hash.len() == 64)));
}

#[tokio::test]
async fn test_lifecycle_report() {
    let gateway = test_gateway();
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(
        AuditPersistence::new(dir.path(), PersistenceConfig::default())
            .await
            .unwrap(),
    );
    let handle = gateway
        .trail()
        .spawn_sink(persistence.clone(), RetryPolicy::default());

    gateway.assess(request("hello there", "public:chat", Vec::new()));
    gateway.assess(request(
        "Email me at john@example.com",
        "public:chat",
        vec![RawEntity::new("EMAIL_ADDRESS", 0.8, 12, 28)],
    ));
    gateway.assess(request(
        "My SSN is 123-45-6789",
        "public:chat",
        vec![RawEntity::new("US_SSN", 0.95, 10, 21)],
    ));
    gateway.assess(request("ticket 42", "private:support", Vec::new()));
    drop(gateway);
    handle.await.unwrap();

    let records = persistence.export_all().await;
    let report = ComplianceReport::build(
        &records,
        &ReportScope {
            route: Some("public:*".into()),
            ..Default::default()
        },
    );
    assert_eq!(report.total_requests, 3);
    assert_eq!(report.blocked_requests, 1);
    assert_eq!(report.redacted_requests, 1);
    assert_eq!(report.pii_types["US_SSN"], 1);

    let inputs = persistence
        .query(&AuditQueryFilter {
            action: Some(AuditAction::AssessInput),
            route: Some("private:*".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(inputs.len(), 1);
}

// ─── Hot Reload ──────────────────────────────────────────────────

#[test]
fn test_reload_changes_decisions_for_new_requests() {
    let gateway = test_gateway();
    let before = gateway.resolver().snapshot();

    let mut next = AnzenConfig::parse(CONFIG).unwrap();
    next.policies.get_mut("public:chat").unwrap().block_entities =
        vec!["EMAIL_ADDRESS".into()];
    gateway.resolver().reload(&next).unwrap();

    let assessment = gateway.assess(request(
        "Email me at john@example.com",
        "public:chat",
        vec![RawEntity::new("EMAIL_ADDRESS", 0.8, 12, 28)],
    ));
    assert_eq!(assessment.decision.action, Action::Block);

    // a snapshot captured before the reload still sees the old rules
    let old = before.resolve(&Route::parse("public:chat"));
    assert!(!old.block_entities.contains("EMAIL_ADDRESS"));
}
