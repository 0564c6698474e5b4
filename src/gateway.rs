//! End-to-end decision cycle
//!
//! normalize → resolve → decide → redact → trace. The cycle itself is
//! synchronous and touches no shared mutable state other than the
//! normalizer counters; the only awaits are the optional detector calls in
//! `check`. The finished audit record is handed to the trail without
//! waiting for any sink.

use crate::audit::{
    AgentOutcome, AuditAction, AuditRecord, AuditTraceBuilder, AuditTrail, KeyedHasher,
    TraceContext, TraceId,
};
use crate::config::AnzenConfig;
use crate::detect::{EntityDetector, LexiconScorer, PatternDetector, SafetyScorer};
use crate::engine::{Action, Decision, DecisionEngine, ReasonCode, RiskLevel};
use crate::error::Result;
use crate::finding::{RawEntity, RawScore};
use crate::normalizer::{Normalizer, NormalizerStats};
use crate::policy::{Policy, PolicyResolver, Route};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Which side of the LLM call a payload is on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client → model
    #[default]
    Input,
    /// Model → client
    Output,
}

impl Direction {
    pub fn audit_action(&self) -> AuditAction {
        match self {
            Direction::Input => AuditAction::AssessInput,
            Direction::Output => AuditAction::AssessOutput,
        }
    }
}

/// Core input: a payload plus already-collected detector outputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssessRequest {
    pub text: String,
    pub route: String,
    #[serde(default)]
    pub pii_findings: Vec<RawEntity>,
    #[serde(default)]
    pub safety_findings: Vec<RawScore>,
    #[serde(default)]
    pub direction: Direction,
    /// Correlates this payload with earlier steps of the same request
    #[serde(default)]
    pub trace_id: Option<TraceId>,
}

/// Entity summary returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub confidence: f64,
    pub location: String,
    pub action: Action,
}

/// Outcome of one decision cycle
#[derive(Debug, Clone)]
pub struct Assessment {
    pub decision: Decision,
    pub trace_id: TraceId,
    pub direction: Direction,
    /// Message delivered instead of the payload on BLOCK
    pub rejection_message: String,
    pub processing_time_ms: f64,
    /// Detector entries discarded by the normalizer
    pub dropped_findings: usize,
}

impl Assessment {
    pub fn entities(&self) -> Vec<EntitySummary> {
        self.decision
            .entities()
            .map(|d| EntitySummary {
                entity_type: d.finding.label.clone(),
                confidence: d.finding.confidence,
                location: d.finding.location(),
                action: d.action,
            })
            .collect()
    }

    /// Text to forward downstream: the safe text, or the rejection message
    pub fn delivered_text(&self) -> &str {
        self.decision
            .safe_text
            .as_deref()
            .unwrap_or(&self.rejection_message)
    }
}

/// The decision pipeline with its collaborators
pub struct Gateway {
    normalizer: Normalizer,
    resolver: Arc<PolicyResolver>,
    engine: DecisionEngine,
    tracer: AuditTraceBuilder,
    trail: AuditTrail,
    detector: Option<Arc<dyn EntityDetector>>,
    scorer: Option<Arc<dyn SafetyScorer>>,
}

impl Gateway {
    pub fn new(
        resolver: Arc<PolicyResolver>,
        engine: DecisionEngine,
        tracer: AuditTraceBuilder,
        trail: AuditTrail,
    ) -> Self {
        Self {
            normalizer: Normalizer::new(),
            resolver,
            engine,
            tracer,
            trail,
            detector: None,
            scorer: None,
        }
    }

    /// Attach the detector collaborators used by `check`.
    pub fn with_detectors(
        mut self,
        detector: Arc<dyn EntityDetector>,
        scorer: Arc<dyn SafetyScorer>,
    ) -> Self {
        self.detector = Some(detector);
        self.scorer = Some(scorer);
        self
    }

    /// Assemble the pipeline with the reference detectors.
    pub fn from_config(config: &AnzenConfig) -> Result<Self> {
        let resolver = Arc::new(PolicyResolver::from_config(config)?);
        let hasher = KeyedHasher::from_config(config.audit.hash_key.as_deref())?;
        let detector = Arc::new(PatternDetector::from_config(&config.detector)?);
        let scorer = Arc::new(LexiconScorer::new(&config.safety)?);

        Ok(Self::new(
            resolver,
            DecisionEngine::new(config.risk_levels),
            AuditTraceBuilder::new(hasher),
            AuditTrail::new(config.audit.channel_capacity),
        )
        .with_detectors(detector, scorer))
    }

    pub fn resolver(&self) -> &Arc<PolicyResolver> {
        &self.resolver
    }

    pub fn trail(&self) -> &AuditTrail {
        &self.trail
    }

    pub fn normalizer_stats(&self) -> NormalizerStats {
        self.normalizer.stats()
    }

    /// Run the decision cycle over caller-supplied findings.
    pub fn assess(&self, request: AssessRequest) -> Assessment {
        let trace_id = request.trace_id.unwrap_or_else(TraceId::generate);
        let ctx = TraceContext::start(trace_id, request.route, request.direction.audit_action());
        self.run_cycle(
            ctx,
            request.direction,
            &request.text,
            &request.pii_findings,
            &request.safety_findings,
        )
    }

    /// Run both detectors on `text`, then the decision cycle.
    ///
    /// A detector error blocks the payload with `DETECTOR_FAILURE`.
    pub async fn check(
        &self,
        text: &str,
        route: &str,
        language: &str,
        direction: Direction,
        trace_id: Option<TraceId>,
    ) -> Assessment {
        let trace_id = trace_id.unwrap_or_else(TraceId::generate);
        let ctx = TraceContext::start(trace_id, route, direction.audit_action());

        let pii = async {
            match &self.detector {
                Some(detector) => detector.detect(text, language).await,
                None => Ok(Vec::new()),
            }
        };
        let safety = async {
            match &self.scorer {
                Some(scorer) => scorer.score(text).await,
                None => Ok(Vec::new()),
            }
        };
        let (pii, safety) = tokio::join!(pii, safety);

        match (pii, safety) {
            (Ok(pii), Ok(safety)) => self.run_cycle(ctx, direction, text, &pii, &safety),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(
                    trace_id = %ctx.trace_id,
                    route = %ctx.route,
                    error = %e,
                    "Detector failed, blocking payload"
                );
                let policy = self.resolver.resolve(&Route::parse(&ctx.route));
                let decision = Decision::fail_closed(
                    policy.id.clone(),
                    ReasonCode::DetectorFailure,
                    Vec::new(),
                    RiskLevel::High,
                );
                self.finish(ctx.finish(), direction, text, decision, &policy, 0)
            }
        }
    }

    /// Record an agent execution step under an existing trace id.
    pub fn record_agent_execution(&self, ctx: TraceContext, outcome: &AgentOutcome) -> AuditRecord {
        let record = self.tracer.agent_execution(outcome, &ctx.finish());
        self.trail.publish(record.clone());
        record
    }

    fn run_cycle(
        &self,
        ctx: TraceContext,
        direction: Direction,
        text: &str,
        pii: &[RawEntity],
        safety: &[RawScore],
    ) -> Assessment {
        let normalized = self.normalizer.normalize(text, pii, safety);
        let snapshot = self.resolver.snapshot();
        let policy = snapshot.resolve(&Route::parse(&ctx.route));

        let decision = catch_unwind(AssertUnwindSafe(|| {
            self.engine.decide(&normalized.findings, &policy, text)
        }))
        .unwrap_or_else(|_| {
            tracing::error!(trace_id = %ctx.trace_id, "Decision computation panicked, blocking");
            Decision::fail_closed(
                policy.id.clone(),
                ReasonCode::InternalError,
                Vec::new(),
                RiskLevel::High,
            )
        });

        self.finish(ctx.finish(), direction, text, decision, &policy, normalized.dropped)
    }

    fn finish(
        &self,
        ctx: TraceContext,
        direction: Direction,
        text: &str,
        decision: Decision,
        policy: &Policy,
        dropped_findings: usize,
    ) -> Assessment {
        let record = self.tracer.build(&decision, text, &ctx);
        let processing_time_ms = record.processing_time_ms;

        tracing::info!(
            trace_id = %ctx.trace_id,
            route = %ctx.route,
            action = ctx.action.as_str(),
            decision = %decision.action,
            reason = %decision.reason,
            risk_level = %decision.risk_level,
            policy = %decision.policy_id,
            "Payload assessed"
        );
        self.trail.publish(record);

        Assessment {
            decision,
            trace_id: ctx.trace_id,
            direction,
            rejection_message: policy.rejection_message.clone(),
            processing_time_ms,
            dropped_findings,
        }
    }
}
