//! Adversarial bull/bear debate and synthesis with the panel
//!
//! Two one-sided roles argue the strongest bullish and bearish cases against
//! the same evidence at the same time. Their gap is then combined with the
//! panel debate and, optionally, an arbiter's scores into one verdict.

use panel_core::{RoleAssessment, RoleInvoker, RoleRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::arbiter::ArbiterVerdict;
use crate::engine::DebateOutcome;
use crate::error::{DebateError, Result};
use crate::prompts;
use crate::stance::Stance;

const SIDE_THRESHOLD: f64 = 0.1;
const GAP_MARKER_THRESHOLD: f64 = 0.3;
const LOW_CONSENSUS_THRESHOLD: f64 = 0.6;

mod weights {
    pub const BULL_BEAR: f64 = 0.4;
    pub const PANEL: f64 = 0.3;
    pub const ARBITER: f64 = 0.3;
}

/// Runs the bull and bear roles concurrently
pub struct BullBearDebate {
    roles: Arc<dyn RoleInvoker>,
    bull_role: String,
    bear_role: String,
}

impl BullBearDebate {
    pub fn new(
        roles: Arc<dyn RoleInvoker>,
        bull_role: impl Into<String>,
        bear_role: impl Into<String>,
    ) -> Self {
        Self {
            roles,
            bull_role: bull_role.into(),
            bear_role: bear_role.into(),
        }
    }

    pub async fn run(&self, subject: &str, evidence: &str) -> Result<BullBearOutcome> {
        let vars = json!({ "subject": subject, "evidence": evidence });
        let bull_prompt = prompts::render(prompts::BULL_CASE, &vars)?;
        let bear_prompt = prompts::render(prompts::BEAR_CASE, &vars)?;

        let context = json!({ "subject": subject, "evidence": evidence });
        let bull_request =
            RoleRequest::new(self.bull_role.clone(), bull_prompt).with_context(context.clone());
        let bear_request = RoleRequest::new(self.bear_role.clone(), bear_prompt).with_context(context);

        let (bull, bear) = tokio::join!(
            self.roles.invoke(bull_request),
            self.roles.invoke(bear_request)
        );

        let bull = bull.map_err(|e| DebateError::Role {
            role_id: self.bull_role.clone(),
            message: e.to_string(),
        })?;
        let bear = bear.map_err(|e| DebateError::Role {
            role_id: self.bear_role.clone(),
            message: e.to_string(),
        })?;

        let outcome = BullBearOutcome::new(bull, bear);
        info!(
            subject = %subject,
            bull = outcome.bull.confidence,
            bear = outcome.bear.confidence,
            dominant = %outcome.dominant_side,
            "Bull/bear debate finished"
        );
        Ok(outcome)
    }
}

/// Result of the adversarial pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BullBearOutcome {
    pub bull: RoleAssessment,
    pub bear: RoleAssessment,
    /// `|bull - bear|`; the direction is in `dominant_side`
    pub confidence_difference: f64,
    pub dominant_side: Stance,
    /// `min(1, 2 * |difference|)`
    pub debate_intensity: f64,
}

impl BullBearOutcome {
    pub fn new(bull: RoleAssessment, bear: RoleAssessment) -> Self {
        let difference = bull.confidence - bear.confidence;
        let dominant_side = if difference > SIDE_THRESHOLD {
            Stance::Bullish
        } else if difference < -SIDE_THRESHOLD {
            Stance::Bearish
        } else {
            Stance::Neutral
        };
        Self {
            confidence_difference: difference.abs(),
            dominant_side,
            debate_intensity: (2.0 * difference.abs()).min(1.0),
            bull,
            bear,
        }
    }

    pub fn gap(&self) -> f64 {
        self.confidence_difference
    }

    pub fn mean_confidence(&self) -> f64 {
        (self.bull.confidence + self.bear.confidence) / 2.0
    }
}

/// Why the combined result should be read with care
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DisagreementMarker {
    /// Bull and bear confidences are far apart
    BullBearGap(f64),
    /// The panel did not converge
    LowPanelConsensus(f64),
}

/// Bull/bear outcome combined with the panel debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    /// `(mean(bull, bear) + panel consensus) / 2`
    pub combined_confidence: f64,
    pub markers: Vec<DisagreementMarker>,
}

pub fn synthesize(bull_bear: &BullBearOutcome, panel: &DebateOutcome) -> Synthesis {
    let combined_confidence = (bull_bear.mean_confidence() + panel.consensus_level) / 2.0;

    let mut markers = Vec::new();
    if bull_bear.gap() > GAP_MARKER_THRESHOLD {
        markers.push(DisagreementMarker::BullBearGap(bull_bear.gap()));
    }
    if panel.consensus_level < LOW_CONSENSUS_THRESHOLD {
        markers.push(DisagreementMarker::LowPanelConsensus(panel.consensus_level));
    }

    Synthesis {
        combined_confidence,
        markers,
    }
}

/// Blend of bull/bear, panel and arbiter scores
///
/// Weights are 0.4 / 0.3 / 0.3. Without an arbiter the remaining two weights
/// are renormalised.
pub fn final_confidence(bull_bear_mean: f64, panel_consensus: f64, arbiter: Option<f64>) -> f64 {
    let blended = match arbiter {
        Some(arbiter) => {
            weights::BULL_BEAR * bull_bear_mean
                + weights::PANEL * panel_consensus
                + weights::ARBITER * arbiter
        }
        None => {
            (weights::BULL_BEAR * bull_bear_mean + weights::PANEL * panel_consensus)
                / (weights::BULL_BEAR + weights::PANEL)
        }
    };
    blended.clamp(0.0, 1.0)
}

/// The single recommendation produced by a full panel review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub subject: String,
    pub stance: Stance,
    pub final_confidence: f64,
    pub synthesis: Synthesis,
    pub arbiter: Option<ArbiterVerdict>,
}

impl Verdict {
    /// Combine the three sources of evidence
    ///
    /// The stance is the first directional one of: the arbiter's, the
    /// dominant bull/bear side, the panel majority.
    pub fn new(
        panel: &DebateOutcome,
        bull_bear: &BullBearOutcome,
        arbiter: Option<ArbiterVerdict>,
    ) -> Self {
        let stance = arbiter
            .as_ref()
            .map(|a| a.stance)
            .into_iter()
            .chain([bull_bear.dominant_side])
            .find(|s| matches!(s, Stance::Bullish | Stance::Bearish))
            .unwrap_or(panel.majority_stance);
        let final_confidence = final_confidence(
            bull_bear.mean_confidence(),
            panel.consensus_level,
            arbiter.as_ref().map(ArbiterVerdict::score),
        );
        Self {
            subject: panel.subject.clone(),
            stance,
            final_confidence,
            synthesis: synthesize(bull_bear, panel),
            arbiter,
        }
    }
}
