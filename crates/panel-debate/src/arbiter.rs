//! Independent arbiter scoring

use async_trait::async_trait;
use panel_core::{RoleInvoker, RoleRequest};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::adversarial::BullBearOutcome;
use crate::engine::DebateOutcome;
use crate::error::{DebateError, Result};
use crate::prompts;
use crate::stance::{self, Stance};

/// Objectivity and reliability scores, each in [0, 1], plus the arbiter's
/// own reading of the debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterVerdict {
    pub objectivity: f64,
    pub reliability: f64,
    pub stance: Stance,
    pub rationale: String,
}

impl ArbiterVerdict {
    /// Mean of objectivity and reliability
    pub fn score(&self) -> f64 {
        (self.objectivity + self.reliability) / 2.0
    }
}

/// Third party that reviews a finished debate
#[async_trait]
pub trait Arbiter: Send + Sync {
    async fn review(
        &self,
        subject: &str,
        bull_bear: &BullBearOutcome,
        panel: &DebateOutcome,
    ) -> Result<ArbiterVerdict>;
}

/// Arbiter backed by a role
///
/// Scores are read from `objectivity: x` / `reliability: y` lines in the
/// role's answer; a missing score falls back to the role's confidence.
pub struct RoleArbiter {
    roles: Arc<dyn RoleInvoker>,
    role_id: String,
}

impl RoleArbiter {
    pub fn new(roles: Arc<dyn RoleInvoker>, role_id: impl Into<String>) -> Self {
        Self {
            roles,
            role_id: role_id.into(),
        }
    }
}

#[async_trait]
impl Arbiter for RoleArbiter {
    async fn review(
        &self,
        subject: &str,
        bull_bear: &BullBearOutcome,
        panel: &DebateOutcome,
    ) -> Result<ArbiterVerdict> {
        let prompt = prompts::render(
            prompts::ARBITER,
            json!({
                "subject": subject,
                "bull": bull_bear.bull,
                "bear": bull_bear.bear,
                "panel_consensus": panel.consensus_level,
            }),
        )?;

        let assessment = self
            .roles
            .invoke(RoleRequest::new(self.role_id.clone(), prompt))
            .await
            .map_err(|e| DebateError::Role {
                role_id: self.role_id.clone(),
                message: e.to_string(),
            })?;

        let text = format!("{}\n{}", assessment.recommendation, assessment.rationale);
        let objectivity = parse_score(&text, "objectivity").unwrap_or(assessment.confidence);
        let reliability = parse_score(&text, "reliability").unwrap_or(assessment.confidence);
        let stance = stance::classify(&text);
        debug!(role_id = %self.role_id, objectivity, reliability, %stance, "Arbiter scored debate");

        Ok(ArbiterVerdict {
            objectivity,
            reliability,
            stance,
            rationale: assessment.rationale,
        })
    }
}

fn parse_score(text: &str, label: &str) -> Option<f64> {
    let pattern = Regex::new(&format!(r"(?i)\b{label}\s*[:=]\s*([0-9]*\.?[0-9]+)")).ok()?;
    let value: f64 = pattern.captures(text)?.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 1.0))
}
