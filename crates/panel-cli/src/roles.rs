//! Scripted role collaborator
//!
//! Stands in for real analyst services: each role id maps to a canned
//! assessment loaded from JSON.

use async_trait::async_trait;
use panel_core::{Error, Result, RoleAssessment, RoleInvoker, RoleRequest};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
struct Answer {
    recommendation: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

pub struct ScriptedRoles {
    answers: HashMap<String, Answer>,
}

impl ScriptedRoles {
    /// Load `{ "role_id": { "recommendation", "confidence", "rationale" } }`
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let answers = serde_json::from_str(text)?;
        Ok(Self { answers })
    }

    /// Answers used by the built-in demo
    pub fn demo() -> Self {
        let answers = [
            ("technical", "buy", 0.78, "Price broke above the 50-day average on rising volume, bullish trend"),
            ("fundamental", "buy", 0.72, "Margins are expanding and the valuation is reasonable against peers"),
            ("news", "hold", 0.55, "Coverage is mixed, regulatory headlines keep the outlook neutral"),
            ("bull", "buy", 0.82, "Services growth and buybacks support further upside, strong buy"),
            ("bear", "sell", 0.48, "Hardware demand is slowing and the multiple is stretched, downside risk"),
            ("arbiter", "hold", 0.7, "objectivity: 0.75\nreliability: 0.65\nBoth sides cite evidence"),
        ];
        Self {
            answers: answers
                .into_iter()
                .map(|(role, recommendation, confidence, rationale)| {
                    (
                        role.to_string(),
                        Answer {
                            recommendation: recommendation.to_string(),
                            confidence,
                            rationale: rationale.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }
}

#[async_trait]
impl RoleInvoker for ScriptedRoles {
    async fn invoke(&self, request: RoleRequest) -> Result<RoleAssessment> {
        debug!(role_id = %request.role_id, prompt_len = request.prompt.len(), "Scripted role invoked");
        let answer = self.answers.get(&request.role_id).ok_or_else(|| Error::Role {
            role_id: request.role_id.clone(),
            message: "no scripted answer for this role".to_string(),
        })?;
        Ok(RoleAssessment::new(
            request.role_id,
            answer.recommendation.clone(),
            answer.confidence,
            answer.rationale.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_scripted_answers() {
        let roles = ScriptedRoles::from_json(
            r#"{ "macro": { "recommendation": "reduce", "confidence": 0.4 } }"#,
        )
        .unwrap();

        let answer = roles.invoke(RoleRequest::new("macro", "Assess")).await.unwrap();
        assert_eq!(answer.recommendation, "reduce");
        assert!(answer.rationale.is_empty());

        assert_err!(roles.invoke(RoleRequest::new("technical", "Assess")).await);
    }

    #[tokio::test]
    async fn test_demo_covers_panel() {
        let roles = ScriptedRoles::demo();
        for role in ["technical", "fundamental", "news", "bull", "bear", "arbiter"] {
            assert!(roles.invoke(RoleRequest::new(role, "Assess")).await.is_ok());
        }
    }
}
