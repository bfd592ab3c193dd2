//! Role-invocation collaborator
//!
//! A role is an external specialist (technical analyst, fundamental analyst,
//! news analyst, ...) that turns a prompt and context into a structured
//! assessment. The engine treats it as opaque.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Request sent to a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRequest {
    pub role_id: String,
    pub prompt: String,
    /// Context snapshot the role may consult
    #[serde(default)]
    pub context: Value,
}

impl RoleRequest {
    pub fn new(role_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            prompt: prompt.into(),
            context: Value::Null,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Structured output of a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssessment {
    pub role_id: String,
    /// Free-form recommendation, e.g. "buy", "hold", "reduce exposure"
    pub recommendation: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub rationale: String,
}

impl RoleAssessment {
    /// Build an assessment, clamping confidence into [0, 1]
    pub fn new(
        role_id: impl Into<String>,
        recommendation: impl Into<String>,
        confidence: f64,
        rationale: impl Into<String>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            role_id: role_id.into(),
            recommendation: recommendation.into(),
            confidence,
            rationale: rationale.into(),
        }
    }
}

/// Trait for the external role collaborator
///
/// Any error returned here surfaces as a node failure in the engine.
#[async_trait]
pub trait RoleInvoker: Send + Sync {
    async fn invoke(&self, request: RoleRequest) -> Result<RoleAssessment>;
}
