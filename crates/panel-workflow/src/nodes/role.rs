//! Role-invocation node
//!
//! With a single `role` the node invokes that role and stores its assessment.
//! With a `roles` list the node gathers one assessment per role concurrently
//! and debates them through the [`DebateEngine`]. Adding `bull_role` and
//! `bear_role` runs the adversarial pair as well, and `arbiter_role` scores
//! the result; the combined [`Verdict`] is stored next to the debate.
//!
//! Configuration keys:
//!
//! | key | meaning |
//! |---|---|
//! | `role` / `roles` | one role id, or a list of role ids |
//! | `prompt` | MiniJinja template rendered against the context |
//! | `subject` | MiniJinja template, defaults to the definition name |
//! | `evidence` | MiniJinja template, defaults to the rendered prompt |
//! | `max_rounds`, `mode` | per-node debate overrides |
//! | `bull_role`, `bear_role`, `arbiter_role` | adversarial synthesis |

use async_trait::async_trait;
use futures::future::join_all;
use minijinja::Environment;
use panel_core::{Error, Node, NodeKind, Result, RoleAssessment, RoleInvoker, RoleRequest, ValidationIssue};
use panel_debate::{
    Arbiter, BullBearDebate, DebateConfig, DebateEngine, DebateMode, RoleArbiter, Verdict, prompts,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};

const DEFAULT_PROMPT: &str = "Assess {{ subject }} and give a recommendation with your confidence.";

pub struct RoleExecutor {
    roles: Arc<dyn RoleInvoker>,
    debate: DebateConfig,
}

impl RoleExecutor {
    pub fn new(roles: Arc<dyn RoleInvoker>, debate: DebateConfig) -> Self {
        Self { roles, debate }
    }

    fn role_ids(node: &Node) -> Vec<String> {
        if let Some(list) = node.config.get("roles").and_then(Value::as_array) {
            return list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }
        node.config_str("role")
            .map(|r| vec![r.to_string()])
            .unwrap_or_default()
    }

    /// Debate settings after applying the node's overrides
    fn debate_config(&self, node: &Node) -> Result<DebateConfig> {
        let mut config = self.debate.clone();
        if let Some(rounds) = node.config.get("max_rounds").and_then(Value::as_u64) {
            config.max_rounds = u32::try_from(rounds).unwrap_or(u32::MAX);
        }
        if let Some(mode) = node.config.get("mode") {
            config.mode = serde_json::from_value::<DebateMode>(mode.clone())?;
        }
        config.validate()?;
        Ok(config)
    }

    async fn invoke(&self, role_id: &str, prompt: &str, context: &Value) -> Result<RoleAssessment> {
        let request = RoleRequest::new(role_id, prompt).with_context(context.clone());
        self.roles.invoke(request).await.map_err(|e| match e {
            err @ Error::Role { .. } => err,
            other => Error::Role {
                role_id: role_id.to_string(),
                message: other.to_string(),
            },
        })
    }

    async fn run_panel(
        &self,
        ctx: &NodeContext,
        role_ids: &[String],
        rendered: &Rendered,
        context: &Value,
    ) -> Result<Value> {
        let node = &ctx.node;
        let calls = role_ids
            .iter()
            .map(|role_id| self.invoke(role_id, &rendered.prompt, context));
        let mut assessments = Vec::new();
        for (role_id, result) in role_ids.iter().zip(join_all(calls).await) {
            match result {
                Ok(assessment) => assessments.push(assessment),
                Err(e) => warn!(node_id = %node.id, role_id = %role_id, error = %e, "Role left out of panel"),
            }
        }
        if assessments.is_empty() {
            return Err(Error::node(&node.id, "every panel role failed"));
        }

        let engine = DebateEngine::new(Arc::clone(&self.roles), self.debate_config(node)?);
        let debate = engine
            .run(&rendered.subject, &rendered.evidence, &assessments)
            .await?;

        let mut output = json!({
            "assessments": assessments,
            "debate": debate,
            "stance": debate.majority_stance,
            "consensus_level": debate.consensus_level,
            "confidence": debate.mean_confidence,
        });

        if let (Some(bull), Some(bear)) = (node.config_str("bull_role"), node.config_str("bear_role")) {
            let bull_bear = BullBearDebate::new(Arc::clone(&self.roles), bull, bear)
                .run(&rendered.subject, &rendered.evidence)
                .await?;

            let arbiter = match node.config_str("arbiter_role") {
                Some(arbiter_role) => Some(
                    RoleArbiter::new(Arc::clone(&self.roles), arbiter_role)
                        .review(&rendered.subject, &bull_bear, &debate)
                        .await?,
                ),
                None => None,
            };

            let verdict = Verdict::new(&debate, &bull_bear, arbiter);
            info!(
                node_id = %node.id,
                stance = %verdict.stance,
                final_confidence = verdict.final_confidence,
                markers = verdict.synthesis.markers.len(),
                "Panel verdict reached"
            );
            output["stance"] = serde_json::to_value(verdict.stance)?;
            output["confidence"] = json!(verdict.final_confidence);
            output["bull_bear"] = serde_json::to_value(&bull_bear)?;
            output["verdict"] = serde_json::to_value(&verdict)?;
        }

        Ok(output)
    }
}

struct Rendered {
    subject: String,
    prompt: String,
    evidence: String,
}

impl Rendered {
    fn from_context(ctx: &NodeContext) -> Result<Self> {
        let vars = ctx.template_vars();
        let node = &ctx.node;

        let subject = match node.config_str("subject") {
            Some(template) => prompts::render(template, &vars)?,
            None => ctx.definition.name.clone(),
        };

        let mut prompt_vars = vars;
        prompt_vars.insert("subject".to_string(), Value::from(subject.clone()));
        let prompt = prompts::render(
            node.config_str("prompt").unwrap_or(DEFAULT_PROMPT),
            &prompt_vars,
        )?;
        let evidence = match node.config_str("evidence") {
            Some(template) => prompts::render(template, &prompt_vars)?,
            None => prompt.clone(),
        };

        Ok(Self {
            subject,
            prompt,
            evidence,
        })
    }
}

#[async_trait]
impl NodeExecutor for RoleExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::RoleInvocation
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let role_ids = Self::role_ids(node);
        if role_ids.iter().all(|r| r.trim().is_empty()) {
            issues.push(ValidationIssue::node(
                &node.id,
                "'role' or 'roles' must name at least one role",
            ));
        }

        let env = Environment::new();
        for key in ["prompt", "subject", "evidence"] {
            if let Some(template) = node.config_str(key) {
                if let Err(e) = env.template_from_str(template) {
                    issues.push(ValidationIssue::node(
                        &node.id,
                        format!("'{key}' is not a valid template: {e}"),
                    ));
                }
            }
        }

        let has_bull = node.config_str("bull_role").is_some();
        let has_bear = node.config_str("bear_role").is_some();
        if has_bull != has_bear {
            issues.push(ValidationIssue::node(
                &node.id,
                "'bull_role' and 'bear_role' must be set together",
            ));
        }
        if node.config_str("arbiter_role").is_some() && !(has_bull && has_bear) {
            issues.push(ValidationIssue::node(
                &node.id,
                "'arbiter_role' requires 'bull_role' and 'bear_role'",
            ));
        }
        if has_bull && !node.config.contains_key("roles") {
            issues.push(ValidationIssue::node(
                &node.id,
                "bull/bear synthesis needs a 'roles' panel",
            ));
        }
        if let Err(e) = self.debate_config(node) {
            issues.push(ValidationIssue::node(&node.id, e.to_string()));
        }
        issues
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let rendered = Rendered::from_context(ctx)?;
        let context = Value::Object(ctx.template_vars());
        let role_ids = Self::role_ids(&ctx.node);

        let output = if ctx.node.config.contains_key("roles") {
            debug!(node_id = %ctx.node.id, roles = role_ids.len(), "Convening panel");
            self.run_panel(ctx, &role_ids, &rendered, &context).await?
        } else {
            let role_id = role_ids
                .first()
                .ok_or_else(|| Error::node(&ctx.node.id, "no role configured"))?;
            let assessment = self.invoke(role_id, &rendered.prompt, &context).await?;
            debug!(
                node_id = %ctx.node.id,
                role_id = %role_id,
                confidence = assessment.confidence,
                "Role assessed"
            );
            serde_json::to_value(&assessment)?
        };

        let mut map = Map::new();
        map.insert(ctx.node.output_key().to_string(), output);
        Ok(NodeExecutionResult::success(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::node_context;
    use mockall::mock;

    mock! {
        pub Roles {}

        #[async_trait]
        impl RoleInvoker for Roles {
            async fn invoke(&self, request: RoleRequest) -> panel_core::Result<RoleAssessment>;
        }
    }

    fn executor(roles: MockRoles) -> RoleExecutor {
        RoleExecutor::new(Arc::new(roles), DebateConfig::default())
    }

    #[tokio::test]
    async fn test_single_role_renders_prompt() {
        let mut roles = MockRoles::new();
        roles
            .expect_invoke()
            .withf(|r| r.role_id == "technical" && r.prompt == "Assess AAPL over 30 days")
            .times(1)
            .returning(|r| Ok(RoleAssessment::new(r.role_id, "buy", 0.8, "Uptrend intact")));

        let node = Node::new("analysis", NodeKind::RoleInvocation)
            .with_config("role", json!("technical"))
            .with_config("prompt", json!("Assess {{ symbol }} over {{ horizon }} days"));
        let ctx = node_context(node, json!({ "symbol": "AAPL", "horizon": 30 }));

        let result = executor(roles).execute(&ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output["analysis"]["recommendation"], json!("buy"));
        assert_eq!(result.output["analysis"]["confidence"], json!(0.8));
    }

    #[tokio::test]
    async fn test_role_failure_is_an_error() {
        let mut roles = MockRoles::new();
        roles.expect_invoke().returning(|r| {
            Err(Error::Role {
                role_id: r.role_id,
                message: "model unavailable".to_string(),
            })
        });

        let node = Node::new("analysis", NodeKind::RoleInvocation).with_config("role", json!("news"));
        let ctx = node_context(node, json!({}));

        let err = executor(roles).execute(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Role { role_id, .. } if role_id == "news"));
    }

    #[tokio::test]
    async fn test_panel_with_bull_bear_and_arbiter() {
        let mut roles = MockRoles::new();
        roles.expect_invoke().returning(|r| {
            let assessment = match r.role_id.as_str() {
                "bull" => RoleAssessment::new("bull", "buy", 0.9, "Strong upside, bullish setup"),
                "bear" => RoleAssessment::new("bear", "sell", 0.5, "Valuation stretched, bearish risk"),
                "arbiter" => RoleAssessment::new(
                    "arbiter",
                    "hold",
                    0.7,
                    "objectivity: 0.8\nreliability: 0.6",
                ),
                other => RoleAssessment::new(other, "buy", 0.8, "Bullish momentum continues"),
            };
            Ok(assessment)
        });

        let node = Node::new("panel", NodeKind::RoleInvocation)
            .with_config("roles", json!(["technical", "fundamental", "news"]))
            .with_config("subject", json!("{{ symbol }}"))
            .with_config("bull_role", json!("bull"))
            .with_config("bear_role", json!("bear"))
            .with_config("arbiter_role", json!("arbiter"));
        let ctx = node_context(node, json!({ "symbol": "AAPL" }));

        let result = executor(roles).execute(&ctx).await.unwrap();
        let panel = &result.output["panel"];

        assert_eq!(panel["debate"]["subject"], json!("AAPL"));
        let consensus = panel["consensus_level"].as_f64().unwrap();
        assert!(consensus > 0.99);
        assert_eq!(panel["stance"], json!("bullish"));
        assert!(panel["verdict"]["arbiter"].is_object());

        // 0.4 * 0.7 + 0.3 * 1.0 + 0.3 * 0.7
        let confidence = panel["confidence"].as_f64().unwrap();
        assert!((confidence - 0.79).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_panel_tolerates_partial_failure() {
        let mut roles = MockRoles::new();
        roles.expect_invoke().returning(|r| {
            if r.role_id == "news" {
                return Err(Error::Role {
                    role_id: r.role_id,
                    message: "timeout".to_string(),
                });
            }
            Ok(RoleAssessment::new(r.role_id, "hold", 0.6, "Neutral, range bound"))
        });

        let node = Node::new("panel", NodeKind::RoleInvocation)
            .with_config("roles", json!(["technical", "news"]));
        let ctx = node_context(node, json!({}));

        let result = executor(roles).execute(&ctx).await.unwrap();
        assert_eq!(
            result.output["panel"]["assessments"].as_array().map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn test_validation() {
        let roles = executor(MockRoles::new());

        let missing = Node::new("r", NodeKind::RoleInvocation);
        assert_eq!(roles.validate(&missing).len(), 1);

        let bad_template = Node::new("r", NodeKind::RoleInvocation)
            .with_config("role", json!("technical"))
            .with_config("prompt", json!("{{ unclosed"));
        assert_eq!(roles.validate(&bad_template).len(), 1);

        let lonely_bull = Node::new("r", NodeKind::RoleInvocation)
            .with_config("roles", json!(["a", "b"]))
            .with_config("bull_role", json!("bull"));
        assert_eq!(roles.validate(&lonely_bull).len(), 1);

        let bad_rounds = Node::new("r", NodeKind::RoleInvocation)
            .with_config("roles", json!(["a", "b"]))
            .with_config("max_rounds", json!(0));
        assert_eq!(roles.validate(&bad_rounds).len(), 1);

        let ok = Node::new("r", NodeKind::RoleInvocation)
            .with_config("roles", json!(["a", "b"]))
            .with_config("mode", json!("rebuttal"));
        assert!(roles.validate(&ok).is_empty());
    }
}
