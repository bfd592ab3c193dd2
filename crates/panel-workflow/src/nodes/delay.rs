use async_trait::async_trait;
use panel_core::{Error, Node, NodeKind, Result, ValidationIssue};
use regex::Regex;
use serde_json::{Value, json};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

use crate::executor::{NodeContext, NodeExecutionResult, NodeExecutor};

const DEFAULT_DELAY: Duration = Duration::from_millis(1000);
const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

static DURATION_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+)\s*(ms|s|m|h)?\s*$").ok());

/// Parse a delay given as raw milliseconds or `"500ms"`, `"5s"`, `"2m"`, `"1h"`
///
/// Negative values and anything above 24 hours are rejected.
pub fn parse_delay(value: &Value) -> std::result::Result<Duration, String> {
    let (amount, unit) = match value {
        Value::Number(n) => (
            n.as_i64().ok_or_else(|| format!("'{n}' is not a whole number of milliseconds"))?,
            "ms",
        ),
        Value::String(s) => {
            let captures = DURATION_PATTERN
                .as_ref()
                .and_then(|re| re.captures(s))
                .ok_or_else(|| format!("'{s}' is not a duration"))?;
            let amount = captures[1]
                .parse::<i64>()
                .map_err(|e| format!("'{s}' is not a duration: {e}"))?;
            let unit = captures.get(2).map_or("ms", |m| m.as_str());
            (amount, unit)
        }
        other => return Err(format!("'{other}' is not a duration")),
    };

    let amount = u64::try_from(amount).map_err(|_| "delay must not be negative".to_string())?;
    let millis = match unit {
        "h" => amount.saturating_mul(3_600_000),
        "m" => amount.saturating_mul(60_000),
        "s" => amount.saturating_mul(1000),
        _ => amount,
    };
    let delay = Duration::from_millis(millis);
    if delay > MAX_DELAY {
        return Err("delay must not exceed 24 hours".to_string());
    }
    Ok(delay)
}

/// Suspends the branch for a configured duration
///
/// The duration comes from `delay`, or from the context path named by
/// `delay_key`, defaulting to one second. The sleep is a timer await, so it
/// does not hold a worker permit.
pub struct DelayExecutor;

impl DelayExecutor {
    fn resolve(ctx: &NodeContext) -> Result<Duration> {
        let configured = match ctx.node.config.get("delay") {
            Some(value) => Some(value.clone()),
            None => ctx
                .node
                .config_str("delay_key")
                .and_then(|key| ctx.resolve(key)),
        };
        match configured {
            Some(value) => parse_delay(&value).map_err(|e| Error::node(&ctx.node.id, e)),
            None => Ok(DEFAULT_DELAY),
        }
    }
}

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn supported_kind(&self) -> NodeKind {
        NodeKind::TimedDelay
    }

    fn validate(&self, node: &Node) -> Vec<ValidationIssue> {
        match node.config.get("delay").map(parse_delay) {
            Some(Err(e)) => vec![ValidationIssue::node(&node.id, e)],
            _ => Vec::new(),
        }
    }

    async fn execute(&self, ctx: &NodeContext) -> Result<NodeExecutionResult> {
        let delay = Self::resolve(ctx)?;
        debug!(node_id = %ctx.node.id, delay_ms = delay.as_millis(), "Delaying");
        tokio::time::sleep(delay).await;

        Ok(NodeExecutionResult::single(
            ctx.node.output_key(),
            json!({ "delayed_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX) }),
        ))
    }

    fn uses_worker(&self) -> bool {
        false
    }
}
