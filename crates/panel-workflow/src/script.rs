//! Sandboxed evaluation of scripted expressions
//!
//! Scripts are MiniJinja expressions. They can read the context store and a
//! small set of helpers, and have no access to the host process. Evaluation
//! runs on the blocking pool so the bounded `sleep` helper never stalls a
//! runtime worker. All `sleep` calls in one evaluation share a single budget.

use minijinja::value::Value as JinjaValue;
use minijinja::{Environment, Error as JinjaError, ErrorKind};
use panel_core::{Error, Result};
use serde_json::{Map, Value};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

/// Script languages accepted by the evaluator
pub const LANGUAGES: [&str; 3] = ["expression", "jinja", "minijinja"];

/// Substrings rejected at activation time
///
/// A plain substring check: it catches obvious mistakes in definitions that
/// were written for other evaluators, not a determined author.
pub const DENYLIST: [&str; 12] = [
    "std::process",
    "std::fs",
    "Command::new",
    "unsafe",
    "System.exit",
    "Runtime.getRuntime",
    "ProcessBuilder",
    "import os",
    "__import__",
    "require(",
    "process.exit",
    "eval(",
];

/// First denylisted substring found in `script`
pub fn denied_operation(script: &str) -> Option<&'static str> {
    DENYLIST.iter().copied().find(|needle| script.contains(needle))
}

thread_local! {
    /// Sleep time left for the evaluation running on this thread
    static SLEEP_BUDGET: Cell<Duration> = const { Cell::new(Duration::ZERO) };
}

/// Expression evaluator with the helper surface installed
#[derive(Clone)]
pub struct ScriptEngine {
    env: Arc<Environment<'static>>,
    max_sleep: Duration,
}

impl ScriptEngine {
    /// Create an evaluator whose `sleep` calls may total at most `max_sleep`
    /// per evaluation
    pub fn new(max_sleep: Duration) -> Self {
        let mut env = Environment::new();

        env.add_function("min", |a: f64, b: f64| a.min(b));
        env.add_function("max", |a: f64, b: f64| a.max(b));
        env.add_function("round", |value: f64, digits: Option<i64>| {
            let factor = 10_f64.powi(digits.unwrap_or(0).clamp(0, 12) as i32);
            (value * factor).round() / factor
        });
        env.add_function("is_empty", |value: JinjaValue| {
            value.is_undefined() || value.is_none() || value.len() == Some(0)
        });
        env.add_function("is_blank", |value: Option<String>| {
            value.is_none_or(|s| s.trim().is_empty())
        });
        env.add_function("uuid", || uuid::Uuid::new_v4().to_string());
        env.add_function("now", || chrono::Utc::now().to_rfc3339());
        env.add_function("sleep", |millis: u64| {
            let granted = SLEEP_BUDGET.with(|budget| {
                let granted = Duration::from_millis(millis).min(budget.get());
                budget.set(budget.get().saturating_sub(granted));
                granted
            });
            std::thread::sleep(granted);
            u64::try_from(granted.as_millis()).unwrap_or(u64::MAX)
        });

        Self {
            env: Arc::new(env),
            max_sleep,
        }
    }

    /// Evaluate `script` against `vars`
    pub async fn evaluate(&self, script: &str, vars: Map<String, Value>) -> Result<Value> {
        let env = Arc::clone(&self.env);
        let script = script.to_string();
        let max_sleep = self.max_sleep;
        tokio::task::spawn_blocking(move || {
            SLEEP_BUDGET.with(|budget| budget.set(max_sleep));
            let result = evaluate_blocking(&env, &script, vars);
            SLEEP_BUDGET.with(|budget| budget.set(Duration::ZERO));
            result
        })
        .await
        .map_err(|e| Error::Script(format!("script task failed: {e}")))?
    }
}

fn evaluate_blocking(env: &Environment<'static>, script: &str, vars: Map<String, Value>) -> Result<Value> {
    let expression = env.compile_expression(script).map_err(script_error)?;
    let result = expression
        .eval(JinjaValue::from_serialize(&vars))
        .map_err(script_error)?;
    if result.is_undefined() {
        return Ok(Value::Null);
    }
    Ok(serde_json::to_value(&result)?)
}

fn script_error(err: JinjaError) -> Error {
    let kind = match err.kind() {
        ErrorKind::SyntaxError => "syntax error",
        ErrorKind::UnknownFunction => "unknown helper",
        _ => "evaluation error",
    };
    Error::Script(format!("{kind}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_arithmetic_and_context() {
        let engine = ScriptEngine::new(Duration::from_millis(10));
        let result = engine
            .evaluate("price * qty", vars(json!({ "price": 2.5, "qty": 4 })))
            .await
            .unwrap();
        assert_eq!(result.as_f64(), Some(10.0));
    }

    #[tokio::test]
    async fn test_helpers() {
        let engine = ScriptEngine::new(Duration::from_millis(10));
        let ctx = vars(json!({ "a": 3, "b": 7, "name": "  ", "items": [] }));

        let result = engine
            .evaluate(
                "{'low': min(a, b), 'high': max(a, b), 'r': round(2.346, 2), 'blank': is_blank(name), 'empty': is_empty(items)}",
                ctx,
            )
            .await
            .unwrap();

        assert_eq!(result["low"].as_f64(), Some(3.0));
        assert_eq!(result["high"].as_f64(), Some(7.0));
        assert_eq!(result["r"].as_f64(), Some(2.35));
        assert_eq!(result["blank"], json!(true));
        assert_eq!(result["empty"], json!(true));
    }

    #[tokio::test]
    async fn test_uuid_and_now() {
        let engine = ScriptEngine::new(Duration::from_millis(10));
        let result = engine.evaluate("uuid()", Map::new()).await.unwrap();
        assert_eq!(result.as_str().map(str::len), Some(36));

        let result = engine.evaluate("now()", Map::new()).await.unwrap();
        assert!(result.as_str().is_some_and(|s| s.contains('T')));
    }

    #[tokio::test]
    async fn test_sleep_is_bounded() {
        let engine = ScriptEngine::new(Duration::from_millis(20));
        let started = Instant::now();
        let result = engine.evaluate("sleep(60000)", Map::new()).await.unwrap();
        assert_eq!(result, json!(20));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_budget_is_shared_per_evaluation() {
        let engine = ScriptEngine::new(Duration::from_millis(30));
        let started = Instant::now();
        let result = engine
            .evaluate("[sleep(20), sleep(20), sleep(20), sleep(20)]", Map::new())
            .await
            .unwrap();

        assert_eq!(result, json!([20, 10, 0, 0]));
        assert!(started.elapsed() < Duration::from_secs(5));

        // a fresh evaluation gets a fresh budget
        let result = engine.evaluate("sleep(20)", Map::new()).await.unwrap();
        assert_eq!(result, json!(20));
    }

    #[tokio::test]
    async fn test_errors() {
        let engine = ScriptEngine::new(Duration::from_millis(10));
        let err = engine.evaluate("1 +", Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::Script(msg) if msg.starts_with("syntax error")));

        let err = engine.evaluate("open_file('x')", Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::Script(_)));
    }

    #[test]
    fn test_denylist() {
        assert_eq!(denied_operation("std::process::exit(1)"), Some("std::process"));
        assert_eq!(denied_operation("a + b"), None);
    }
}
