//! Prompt templates for debate rounds
//!
//! Templates use MiniJinja syntax and are rendered against a serializable
//! context, the same way analyst prompts are rendered elsewhere.

use minijinja::Environment;
use serde::Serialize;

use crate::error::Result;

/// Opening round: argue from the shared evidence only
pub const OPENING: &str = r"You are {{ role_id }}, a member of an analyst panel assessing {{ subject }}.

Shared evidence:
{{ evidence }}

Your independent assessment: {{ initial.recommendation }} (confidence {{ initial.confidence }}).
{{ initial.rationale }}

Round {{ round }}: argue your position using only the shared evidence.
State a clear recommendation (bullish, bearish or neutral) and a confidence between 0 and 1.";

/// Later rounds: respond to the previous round
pub const REBUTTAL: &str = r"You are {{ role_id }}, a member of an analyst panel assessing {{ subject }}.

Shared evidence:
{{ evidence }}

Your previous argument (confidence {{ own.confidence }}):
{{ own.content }}

Arguments from the previous round:
{% for arg in others %}- {{ arg.role_id }} ({{ arg.stance }}, confidence {{ arg.confidence }}): {{ arg.content }}
{% endfor %}
Round {{ round }}: respond to these arguments. Restate your recommendation and revise your
confidence only if the arguments above warrant it.";

/// One-sided bullish case
pub const BULL_CASE: &str = r"You argue the bull case for {{ subject }}.

Shared evidence:
{{ evidence }}

Build the strongest one-sided bullish case the evidence supports. Ignore counterarguments.
Finish with your confidence that the bullish case holds, between 0 and 1.";

/// One-sided bearish case
pub const BEAR_CASE: &str = r"You argue the bear case for {{ subject }}.

Shared evidence:
{{ evidence }}

Build the strongest one-sided bearish case the evidence supports. Ignore counterarguments.
Finish with your confidence that the bearish case holds, between 0 and 1.";

/// Independent arbiter review
pub const ARBITER: &str = r"You are an independent arbiter reviewing a debate on {{ subject }}.

Bull case (confidence {{ bull.confidence }}): {{ bull.rationale }}
Bear case (confidence {{ bear.confidence }}): {{ bear.rationale }}
Panel consensus level: {{ panel_consensus }}

Score the debate. Reply with two lines:
objectivity: <number between 0 and 1>
reliability: <number between 0 and 1>";

/// Render a template with the given variables
pub fn render(template: &str, vars: impl Serialize) -> Result<String> {
    let env = Environment::new();
    let value = minijinja::Value::from_serialize(vars);
    Ok(env.render_str(template, value)?)
}
