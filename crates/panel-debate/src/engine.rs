//! Multi-round panel debate

use futures::future::join_all;
use panel_core::{RoleAssessment, RoleInvoker, RoleRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{DebateConfig, DebateMode};
use crate::consensus::{
    self, ConsensusStrength, DebateQuality, PairwiseAgreement, Position, consensus_level,
};
use crate::error::{DebateError, Result};
use crate::prompts;
use crate::stance::{self, Stance};

/// One role's argument in one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub role_id: String,
    pub round: u32,
    pub content: String,
    pub confidence: f64,
    pub stance: Stance,
}

impl Argument {
    fn from_assessment(role_id: &str, round: u32, assessment: &RoleAssessment) -> Self {
        let content = if assessment.rationale.trim().is_empty() {
            assessment.recommendation.clone()
        } else {
            format!("{}: {}", assessment.recommendation, assessment.rationale)
        };
        Self {
            role_id: role_id.to_string(),
            round,
            stance: stance::classify(&content),
            confidence: assessment.confidence,
            content,
        }
    }
}

/// All arguments of one round and the resulting consensus level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRound {
    pub round: u32,
    pub arguments: Vec<Argument>,
    pub consensus_level: f64,
}

/// Result of a panel debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateOutcome {
    pub subject: String,
    pub rounds: Vec<DebateRound>,
    pub rounds_held: u32,
    /// Stopped before `max_rounds` because the panel converged
    pub terminated_early: bool,
    /// Consensus level of the final round
    pub consensus_level: f64,
    pub strength: ConsensusStrength,
    pub majority_stance: Stance,
    pub stance_distribution: BTreeMap<Stance, usize>,
    /// Mean pairwise agreement per role
    pub agreement_scores: BTreeMap<String, f64>,
    pub pairwise: Vec<PairwiseAgreement>,
    pub quality: DebateQuality,
    /// Mean confidence of the final round
    pub mean_confidence: f64,
}

impl DebateOutcome {
    /// Arguments of the last round held
    pub fn final_arguments(&self) -> &[Argument] {
        self.rounds.last().map_or(&[], |r| r.arguments.as_slice())
    }
}

/// Runs structured debates among a panel of roles
pub struct DebateEngine {
    roles: Arc<dyn RoleInvoker>,
    config: DebateConfig,
}

impl DebateEngine {
    pub fn new(roles: Arc<dyn RoleInvoker>, config: DebateConfig) -> Self {
        Self { roles, config }
    }

    pub fn config(&self) -> &DebateConfig {
        &self.config
    }

    /// Debate `subject` among the roles behind `assessments`
    ///
    /// Roles are invoked concurrently within a round. A role that fails in a
    /// round is left out of that round; a round in which every role fails
    /// aborts the debate.
    pub async fn run(
        &self,
        subject: &str,
        evidence: &str,
        assessments: &[RoleAssessment],
    ) -> Result<DebateOutcome> {
        self.config.validate()?;
        if assessments.is_empty() {
            return Err(DebateError::NoParticipants(subject.to_string()));
        }

        info!(
            subject = %subject,
            participants = assessments.len(),
            max_rounds = self.config.max_rounds,
            mode = ?self.config.mode,
            "Starting debate"
        );

        let mut rounds: Vec<DebateRound> = Vec::new();
        let mut terminated_early = false;

        for round in 1..=self.config.max_rounds {
            let previous = rounds.last().map(|r| r.arguments.as_slice());
            let requests = assessments
                .iter()
                .map(|initial| {
                    let prompt = self.prompt_for(subject, evidence, round, initial, previous)?;
                    Ok(RoleRequest::new(initial.role_id.clone(), prompt).with_context(json!({
                        "subject": subject,
                        "evidence": evidence,
                        "round": round,
                    })))
                })
                .collect::<Result<Vec<_>>>()?;

            let results = join_all(requests.into_iter().map(|request| {
                let roles = Arc::clone(&self.roles);
                async move {
                    let role_id = request.role_id.clone();
                    (role_id, roles.invoke(request).await)
                }
            }))
            .await;

            let mut arguments = Vec::with_capacity(results.len());
            for (role_id, result) in results {
                match result {
                    Ok(assessment) => {
                        arguments.push(Argument::from_assessment(&role_id, round, &assessment));
                    }
                    Err(e) => warn!(role_id = %role_id, round, error = %e, "Role failed in debate round"),
                }
            }

            if arguments.is_empty() {
                return Err(DebateError::NoArguments { round });
            }

            let confidences: Vec<f64> = arguments.iter().map(|a| a.confidence).collect();
            let level = consensus_level(&confidences);
            debug!(round, arguments = arguments.len(), consensus_level = level, "Round finished");

            rounds.push(DebateRound {
                round,
                arguments,
                consensus_level: level,
            });

            if round >= 2 && level > self.config.early_stop_threshold {
                terminated_early = round < self.config.max_rounds;
                break;
            }
        }

        let outcome = self.summarize(subject, rounds, terminated_early, assessments.len());
        info!(
            subject = %subject,
            rounds_held = outcome.rounds_held,
            consensus_level = outcome.consensus_level,
            majority = %outcome.majority_stance,
            "Debate finished"
        );
        Ok(outcome)
    }

    fn prompt_for(
        &self,
        subject: &str,
        evidence: &str,
        round: u32,
        initial: &RoleAssessment,
        previous: Option<&[Argument]>,
    ) -> Result<String> {
        let Some(previous) = previous else {
            return prompts::render(
                prompts::OPENING,
                json!({
                    "role_id": initial.role_id,
                    "subject": subject,
                    "evidence": evidence,
                    "round": round,
                    "initial": initial,
                }),
            );
        };

        let own = previous.iter().find(|a| a.role_id == initial.role_id);
        let own_stance = own.map_or_else(
            || stance::classify(&initial.recommendation),
            |a| a.stance,
        );
        let others = select_counterarguments(previous, &initial.role_id, own_stance, self.config.mode);

        let own = own.map_or_else(
            || json!({ "content": initial.rationale, "confidence": initial.confidence }),
            |a| json!({ "content": a.content, "confidence": a.confidence }),
        );

        prompts::render(
            prompts::REBUTTAL,
            json!({
                "role_id": initial.role_id,
                "subject": subject,
                "evidence": evidence,
                "round": round,
                "own": own,
                "others": others,
            }),
        )
    }

    fn summarize(
        &self,
        subject: &str,
        rounds: Vec<DebateRound>,
        terminated_early: bool,
        participants: usize,
    ) -> DebateOutcome {
        let final_round = rounds.last();
        let final_args = final_round.map_or(&[][..], |r| r.arguments.as_slice());
        let level = final_round.map_or(0.0, |r| r.consensus_level);

        let stances: Vec<Stance> = final_args.iter().map(|a| a.stance).collect();
        let positions: Vec<Position<'_>> = final_args
            .iter()
            .map(|a| Position {
                role_id: &a.role_id,
                stance: a.stance,
                confidence: a.confidence,
            })
            .collect();
        let pairwise = consensus::pairwise_agreement(&positions);
        let agreement_scores = consensus::agreement_scores(&positions, &pairwise);

        let all_args = rounds.iter().flat_map(|r| r.arguments.iter());
        let lengths: Vec<usize> = all_args.clone().map(|a| a.content.chars().count()).collect();
        let confidences: Vec<f64> = all_args.map(|a| a.confidence).collect();
        let rounds_held = u32::try_from(rounds.len()).unwrap_or(u32::MAX);
        let quality = DebateQuality::compute(
            &lengths,
            &confidences,
            participants * rounds.len(),
            self.config.target_argument_length,
        );

        let mean_confidence = if final_args.is_empty() {
            0.0
        } else {
            final_args.iter().map(|a| a.confidence).sum::<f64>() / final_args.len() as f64
        };

        DebateOutcome {
            subject: subject.to_string(),
            rounds_held,
            terminated_early,
            consensus_level: level,
            strength: ConsensusStrength::classify(level),
            majority_stance: consensus::majority_stance(&stances),
            stance_distribution: consensus::stance_distribution(&stances),
            agreement_scores,
            pairwise,
            quality,
            mean_confidence,
            rounds,
        }
    }
}

/// Arguments a role responds to in the next round
///
/// In rebuttal mode only opposing arguments are shown; when nothing opposes
/// the role, it sees every other argument instead.
fn select_counterarguments<'a>(
    previous: &'a [Argument],
    role_id: &str,
    own_stance: Stance,
    mode: DebateMode,
) -> Vec<&'a Argument> {
    let others: Vec<&Argument> = previous.iter().filter(|a| a.role_id != role_id).collect();
    if mode == DebateMode::Panel {
        return others;
    }
    let opposing: Vec<&Argument> = others
        .iter()
        .copied()
        .filter(|a| own_stance.opposes(a.stance))
        .collect();
    if opposing.is_empty() { others } else { opposing }
}
