//! Consensus math for debate rounds
//!
//! All scores live in [0, 1].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stance::Stance;

mod weights {
    pub const PARTICIPATION: f64 = 0.3;
    pub const SUBSTANTIVENESS: f64 = 0.4;
    pub const CONFIDENCE: f64 = 0.3;
}

/// `max(0, 1 - sqrt(variance))` over the confidences of one round
///
/// Uses the population variance. An empty round has no consensus (0.0).
pub fn consensus_level(confidences: &[f64]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }
    let n = confidences.len() as f64;
    let mean = confidences.iter().sum::<f64>() / n;
    let variance = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt()).max(0.0)
}

/// Qualitative band of a consensus level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStrength {
    Strong,
    Medium,
    Weak,
    Divergent,
}

impl ConsensusStrength {
    pub fn classify(level: f64) -> Self {
        if level > 0.8 {
            Self::Strong
        } else if level > 0.6 {
            Self::Medium
        } else if level > 0.4 {
            Self::Weak
        } else {
            Self::Divergent
        }
    }
}

/// Most frequent stance; ties resolve in `Stance::ALL` order
pub fn majority_stance(stances: &[Stance]) -> Stance {
    let distribution = stance_distribution(stances);
    let mut best = Stance::Unclear;
    let mut best_count = 0;
    for stance in Stance::ALL {
        let count = distribution.get(&stance).copied().unwrap_or_default();
        if count > best_count {
            best = stance;
            best_count = count;
        }
    }
    best
}

/// Count of each stance present
pub fn stance_distribution(stances: &[Stance]) -> BTreeMap<Stance, usize> {
    let mut distribution = BTreeMap::new();
    for stance in stances {
        *distribution.entry(*stance).or_insert(0) += 1;
    }
    distribution
}

/// Agreement of one role towards another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseAgreement {
    pub from: String,
    pub to: String,
    pub agreement: f64,
}

/// A role's final position, the input to pairwise agreement
#[derive(Debug, Clone, Copy)]
pub struct Position<'a> {
    pub role_id: &'a str,
    pub stance: Stance,
    pub confidence: f64,
}

/// Agreement for every ordered pair of distinct roles
///
/// `1 - |Δconfidence|` when stances match, otherwise 0.
pub fn pairwise_agreement(positions: &[Position<'_>]) -> Vec<PairwiseAgreement> {
    let mut pairs = Vec::with_capacity(positions.len() * positions.len().saturating_sub(1));
    for (i, a) in positions.iter().enumerate() {
        for (j, b) in positions.iter().enumerate() {
            if i == j {
                continue;
            }
            let agreement = if a.stance == b.stance {
                (1.0 - (a.confidence - b.confidence).abs()).clamp(0.0, 1.0)
            } else {
                0.0
            };
            pairs.push(PairwiseAgreement {
                from: a.role_id.to_string(),
                to: b.role_id.to_string(),
                agreement,
            });
        }
    }
    pairs
}

/// Mean agreement of each role over all its counterparts
///
/// A role without counterparts is in full agreement with itself (1.0).
pub fn agreement_scores(
    positions: &[Position<'_>],
    pairs: &[PairwiseAgreement],
) -> BTreeMap<String, f64> {
    positions
        .iter()
        .map(|p| {
            let own: Vec<f64> = pairs
                .iter()
                .filter(|pair| pair.from == p.role_id)
                .map(|pair| pair.agreement)
                .collect();
            let score = if own.is_empty() {
                1.0
            } else {
                own.iter().sum::<f64>() / own.len() as f64
            };
            (p.role_id.to_string(), score)
        })
        .collect()
}

/// Debate quality breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebateQuality {
    pub participation: f64,
    pub substantiveness: f64,
    pub mean_confidence: f64,
    pub score: f64,
}

impl DebateQuality {
    /// `0.3·participation + 0.4·substantiveness + 0.3·meanConfidence`
    ///
    /// `participation = arguments / target_arguments`,
    /// `substantiveness = mean argument length / target_length`, each clipped.
    pub fn compute(
        argument_lengths: &[usize],
        confidences: &[f64],
        target_arguments: usize,
        target_length: usize,
    ) -> Self {
        let participation = if target_arguments == 0 {
            0.0
        } else {
            clip(argument_lengths.len() as f64 / target_arguments as f64)
        };

        let substantiveness = if argument_lengths.is_empty() || target_length == 0 {
            0.0
        } else {
            let mean_len =
                argument_lengths.iter().sum::<usize>() as f64 / argument_lengths.len() as f64;
            clip(mean_len / target_length as f64)
        };

        let mean_confidence = if confidences.is_empty() {
            0.0
        } else {
            clip(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };

        let score = weights::PARTICIPATION * participation
            + weights::SUBSTANTIVENESS * substantiveness
            + weights::CONFIDENCE * mean_confidence;

        Self {
            participation,
            substantiveness,
            mean_confidence,
            score: clip(score),
        }
    }
}

fn clip(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
