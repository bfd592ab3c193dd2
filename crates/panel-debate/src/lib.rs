//! Structured debate engine for analyst panels
//!
//! Given independent per-role assessments of one subject, the debate engine
//! runs up to `max_rounds` rounds of argumentation, scores consensus after
//! every round and stops early once the panel converges. On top of the panel
//! debate, an adversarial bull/bear pair and an optional arbiter can be
//! synthesized into a single calibrated confidence.
//!
//! # Architecture
//!
//! - [`DebateEngine`]: multi-round panel debate (`Panel` or `Rebuttal` mode)
//! - [`consensus`]: variance-based consensus, pairwise agreement, debate quality
//! - [`stance`]: keyword classification of argument text
//! - [`BullBearDebate`]: two one-sided roles argued concurrently
//! - [`Arbiter`]: independent objectivity/reliability scoring
//!
//! # Example
//!
//! ```rust,ignore
//! use panel_debate::{DebateConfig, DebateEngine};
//! use std::sync::Arc;
//!
//! let engine = DebateEngine::new(Arc::new(my_roles), DebateConfig::default());
//! let outcome = engine.run("AAPL", &evidence, &assessments).await?;
//! println!("{:?} consensus at {:.2}", outcome.strength, outcome.consensus_level);
//! ```

pub mod adversarial;
pub mod arbiter;
pub mod config;
pub mod consensus;
pub mod engine;
pub mod error;
pub mod prompts;
pub mod stance;

pub use adversarial::{BullBearDebate, BullBearOutcome, DisagreementMarker, Synthesis, Verdict};
pub use arbiter::{Arbiter, ArbiterVerdict, RoleArbiter};
pub use config::{DebateConfig, DebateMode};
pub use consensus::{ConsensusStrength, DebateQuality, PairwiseAgreement};
pub use engine::{Argument, DebateEngine, DebateOutcome, DebateRound};
pub use error::{DebateError, Result};
pub use stance::Stance;
