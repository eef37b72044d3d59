//! Risk scoring and automatic decisions.
//!
//! A [`ScoringOrchestrator`] resolves each [`ScoringRequest`] through the
//! [`ScoreCache`], falls through to the [`ScoreProvider`] on a miss and to the
//! configured fallback score when the provider fails, then maps the score to a
//! [`DecisionOutcome`] with the [`DecisionPolicy`].

pub mod cache;
pub mod decision;
pub mod orchestrator;
pub mod provider;
pub mod request;

pub use cache::{spawn_cache_sweeper, CacheEntry, MokaScoreCache, ScoreCache};
pub use decision::{DecisionOutcome, DecisionPolicy, DecisionThresholds};
pub use orchestrator::{ScoringOrchestrator, ScoringStatsSnapshot};
pub use provider::{build_provider, mock_score, MockScoreProvider, RemoteScoreProvider, ScoreProvider};
pub use request::{Fingerprint, ScoreResult, ScoreSource, ScoredDecision, ScoringRequest};
