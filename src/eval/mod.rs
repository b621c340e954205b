//! Scoring of model tool calls against declarative test cases.

pub mod aggregate;
pub mod evaluator;
pub mod matcher;
pub mod pairing;
pub mod runner;
pub mod types;

pub use aggregate::{LatencyStats, Metrics, RunSummary, SuiteSummary, TagSummary, aggregate, filter_by_tag};
pub use evaluator::evaluate;
pub use matcher::match_arguments;
pub use pairing::{Pairing, resolve};
pub use runner::{RunOptions, run_evaluation};
pub use types::{
    ArgumentMatch, CallMatchResult, ChatMessage, EvalResult, FieldMatch, MatchLevel, Role,
    TestCase, ToolCallSpec, ToolDeclaration, Verdict,
};
