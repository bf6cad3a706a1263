//! Analysis orchestration.
//!
//! Reasoning oracle (trait, chat client, scripted fake) -> tool box over the
//! deterministic core -> ReAct controller producing the report.

pub mod chat_client;
pub mod engine;
pub mod oracle;
pub mod prompts;
pub mod tools;

pub use chat_client::ChatOracle;
pub use engine::{AnalysisRequest, Analyzer};
pub use oracle::{
    OracleError, OracleReply, OracleRequest, Proposal, ReasoningOracle, ScriptedOracle,
    ScriptedOracleBuilder, ScriptedStep, TokenUsage,
};
pub use tools::{ToolBox, ToolOutcome};
