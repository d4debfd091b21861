//! Agent module - LLM client and model failover chain.

pub mod llm;
pub mod failover;
