//! LLM access for VentureLab: the provider seam, the OpenAI-compatible gateway
//! client, and the prompt builders and reply parsers for coaching and Tank
//! pitch scoring.

pub mod gateway_provider;
pub mod llm_provider;
pub mod prompts;
pub mod sse;

pub use gateway_provider::{GatewayConfig, GatewayError, GatewayProvider};
pub use llm_provider::*;
pub use prompts::{coach_system_prompt, parse_pitch_score, tank_scoring_messages, CoachContext};
