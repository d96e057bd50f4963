//! These models represent the objects passed around by the agent
//!
//! There are several related formats we need to interact with:
//! - openai-style messages/tools, sent from the agent to the LLM
//! - tool dispatch requests, sent from the agent to the workspace tools
//! - client events, sent from the agent to the live browser channel
//!
//! Provider responses are converted into these internal structs immediately
//! after receipt, so internal code never branches on wire shapes (a model
//! reply whose content arrives as a string or as an array of parts is always
//! normalized into `Vec<MessageContent>`).

pub mod message;
pub mod tool;
