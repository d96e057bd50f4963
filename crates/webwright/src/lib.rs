pub mod agent;
pub mod compactor;
pub mod config;
pub mod errors;
pub mod events;
pub mod guardrails;
pub mod models;
pub mod pool;
pub mod prompt_template;
pub mod providers;
pub mod sandbox;
pub mod session;
pub mod tools;
