//! Pulsar core library: ombudsman chat gateway with feedback tools, inbound dedup,
//! and analyst summaries, used by the CLI.

pub mod agent;
pub mod analysis;
pub mod channels;
pub mod config;
pub mod gate;
pub mod gateway;
pub mod identity;
pub mod init;
pub mod llm;
pub mod redact;
pub mod store;
pub mod tools;
