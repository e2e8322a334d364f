//! Threadline - conversational client core
//!
//! A conversation is a timeline of message nodes, each holding alternate
//! variants. Sessions stream model output into it, run tool calls between
//! turns and keep at most one generation in flight per conversation.

pub mod config;
pub mod conversation;
pub mod db;
pub mod files;
pub mod generation;
pub mod llm;
pub mod message;
pub mod session;
pub mod title_generator;
pub mod tools;
pub mod transformers;
