//! Recursive Language Model runtime: a sandboxed turn loop that lets an
//! LLM interrogate a large document through short programs instead of
//! reading it directly. See [`orchestrator::Orchestrator`] for the turn
//! loop and [`session::Session`] for the façade a host embeds against.

pub mod adapter;
pub mod bindings;
pub mod checkpoint;
pub mod config;
pub mod dsl;
pub mod error;
pub mod extractor;
pub mod handle;
pub mod line_store;
pub mod llm_client;
pub mod logging;
pub mod orchestrator;
pub mod predicate;
pub mod sandbox;
pub mod session;
pub mod utils;
pub mod validator;
