//! FLED · lesson-plan generation backend
//!
//! Orchestration core for an AI-assisted reading-lesson generator: credit
//! gating, generation with late source enrichment, concurrent grading,
//! interactive tests, draft autosave and document export. The axum surface in
//! `routes` exposes one user session over HTTP and WebSocket.

pub mod telemetry;
pub mod util;
pub mod clock;
pub mod domain;
pub mod config;
pub mod store;
pub mod seeds;
pub mod credits;
pub mod ai;
pub mod openai;
pub mod history;
pub mod autosave;
pub mod generation;
pub mod grading;
pub mod test_runner;
pub mod export;
pub mod preferences;
pub mod state;
pub mod protocol;
pub mod logic;
pub mod routes;
