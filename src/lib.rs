//! Personal assistant runtime: agents, streaming sessions, and scheduled
//! tasks over pluggable model backends.

// Core
pub mod config;
pub mod event;
pub mod session;

// Backends
pub mod provider;
pub mod sse;
pub mod tools;

// Agents and scheduling
pub mod agent;
pub mod queue;
pub mod task;
