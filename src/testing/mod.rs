//! Testing utilities and mock implementations
//!
//! Scripted agents, pipelines, tracers and semantic matchers for exercising
//! routing, handoffs and streaming without model providers or stores.

pub mod mocks;

pub use mocks::*;
