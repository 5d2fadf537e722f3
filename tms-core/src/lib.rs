//! TMS Core
//!
//! Core types and abstractions for the TMS test-execution orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (ExecutionRequest, TestRunner, etc.)
//! - DTOs: Data transfer objects exchanged with callers and runners

pub mod domain;
pub mod dto;
