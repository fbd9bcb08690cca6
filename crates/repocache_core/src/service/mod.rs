//! Core use-case services.
//!
//! # Responsibility
//! - Turn decoded records into store writes (`storage_service`).
//! - Orchestrate remote fetches into cached, observable state
//!   (`sync_service`).
//! - Keep callers decoupled from write-context and save mechanics.

pub mod storage_service;
pub mod sync_service;
