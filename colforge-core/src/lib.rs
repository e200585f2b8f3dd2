//! Core domain types for colforge
//!
//! This crate contains:
//! - The job record and its status state machine
//! - Closed parameter schemas per job type
//! - The failure taxonomy shared by the worker and the gateway
//! - Read-path DTOs for polling callers
//!
//! Note: Persistence lives behind the worker's store trait, execution
//! logic in the worker crate. Nothing here touches the filesystem.

pub mod domain;
pub mod dto;
pub mod error;
