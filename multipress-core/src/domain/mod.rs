//! Core domain types
//!
//! This module contains the structures shared between the orchestration
//! engine (which guards and persists them) and the CLI (whose steps read and
//! extend them).

pub mod config;
pub mod identifier;
pub mod ledger;
