//! Multipress Core
//!
//! Core types shared by the Multipress provisioning engine and its CLI.
//!
//! This crate contains:
//! - Domain types: the configuration record, instance identifiers and the
//!   credential ledger row schema
//! - Password generation used when defaults are filled in

pub mod domain;
pub mod password;

pub use domain::config::{Config, ConfigError, CredentialsConfig, InstancesConfig};
pub use domain::identifier::Identifier;
pub use domain::ledger::CredentialRow;
