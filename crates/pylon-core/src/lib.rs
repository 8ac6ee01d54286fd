//! Core types and utilities shared by the pylon components.
//!
//! This crate provides the building blocks used by both the load
//! balancer and the note store:
//! - Configuration surfaces (environment for the balancer, JSON file
//!   for the note store)
//! - Error types
//! - The `Note` data model

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod note;

pub use config::{HealthConfig, LbConfig, NodeEnv, StoreConfig, SyncMode};
pub use error::{Error, Result};
pub use note::Note;
