//! # Cohort Common Library
//!
//! Shared code for the cohort matching services including:
//! - Database models and schema initialization
//! - Configuration loading and root folder resolution
//! - Cohort week derivation
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
pub use time::CohortWeek;
