// src/config/mod.rs

//! Cluster options: data model, TOML loading, and validation.
//!
//! Responsibilities:
//! - Define the options record and its defaults (`model.rs`).
//! - Load options from a TOML file (`loader.rs`).
//! - Check cross-field invariants, accumulating every violation into a
//!   single structured error (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ClusterOptions, Newline};
pub use validate::validate;
