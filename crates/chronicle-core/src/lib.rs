//! # Chronicle Core
//!
//! Shared, runtime-free logic for Chronicle: data models, the error
//! taxonomy, text chunking, citation extraction and validation, prompt
//! assembly, and the store/similarity-index/embedding-model traits.
//!
//! This crate contains no tokio, reqwest, filesystem I/O, or other
//! native-only dependencies; the application crate supplies providers,
//! configuration, and orchestration.

pub mod chunker;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod models;
pub mod prompt;
pub mod store;
