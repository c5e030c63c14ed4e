//! Shared foundation for the docindex crates: domain types, the error
//! taxonomy, layered settings, provider traits, the chunker and retry.
#![deny(warnings)]
#![deny(dead_code)]
#![deny(unused_variables)]
#![deny(unused_imports)]

pub mod chunker;
pub mod config;
pub mod error;
pub mod retry;
pub mod tokenize;
pub mod traits;
pub mod types;

pub use error::{Error, ErrorKind, Result};
