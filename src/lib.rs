//! mailstash: fetch mailbox messages, normalize them, store and browse them.

pub mod config;
pub mod error;
pub mod ingest;
pub mod store;
pub mod web;

pub use error::{Error, Result};
