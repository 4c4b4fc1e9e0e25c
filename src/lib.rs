//! pmkv library
//!
//! Moves a project tracker's tree of documents (projects, epics, stories and
//! people) between a local data directory and a Redis-compatible key-value
//! store, and serves a REST command proxy in front of the store.

pub mod backend;
pub mod backup;
pub mod cleanup;
pub mod command;
pub mod config;
pub mod error;
pub mod keys;
pub mod kv;
pub mod local;
pub mod lock;
pub mod migrate;
pub mod proxy;
pub mod repository;
pub mod select;
pub mod tree_generator;
pub mod types;
