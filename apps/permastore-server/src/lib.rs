//! Permastore Server Library
//!
//! Packages caller files as BagIt archives and stores them permanently on a
//! remote ledger, then fetches them back to check their integrity.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `identity`: wallet key documents and signing
//! - `package`: BagIt packaging and tar.gz archives
//! - `ledger`: the remote ledger client, transaction signing and chunked upload
//! - `publish`: the end-to-end publish pipeline
//! - `verify`: fetch-and-validate of stored packages
//! - `routes`: the HTTP adapter

pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod package;
pub mod publish;
pub mod routes;
pub mod state;
pub mod units;
pub mod usage;
pub mod verify;

pub use routes::create_router;
pub use state::AppState;
