//! Chunked Upload Server Library
//!
//! This crate exposes the upload core and router for testing.
//! The server binary is in main.rs.
//!
//! # Modules
//!
//! - `io`: Bounded readers and the staging file copier
//! - `staging`: The per-process staging directory
//! - `upload`: Session protocol (start, append, commit)
//! - `routes`: HTTP surface

pub mod config;
pub mod io;
pub mod routes;
pub mod staging;
pub mod state;
pub mod upload;
