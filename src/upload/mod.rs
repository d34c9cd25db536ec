//! Chunked Upload Module
//!
//! Implements resumable large file uploads with:
//! - One staging file per session, named by the session id
//! - Exact-offset validation for every appended chunk
//! - Commit by rename under a caller-chosen name
//!
//! Protocol Flow:
//! 1. Client POSTs the first chunk and receives a session id and offset
//! 2. Client PUTs each further chunk with the last confirmed offset
//! 3. Client commits the session under its final file name

pub mod body;
pub mod controller;
pub mod types;

pub use body::{body_reader, BodyReader};
pub use controller::UploadSessionController;
pub use types::*;
