//! Bounded I/O path
//!
//! Everything an upload writes to disk is read through a [`BoundedReader`]
//! and copied by a [`StreamCopier`].

pub mod bounded;
pub mod copy;

pub use bounded::{BoundedReader, ByteSource, MemorySource, OverrunError, OverrunPolicy};
pub use copy::{StreamCopier, DEFAULT_COPY_BUFFER_SIZE};
