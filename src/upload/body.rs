//! Request Body Bridge
//!
//! Turns a streaming HTTP body into a blocking [`ByteSource`] that a
//! worker thread can drain without buffering the whole request.
//!
//! [`ByteSource`]: crate::io::ByteSource

use std::io;

use axum::body::{Body, BodyDataStream, Bytes};
use futures::stream::MapErr;
use futures::TryStreamExt;
use tokio_util::io::{StreamReader, SyncIoBridge};

type BodyStream = MapErr<BodyDataStream, fn(axum::Error) -> io::Error>;

/// Blocking reader over a request body
pub type BodyReader = SyncIoBridge<StreamReader<BodyStream, Bytes>>;

/// Wrap `body` for use on a blocking thread.
///
/// Must be called from within the runtime; the returned reader may only be
/// read outside of it (e.g. inside `spawn_blocking`).
pub fn body_reader(body: Body) -> BodyReader {
    let stream: BodyStream = body
        .into_data_stream()
        .map_err(body_error as fn(axum::Error) -> io::Error);
    SyncIoBridge::new(StreamReader::new(stream))
}

fn body_error(err: axum::Error) -> io::Error {
    io::Error::other(err)
}
