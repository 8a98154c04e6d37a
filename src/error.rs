//! Crate-wide error handling.
//!
//! Every fallible operation in this crate returns [`Result`], a thin alias over
//! `std::io::Result`. There are exactly two error conditions worth distinguishing:
//!
//! - an I/O failure, where the underlying filesystem call itself failed. These
//!   are propagated with their originating [`std::io::Error`] untouched.
//! - a corruption failure, where a decoded structure violates its own invariant
//!   (bad magic number, a length prefix the stream cannot satisfy). These are
//!   surfaced as [`std::io::ErrorKind::InvalidData`] with a descriptive message.
//!
//! "Not found" is never an error in this crate; it is a `bool`/`Option` result
//! at every layer, all the way up to the coordinator's public `get`.

use std::io;

/// Result alias used by every fallible operation in this crate.
pub type Result<T> = io::Result<T>;

/// Builds a corruption error: a decoded structure violated its invariant.
pub(crate) fn corrupt(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
