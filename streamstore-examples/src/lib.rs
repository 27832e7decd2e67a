//! Example applications built on the `streamstore` engines
//!
//! Each module wires both engines to the in-memory collaborators from
//! `streamstore-memory` so it can run without infrastructure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
// These are examples, so we don't need to be as pedantic
#![allow(clippy::missing_const_for_fn)]

/// Guestbook example: greetings batched per room and recorded in streams
pub mod greetings;
