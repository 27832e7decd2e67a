//! Integration tests for `streamstore`
//!
//! This crate contains integration tests that exercise both engines of the
//! core crate against the in-memory collaborators of `streamstore-memory`.

// This is a test-only crate
#![cfg(test)]
