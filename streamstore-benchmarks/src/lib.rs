//! Streamstore Benchmarks
//!
//! This crate contains performance benchmarks for the streamstore engines:
//! cached and uncached stream reads, OOB fan-out and bulk dispatch.

#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
