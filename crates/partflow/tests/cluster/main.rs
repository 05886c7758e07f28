//! Cluster integration tests, run against in-memory partitions.

mod distribution;
mod stream;
mod support;
