//! End-to-end tests over fully in-memory fixtures.

pub mod fixtures;

mod e2e;
