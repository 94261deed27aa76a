//! Library integration tests.

mod common;
mod reconcile_tests;
mod schedule_tests;
mod store_tests;
