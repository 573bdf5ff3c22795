//! Data persistence for completed repeats.

pub mod storage;

pub use storage::RunStorage;
