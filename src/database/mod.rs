// src/database/mod.rs
pub mod pool;

pub use pool::{check_connection, create_pool, DbPool};
