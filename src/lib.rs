// src/lib.rs
pub mod api;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod esl;
pub mod frame;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod signaling;
