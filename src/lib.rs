// src/lib.rs
pub mod config;
pub mod events;
pub mod health;
pub mod locks;
pub mod metrics;
pub mod models;
pub mod policy;
pub mod repair;
pub mod scheduler;
pub mod server;
pub mod storage;
