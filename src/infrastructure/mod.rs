pub mod config;
pub mod error;
pub mod kv_store;
pub mod shield;
pub mod state_repository;
