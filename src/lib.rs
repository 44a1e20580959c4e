//! Pin reporting library exports

pub mod aggregator;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod models;
pub mod offload;
pub mod retry;
pub mod routes;
pub mod state;
pub mod store;
pub mod table;
pub mod tasks;
