pub mod analytics;
pub mod api;
pub mod catalog;
pub mod config;
pub mod context;
pub mod counters;
pub mod ingest;
pub mod models;
pub mod storage;
