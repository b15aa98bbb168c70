#![forbid(unsafe_code)]

pub mod browse;
pub mod cli;
pub mod client;
pub mod export;
pub mod ingest;
pub mod logging;
pub mod records;
pub mod render;
pub mod sanitize;
pub mod session;
