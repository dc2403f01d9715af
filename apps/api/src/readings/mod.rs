pub mod handlers;
pub mod ingest;
pub mod query;
pub mod stats;
pub mod timestamp;
