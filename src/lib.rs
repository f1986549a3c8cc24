#[macro_use]
extern crate log;

pub mod chunked_upload;
pub mod config;
pub mod errors;
pub mod http_store;
pub mod local_store;
pub mod progress_reporter;
pub mod range_reader;
pub mod retry_policy;
pub mod segment_planner;
pub mod segment_source;
pub mod shared_types;
pub mod storage;
pub mod store;

#[cfg(test)]
mod test_support;
