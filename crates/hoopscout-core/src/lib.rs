// Library root: league normalization, similarity retrieval and the stores
// and jobs around them. The `hoopscout` binary and integration tests use
// this public API.

pub mod config;
pub mod db;
pub mod pipeline;
pub mod service;
pub mod similarity;
pub mod stats;
