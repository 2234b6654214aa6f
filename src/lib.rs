pub mod assessment;
pub mod config;
pub mod criteria;
pub mod error;
pub mod formula;
pub mod input;
pub mod output;
pub mod scoring;
pub mod server;
pub mod store;
