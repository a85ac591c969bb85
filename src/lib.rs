pub mod analyzers;
pub mod archive;
pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod filter;
pub mod models;
pub mod output;
pub mod parser;
pub mod ping;
pub mod pipeline;
pub mod sequence;
