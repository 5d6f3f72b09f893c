pub mod config;
pub mod hosts;

pub use config::{EmbeddingConfig, MnemaConfig};
pub use hosts::HostPolicy;
