pub mod api;
pub mod config;
pub mod dfd;
pub mod infra;
pub mod llm;
pub mod threatdb;
