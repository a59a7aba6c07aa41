pub mod cli;
pub mod commands;
pub mod config;
pub mod provider;
pub mod runtime;
pub mod source;
