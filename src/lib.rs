pub mod backend;
pub mod cli;
pub mod client;
pub mod config;
pub mod connect;
pub mod console;
pub mod error;
pub mod load_config;
pub mod path;
pub mod publish;
