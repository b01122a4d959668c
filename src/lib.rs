pub mod config;
pub mod errors;
pub mod init;
pub mod orchestrator;
pub mod session;
pub mod tracker;
pub mod tracker_config;
pub mod ui;
