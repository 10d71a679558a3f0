pub mod app;
pub mod cli;
pub mod config;
pub mod git;
pub mod transcript;
pub mod ui;
pub mod util;
