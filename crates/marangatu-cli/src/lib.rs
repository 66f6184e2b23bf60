//! `file-taxes`: files whatever the Marangatu portal reports as due, then
//! notifies the outcome.

pub mod app;
pub mod config;
pub mod notifiers;

pub use config::{Cli, Settings};
