//! Command line front end (feature `cli`)

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, Command, InteractiveArgs, ModelsCommand, RunArgs};
