//! Command-line interface
//!
//! Argument definitions live in [`args`]; [`commands`] routes each
//! subcommand to its handler.

pub mod args;
pub mod commands;
