//! Cog CLI - build, push, pull and inspect model images.

pub mod commands;
pub mod output;
