// Library root
// -----------
// This crate exposes the pieces behind the `lcli` binary so they can be
// tested without a terminal or network.
//
// Module responsibilities:
// - `cli`: clap definitions of the command surface.
// - `ui`: command handlers, prompts and colored output.
// - `gemini`: the model client façade and the backend trait it talks to.
// - `api`: the blocking HTTP backend for the Gemini REST API.
// - `env` / `config`: dotfile credential storage and runtime settings.
// - `types`, `processor`, `mime`, `helpers`: wire types, response
//   unwrapping, MIME allow-lists and small utilities.
pub mod api;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod gemini;
pub mod helpers;
pub mod mime;
pub mod processor;
pub mod types;
pub mod ui;

pub use error::{CliError, Result};
