use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "lcli")]
#[command(version, about = "A CLI tool for interacting with the Gemini API", long_about = None)]
pub struct Cli {
    /// Gemini model to use (defaults to $GEMINI_MODEL or gemini-1.5-flash)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Verbose logging to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Configure the API key for the Gemini API
    Configure {
        /// Quicker way to set up the API key without prompts
        #[arg(short = 'k', long)]
        api_key: Option<String>,

        /// Store the key in ~/.llm-cli.env instead of ./.env
        #[arg(short, long)]
        global: bool,
    },
    /// Check if the API key is set
    Verify,
    /// Generate content from a prompt and/or other files
    Prompt(PromptArgs),
    /// Start a chat session with Gemini
    Chat {
        /// Start a chat session with Gemini
        #[arg(short, long)]
        start: bool,
    },
    /// Basic file management commands for Gemini
    Files(FilesArgs),
    /// Complete a shell command based on the context provided
    Completion {
        /// Input command to complete
        #[arg(short, long)]
        command: String,

        /// Context for the command
        #[arg(short = 'x', long)]
        context: String,
    },
}

#[derive(Args, Debug, Default)]
pub struct PromptArgs {
    /// Text prompt to interact with Gemini
    #[arg(short, long)]
    pub text: Option<String>,

    /// Image path to send inline. Can be given multiple times
    #[arg(short, long)]
    pub image: Vec<PathBuf>,

    /// File path to upload through the Files API before prompting. Images,
    /// videos and audio. Files are stored up to 48 hours before being deleted
    /// automatically. Can be given multiple times
    #[arg(short, long)]
    pub file: Vec<String>,

    /// Print the response in chunks as it arrives
    #[arg(short, long)]
    pub stream: bool,
}

impl PromptArgs {
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, |t| t.trim().is_empty()) && self.image.is_empty() && self.file.is_empty()
    }
}

#[derive(Args, Debug, Default)]
pub struct FilesArgs {
    /// List all files uploaded to Gemini
    #[arg(short, long)]
    pub list: bool,

    /// Upload a file: the file path and a display name, in that order
    #[arg(short, long, num_args = 2, value_names = ["PATH", "NAME"])]
    pub upload: Option<Vec<String>>,

    /// Delete a file by its display name
    #[arg(short, long)]
    pub delete: Option<String>,

    /// Fetch a file by its display name
    #[arg(short, long)]
    pub fetch: Option<String>,

    /// Do not ask for confirmation before deleting
    #[arg(short, long)]
    pub yes: bool,
}

impl FilesArgs {
    pub fn is_empty(&self) -> bool {
        !self.list && self.upload.is_none() && self.delete.is_none() && self.fetch.is_none()
    }
}
