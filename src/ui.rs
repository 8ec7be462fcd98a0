// UI layer: one handler per subcommand. Handlers are synchronous, print
// through a `Write` so tests can capture output, and ask questions through a
// `Prompter` so tests can script the answers.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::style::{Color, Stylize};
use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::cli::{Command, FilesArgs, PromptArgs};
use crate::config::Settings;
use crate::env::{self, API_KEY_VAR};
use crate::error::CliError;
use crate::gemini::{build_parts, Gemini, GenerativeBackend};
use crate::helpers::{format_file_info, peek};
use crate::processor::response_text;

const API_KEY_URL: &str = "https://aistudio.google.com/app/apikey";
const EXIT_TOKENS: &[&str] = &["exit", "quit", "/exit", "/quit"];

pub const COMMAND_COMPLETION_INSTRUCTIONS: &str = "
You are a coding expert with your domain being in Shell Scripting, interacting with the system is a breeze for you.
You have the knowledge for all major operating systems (Windows, MacOS, Linux) and can perform tasks with ease.

Your task is to complete any given command that is provided to you based on additional information that will be provided to you.
You should not return any explanation or reasoning for the command you provide, only the completed command itself.

The input command is enclosed in backticks (`) and the context for the command is provided after the command enclosed in curly braces {}.

The output should not have any formatting given in the input command, no escape characters like \\n, \\t, etc. should be present in the output.

The command returned should be a valid command that can be run on the system provided, and should be returned as a string without any additional formatting.
";

pub type Backend<'a> = Box<dyn GenerativeBackend + 'a>;
type Connector<'a> = Box<dyn Fn(&Settings) -> crate::error::Result<Backend<'a>> + 'a>;
type Lookup<'a> = Box<dyn Fn(&str) -> Option<String> + 'a>;

/// Interactive questions asked by the commands.
pub trait Prompter {
    fn confirm(&mut self, message: &str, default: bool) -> crate::error::Result<bool>;

    /// Hidden input, entered twice.
    fn secret(&mut self, message: &str) -> crate::error::Result<String>;

    /// One line of input; `None` at end of input.
    fn read_line(&mut self, label: &str) -> crate::error::Result<Option<String>>;
}

/// `dialoguer` prompts on the real terminal; chat lines go through a
/// `rustyline` editor that keeps the session's history.
#[derive(Default)]
pub struct Terminal {
    editor: Option<DefaultEditor>,
}

impl Prompter for Terminal {
    fn confirm(&mut self, message: &str, default: bool) -> crate::error::Result<bool> {
        // `interact_opt` returns None when the user hits Esc or `q`.
        Confirm::new()
            .with_prompt(message)
            .default(default)
            .interact_opt()?
            .ok_or(CliError::UserAbort)
    }

    fn secret(&mut self, message: &str) -> crate::error::Result<String> {
        // `Password` hides input in terminal.
        let value = Password::new()
            .with_prompt(message)
            .with_confirmation("Repeat for confirmation", "Error: the values do not match.")
            .interact()
            .map_err(abort_on_interrupt)?;
        Ok(value)
    }

    fn read_line(&mut self, label: &str) -> crate::error::Result<Option<String>> {
        let mut editor = match self.editor.take() {
            Some(editor) => editor,
            None => DefaultEditor::new()?,
        };
        let line = editor.readline(&format!("{}: ", label));
        if let Ok(line) = &line {
            if !line.trim().is_empty() {
                let _ = editor.add_history_entry(line.as_str());
            }
        }
        self.editor = Some(editor);
        line_or_end(line)
    }
}

/// Ctrl-D ends input; Ctrl-C is a user abort.
fn line_or_end(line: rustyline::Result<String>) -> crate::error::Result<Option<String>> {
    match line {
        Ok(line) => Ok(Some(line)),
        Err(ReadlineError::Eof) => Ok(None),
        Err(ReadlineError::Interrupted) => Err(CliError::UserAbort),
        Err(ReadlineError::Io(e)) => Err(abort_on_interrupt(e)),
        Err(e) => Err(e.into()),
    }
}

fn abort_on_interrupt(e: io::Error) -> CliError {
    if e.kind() == io::ErrorKind::Interrupted {
        CliError::UserAbort
    } else {
        CliError::Io(e)
    }
}

fn paint(colors: bool, text: &str, color: Color) -> String {
    if colors {
        text.with(color).to_string()
    } else {
        text.to_string()
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    // indicatif hides the spinner by itself when stderr is not a terminal.
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Runs commands against one set of settings. Everything it prints goes to
/// `out`.
pub struct Console<'a, W: Write> {
    settings: Settings,
    out: W,
    colors: bool,
    connect: Connector<'a>,
    prompter: Box<dyn Prompter + 'a>,
    lookup: Lookup<'a>,
    local_dotenv: PathBuf,
    global_dotenv: PathBuf,
}

impl<'a, W: Write> Console<'a, W> {
    /// A console wired to the real service, terminal and process environment.
    pub fn new(settings: Settings, out: W) -> Self {
        Console {
            settings,
            out,
            colors: true,
            connect: Box::new(|settings: &Settings| -> crate::error::Result<Backend<'a>> {
                Ok(Box::new(ApiClient::from_settings(settings)?))
            }),
            prompter: Box::new(Terminal::default()),
            lookup: Box::new(|name: &str| std::env::var(name).ok()),
            local_dotenv: env::local_dotenv_path(),
            global_dotenv: env::global_dotenv_path(),
        }
    }

    pub fn with_colors(mut self, colors: bool) -> Self {
        self.colors = colors;
        self
    }

    /// Replace how the backend is built from settings.
    pub fn with_connector<F>(mut self, connect: F) -> Self
    where
        F: Fn(&Settings) -> crate::error::Result<Backend<'a>> + 'a,
    {
        self.connect = Box::new(connect);
        self
    }

    pub fn with_prompter<P: Prompter + 'a>(mut self, prompter: P) -> Self {
        self.prompter = Box::new(prompter);
        self
    }

    /// Replace the environment lookup used by `verify`.
    pub fn with_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'a,
    {
        self.lookup = Box::new(lookup);
        self
    }

    pub fn with_dotenv_paths(mut self, local: PathBuf, global: PathBuf) -> Self {
        self.local_dotenv = local;
        self.global_dotenv = global;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Run a command and report its error, if any, as one line.
    pub fn execute(&mut self, command: Command) -> ExitCode {
        match self.run(command) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                self.report(&err);
                ExitCode::FAILURE
            }
        }
    }

    pub fn run(&mut self, command: Command) -> Result<()> {
        debug!(?command, "running command");
        match command {
            Command::Configure { api_key, global } => self.configure(api_key, global),
            Command::Verify => self.verify(),
            Command::Prompt(args) => self.prompt(args),
            Command::Chat { start } => self.chat(start),
            Command::Files(args) => self.files(args),
            Command::Completion { command, context } => self.completion(&command, &context),
        }
    }

    pub fn report(&mut self, err: &anyhow::Error) {
        let line = match err.downcast_ref::<CliError>() {
            Some(CliError::UserAbort) => paint(self.colors, "\nInterrupted by user.", Color::Yellow),
            _ => paint(self.colors, &format!("An error occurred: {err:#}"), Color::Red),
        };
        if writeln!(self.out, "{}", line).is_err() {
            eprintln!("{}", line);
        }
    }

    fn say(&mut self, text: &str, color: Color) -> Result<()> {
        let line = paint(self.colors, text, color);
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    /// Credential check first, then build the façade. No backend is created
    /// when the key is missing.
    fn gemini(&self) -> Result<Gemini<Backend<'a>>> {
        self.settings.api_key()?;
        let backend = (self.connect)(&self.settings)?;
        Ok(Gemini::new(&self.settings, backend)?)
    }

    fn configure(&mut self, api_key: Option<String>, global: bool) -> Result<()> {
        writeln!(self.out, "Configuring API key...")?;
        let path = if global {
            self.global_dotenv.clone()
        } else {
            self.local_dotenv.clone()
        };

        let supplied = api_key.is_some();
        let key = match api_key {
            Some(key) => key,
            None => {
                let note = format!(
                    "\nNote: This package requires an API key to function. Please visit {} to get your API key.\n",
                    API_KEY_URL
                );
                self.say(&note, Color::Magenta)?;
                if !self.prompter.confirm("Would you like to setup your API key now?", true)? {
                    return self.say(
                        "API key not configured. Please set the GOOGLE_API_KEY environment variable manually.",
                        Color::Red,
                    );
                }
                self.prompter.secret("Enter your Gemini API key")?
            }
        };

        if key.trim().is_empty() {
            return Err(CliError::MissingCredential(API_KEY_VAR.to_string()).into());
        }
        env::write_dotenv(&path, &[(API_KEY_VAR, &key)])
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "api key saved");

        self.say("\nAPI key has been set successfully.", Color::Green)?;
        writeln!(self.out, "Saved to {}", path.display())?;
        if supplied {
            writeln!(
                self.out,
                "\nInstallation complete. You can now use the llm-cli commands. Please ensure that the API key is correct."
            )?;
        } else {
            writeln!(self.out, "\nInstallation complete. You can now use the llm-cli commands.")?;
        }
        let hint = "Get started by running 'lcli --help' to see the available commands.\n";
        let hint = if self.colors { hint.bold().to_string() } else { hint.to_string() };
        writeln!(self.out, "{}", hint)?;
        Ok(())
    }

    fn verify(&mut self) -> Result<()> {
        env::verify_vars(&[API_KEY_VAR], |name| (self.lookup)(name))?;
        self.say("API key found. You are ready to use the API.", Color::Green)
    }

    fn prompt(&mut self, args: PromptArgs) -> Result<()> {
        if args.is_empty() {
            return self.say(
                "Please provide at least one of the following options: --text, --image, --file.",
                Color::Red,
            );
        }
        let gemini = self.gemini()?;
        let text = args.text.unwrap_or_default();

        let uploaded = if args.file.is_empty() {
            Vec::new()
        } else {
            let progress = spinner("Uploading...");
            let files = gemini.upload_files(&args.file);
            progress.finish_and_clear();
            files.context("Failed to upload files")?
        };

        if args.stream {
            let parts = build_parts(&text, &args.image, &uploaded)?;
            let colors = self.colors;
            let out = &mut self.out;
            writeln!(out)?;
            // The first failed write is kept and reported once the stream ends.
            let mut write_error: Option<io::Error> = None;
            let response = gemini.stream(parts, &mut |chunk: &str| {
                if write_error.is_some() {
                    return;
                }
                let written = write!(out, "{}", paint(colors, chunk, Color::Blue)).and_then(|()| out.flush());
                if let Err(e) = written {
                    write_error = Some(e);
                }
            })?;
            if let Some(e) = write_error {
                return Err(anyhow::Error::new(e).context("Failed to print the streamed reply"));
            }
            writeln!(out)?;
            response_text(&response)?;
            return Ok(());
        }

        let progress = spinner("Thinking...");
        let response = match (args.image.is_empty(), uploaded.is_empty()) {
            (true, true) => gemini.generate_from_text(&text),
            (false, true) => gemini.generate_from_text_and_images(&text, &args.image),
            (true, false) => gemini.generate_from_text_and_files(&text, &uploaded),
            (false, false) => build_parts(&text, &args.image, &uploaded).and_then(|p| gemini.generate(p)),
        };
        progress.finish_and_clear();

        let result = response_text(&response?)?;
        self.say(&format!("\n{}", result), Color::Blue)
    }

    fn chat(&mut self, start: bool) -> Result<()> {
        if !start {
            writeln!(self.out, "Run `lcli chat --start` to begin a chat session.")?;
            return Ok(());
        }
        let mut gemini = self.gemini()?;
        self.say(
            "Starting chat session with Gemini... (type `exit` or press Ctrl-D to leave)",
            Color::Blue,
        )?;

        loop {
            let line = match self.prompter.read_line("You") {
                Ok(Some(line)) => line,
                Ok(None) | Err(CliError::UserAbort) => break,
                Err(e) => return Err(e.into()),
            };
            let message = line.trim();
            if message.is_empty() {
                continue;
            }
            if EXIT_TOKENS.contains(&message) {
                break;
            }
            let reply = gemini.chat(message)?;
            self.say(&format!("Gemini: {}", reply), Color::Blue)?;
        }

        info!(model = gemini.model(), turns = gemini.history().len(), "chat finished");
        self.say("\nChat session ended.", Color::Yellow)
    }

    fn files(&mut self, args: FilesArgs) -> Result<()> {
        if args.is_empty() {
            return self.say(
                "Please provide at least one of the following options: --list, --upload, --delete, --fetch.",
                Color::Red,
            );
        }
        let gemini = self.gemini()?;

        if args.list {
            match peek(gemini.list_files()) {
                None => self.say("No files found.", Color::Yellow)?,
                Some(files) => {
                    if files.first().is_ok() {
                        writeln!(self.out, "Display Name\t - \tMime Type\t - \tByte Size\t - \tURI")?;
                    }
                    for file in files {
                        let file = file.context("Failed to list files")?;
                        self.say(&format!("\n{}", format_file_info(&file)), Color::Magenta)?;
                    }
                }
            }
        }

        if let Some([path, name]) = args.upload.as_deref() {
            let progress = spinner("Uploading...");
            let uploaded = gemini.upload(path, Some(name.as_str()));
            progress.finish_and_clear();
            let file = uploaded.with_context(|| format!("Failed to upload {}", path))?;
            self.say(
                &format!("Uploaded file: {} with {}", file.display_name, file.uri),
                Color::Blue,
            )?;
        }

        if let Some(name) = args.delete {
            let question = format!("Are you sure you want to delete file with display name {}?", name);
            if args.yes || self.prompter.confirm(&question, true)? {
                let file = gemini.get_file(&name)?;
                gemini.delete_file(&file.name)?;
                self.say(
                    &format!("Deleted file: {} with display name: {}", file.name, file.display_name),
                    Color::Blue,
                )?;
            } else {
                self.say("Nothing deleted.", Color::Yellow)?;
            }
        }

        if let Some(name) = args.fetch {
            match gemini.get_file(&name) {
                Ok(file) => self.say(&file.to_string(), Color::Magenta)?,
                Err(CliError::NotFound(_)) => self.say(
                    "File not found or you may not have permissions to access it",
                    Color::Yellow,
                )?,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn completion(&mut self, command: &str, context: &str) -> Result<()> {
        let gemini = self.gemini()?.with_system_instruction(COMMAND_COMPLETION_INSTRUCTIONS);
        let progress = spinner("Completing...");
        let response = gemini.generate_from_text(&format!("`{}` {{{}}}", command, context));
        progress.finish_and_clear();
        let text = response_text(&response?)?;
        self.say(&format!("\n{}", text), Color::Blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_d_ends_input_and_ctrl_c_aborts() {
        assert_eq!(line_or_end(Ok("hi".to_string())).unwrap(), Some("hi".to_string()));
        assert_eq!(line_or_end(Err(ReadlineError::Eof)).unwrap(), None);
        assert!(matches!(line_or_end(Err(ReadlineError::Interrupted)), Err(CliError::UserAbort)));

        let interrupted = io::Error::new(io::ErrorKind::Interrupted, "signal");
        assert!(matches!(line_or_end(Err(ReadlineError::Io(interrupted))), Err(CliError::UserAbort)));
        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(matches!(line_or_end(Err(ReadlineError::Io(broken))), Err(CliError::Io(_))));
    }
}
