// Entrypoint for the CLI application.
// - Keeps `main` small: load dotfiles, build settings once, and hand the
//   command to the console.
// - Command errors are printed by the console; only setup failures reach
//   the `anyhow` return.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use llm_cli::{cli::Cli, config::Settings, env, ui::Console};

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    info!(version = %llm_cli::helpers::version(), "starting");

    // ./.env first so it wins over the per-user file.
    env::load_env(&[env::local_dotenv_path(), env::global_dotenv_path()]);
    let settings = Settings::from_env().with_model(cli.model);

    let mut console = Console::new(settings, io::stdout()).with_colors(io::stdout().is_terminal());
    Ok(console.execute(cli.command))
}
