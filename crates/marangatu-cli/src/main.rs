//! file-taxes entry point.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};

use marangatu_cli::config::{load_env_files, resolve_working_dir};
use marangatu_cli::{app, Cli, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "file-taxes", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let working_dir = resolve_working_dir(cli.working_dir.as_deref());
    let env = load_env_files(&working_dir);
    let settings = Settings::resolve(&cli, &env, working_dir);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = app::run(settings).await?;
    Ok(ExitCode::from(code as u8))
}
