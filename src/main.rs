use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    magmd::logging::init().context("init logging")?;

    let cli = magmd::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        magmd::cli::Command::Years(args) => {
            magmd::browse::years(args).await.context("years")?;
        }
        magmd::cli::Command::Issues(args) => {
            magmd::browse::issues(args).await.context("issues")?;
        }
        magmd::cli::Command::Articles(args) => {
            magmd::browse::articles(args).await.context("articles")?;
        }
        magmd::cli::Command::Export(args) => {
            magmd::export::run(args).await.context("export")?;
        }
        magmd::cli::Command::Ingest(args) => {
            magmd::ingest::run(args).context("ingest")?;
        }
    }

    Ok(())
}
