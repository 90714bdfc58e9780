use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    novelcast::logging::init().context("init logging")?;

    let cli = novelcast::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested; finishing in-flight chapters");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        novelcast::cli::Command::Watch(args) => {
            novelcast::app::service::watch(args, cancel)
                .await
                .context("watch")?;
        }
        novelcast::cli::Command::Run(args) => {
            novelcast::app::service::run(args, cancel)
                .await
                .context("run")?;
        }
        novelcast::cli::Command::State {
            command: novelcast::cli::StateCommand::Show(args),
        } => {
            novelcast::app::service::show_state(args)
                .await
                .context("state show")?;
        }
        novelcast::cli::Command::State {
            command: novelcast::cli::StateCommand::Set(args),
        } => {
            novelcast::app::service::set_state(args)
                .await
                .context("state set")?;
        }
    }

    Ok(())
}
