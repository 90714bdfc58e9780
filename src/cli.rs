use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::model::SeriesIdentity;
use crate::settings::PipelineSettings;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover new chapters continuously and publish them in batches.
    Watch(WatchArgs),
    /// Convert a fixed chapter range once, then exit.
    Run(RunArgs),
    /// Inspect or correct the persisted discovery watermark.
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum StateCommand {
    Show(StateShowArgs),
    Set(StateSetArgs),
}

#[derive(Debug, Clone, Args)]
pub struct StorageArgs {
    /// Root directory for state, archive, outputs and published videos.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SeriesArgs {
    /// Series name, used for titles and storage keys.
    #[arg(long)]
    pub series: String,

    /// Series index page (lists chapter links).
    #[arg(long)]
    pub base_url: String,
}

impl SeriesArgs {
    pub fn identity(&self) -> anyhow::Result<SeriesIdentity> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|err| anyhow::anyhow!("invalid --base-url {:?}: {err}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("--base-url must be http or https: {}", self.base_url);
        }
        if self.series.trim().is_empty() {
            anyhow::bail!("--series must not be empty");
        }
        Ok(SeriesIdentity::new(self.series.trim(), self.base_url.trim()))
    }
}

#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Concurrent chapter workers.
    #[arg(long, default_value_t = PipelineSettings::default_workers())]
    pub workers: usize,

    /// Seconds between discovery cycles.
    #[arg(long, default_value_t = PipelineSettings::default_poll_interval_secs())]
    pub poll_interval_secs: u64,

    /// Seconds without a new result after which a batch closes.
    #[arg(long, default_value_t = PipelineSettings::default_batch_window_secs())]
    pub batch_window_secs: u64,

    /// Chapters below the watermark re-verified when nothing new appeared.
    #[arg(long, default_value_t = PipelineSettings::default_recheck_window())]
    pub recheck_window: u32,
}

impl PipelineArgs {
    pub fn settings(&self) -> anyhow::Result<PipelineSettings> {
        let settings = PipelineSettings {
            workers: self.workers,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            batch_window: Duration::from_secs(self.batch_window_secs),
            recheck_window: self.recheck_window,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub series: SeriesArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Watermark to start from when the series has no saved state.
    #[arg(long, default_value_t = 0)]
    pub initial_chapter: u32,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub series: SeriesArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// First chapter to convert.
    #[arg(long)]
    pub start: u32,

    /// Last chapter to convert (defaults to the newest chapter upstream).
    #[arg(long)]
    pub end: Option<u32>,
}

#[derive(Debug, Args)]
pub struct StateShowArgs {
    #[command(flatten)]
    pub series: SeriesArgs,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Debug, Args)]
pub struct StateSetArgs {
    #[command(flatten)]
    pub series: SeriesArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    /// New watermark. May be lower than the current one.
    #[arg(long)]
    pub chapter: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_args(base_url: &str) -> SeriesArgs {
        SeriesArgs {
            series: " A Phieu ".to_owned(),
            base_url: base_url.to_owned(),
        }
    }

    #[test]
    fn identity_trims_and_validates() -> anyhow::Result<()> {
        let id = series_args("https://truyen.example/a-phieu/").identity()?;
        assert_eq!(id.name, "A Phieu");
        assert_eq!(id.base_url, "https://truyen.example/a-phieu");
        Ok(())
    }

    #[test]
    fn identity_rejects_non_http() {
        let err = series_args("ftp://x/y").identity().unwrap_err().to_string();
        assert!(err.contains("http or https"));
        assert!(series_args("not a url").identity().is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let args = PipelineArgs {
            workers: 0,
            poll_interval_secs: 1,
            batch_window_secs: 1,
            recheck_window: 5,
        };
        assert!(args.settings().is_err());
    }

    #[test]
    fn cli_parses_run_range() {
        let cli = Cli::parse_from([
            "novelcast",
            "run",
            "--series",
            "x",
            "--base-url",
            "http://x",
            "--start",
            "3",
        ]);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.start, 3);
                assert_eq!(args.end, None);
                assert_eq!(args.pipeline.workers, 5);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
