//! webtoon-harvest: command-line entry point.

mod repl;

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use webtoon_harvest::{HarvestConfig, HarvestError, Harvester, ScrapeServiceConfig, StrategyKind};

#[derive(Parser)]
#[command(
    name = "webtoon-harvest",
    about = "Extract webtoon page images into session folders and pack them into portable bundles",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Directory holding the session folders.
    #[arg(long, global = true)]
    uploads_root: Option<PathBuf>,

    /// Project-state JSON file.
    #[arg(long, global = true)]
    data_file: Option<PathBuf>,

    /// Endpoint of the render-and-scrape service used by the structural strategy.
    #[arg(long, global = true)]
    scrape_endpoint: Option<String>,

    /// Maximum simultaneous downloads on the concurrent path.
    #[arg(long, global = true)]
    max_in_flight: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the page images of one URL into a new session folder.
    Extract {
        url: String,

        /// Discovery strategy (markup, structural).
        #[arg(short, long, default_value = "markup")]
        strategy: StrategyKind,

        /// Delete older session folders after a successful run.
        #[arg(long)]
        prune: bool,
    },

    /// Pack the project state and the latest session into a bundle.
    Pack {
        /// Output file.
        #[arg(short, long, default_value = "project_backup.zip")]
        output: PathBuf,
    },

    /// Restore a bundle produced by `pack`.
    Unpack { archive: PathBuf },

    /// Delete session folders (all but the latest, unless --all).
    Cleanup {
        #[arg(long)]
        all: bool,
    },

    /// Show the latest session folder.
    Latest,

    /// List session folders, oldest first.
    Sessions,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   webtoon-harvest completions bash > ~/.local/share/bash-completion/completions/webtoon-harvest
    ///   webtoon-harvest completions zsh > ~/.zfunc/_webtoon-harvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Launch an interactive session (default). Session folders are cleared
    /// when it starts and when it ends.
    Repl,
}

impl Cli {
    fn config(&self) -> HarvestConfig {
        let mut config = HarvestConfig::from_env();
        if let Some(root) = &self.uploads_root {
            config.uploads_root = root.clone();
        }
        if let Some(file) = &self.data_file {
            config.data_file = file.clone();
        }
        if let Some(endpoint) = &self.scrape_endpoint {
            let api_key = config.scrape_service.take().and_then(|s| s.api_key);
            config.scrape_service = Some(ScrapeServiceConfig {
                endpoint: endpoint.clone(),
                api_key,
            });
        }
        if let Some(n) = self.max_in_flight {
            config.max_in_flight = n.max(1);
        }
        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config();
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Extract {
            url,
            strategy,
            prune,
        } => {
            let harvester = Harvester::new(config)?;
            runtime.block_on(async {
                let outcome = harvester.extract(&url, strategy).await?;
                print_json(&outcome)?;
                if prune {
                    harvester.sessions().cleanup_keep_latest()?;
                }
                anyhow::Ok(())
            })
        }

        Commands::Pack { output } => {
            let harvester = Harvester::new(config)?;
            let bytes = harvester
                .archiver()
                .pack_current(&harvester.project_store())?;
            std::fs::write(&output, &bytes)
                .with_context(|| format!("failed to write {}", output.display()))?;
            print_json(&serde_json::json!({
                "output": output,
                "bytes": bytes.len(),
            }))
        }

        Commands::Unpack { archive } => {
            let harvester = Harvester::new(config)?;
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("failed to read {}", archive.display()))?;
            let report = harvester
                .archiver()
                .unpack(&bytes, &harvester.project_store());
            match report {
                Ok(report) => print_json(&report),
                Err(e) => Err(explain(e)),
            }
        }

        Commands::Cleanup { all } => {
            let sessions = webtoon_harvest::SessionManager::from_config(&config);
            let report = if all {
                sessions.cleanup_all()?
            } else {
                sessions.cleanup_keep_latest()?
            };
            print_json(&report)
        }

        Commands::Latest => {
            let sessions = webtoon_harvest::SessionManager::from_config(&config);
            print_json(&sessions.latest_session()?)
        }

        Commands::Sessions => {
            let sessions = webtoon_harvest::SessionManager::from_config(&config);
            print_json(&serde_json::json!({
                "sessions": sessions.list_sessions()?,
                "counts": sessions.counts()?,
            }))
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "webtoon-harvest", &mut std::io::stdout());
            Ok(())
        }

        Commands::Repl => repl::run(config, &runtime),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Attach archive diagnostics to the error chain.
fn explain(err: HarvestError) -> anyhow::Error {
    let diagnostics = err.diagnostics().join("\n  ");
    if diagnostics.is_empty() {
        err.into()
    } else {
        anyhow::Error::new(err).context(format!("diagnostics:\n  {diagnostics}"))
    }
}
