//! Bug reproduction batch CLI
//!
//! # Usage
//!
//! ```bash
//! # Reproduce every entry of a database with the callgrind preset
//! bugtrace run --database bugs.json
//!
//! # Function-call tracing, only two records
//! bugtrace run --database bugs.json --preset function-trace --only i42 --only 1234
//!
//! # Show what a run would do
//! bugtrace plan --database bugs.json --config jerry.yaml
//! ```
//!
//! Failed passes are written to the run log; the exit status is non-zero
//! only when the configuration or the database cannot be loaded.

use std::path::{Path, PathBuf};

use anyhow::Context;
use bugtrace_orchestration::logging::init_logging;
use bugtrace_orchestration::{BatchOrchestrator, BugDatabase, PipelineConfig, Preset, RecordIdPolicy, RunLog};
use clap::{Args, Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "bugtrace")]
#[command(about = "Rebuild historical revisions with instrumentation and trace their failing inputs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reproduce every pass of the database
    Run {
        #[command(flatten)]
        batch: BatchArgs,

        /// Do not set the terminal title per pass
        #[arg(long)]
        no_title: bool,
    },

    /// List passes, their artifacts and which are already done
    Plan {
        #[command(flatten)]
        batch: BatchArgs,
    },
}

#[derive(Args)]
struct BatchArgs {
    /// Bug database (JSON array)
    #[arg(short, long)]
    database: PathBuf,

    /// YAML configuration (version 1)
    #[arg(short, long, conflicts_with = "preset")]
    config: Option<PathBuf>,

    /// Preset when no configuration file is given
    #[arg(short, long, default_value = "callgrind")]
    preset: String,

    /// Only these record ids (repeatable, tag included)
    #[arg(long)]
    only: Vec<String>,
}

impl BatchArgs {
    fn load(&self, cwd: &Path) -> anyhow::Result<(PipelineConfig, BugDatabase)> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_yaml(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PipelineConfig::preset(Preset::from_str(&self.preset)?),
        };
        config.resolve_paths(cwd);

        let policy = RecordIdPolicy::from_naming(&config.naming)?;
        let mut database = BugDatabase::load(&self.database, &policy)
            .with_context(|| format!("loading {}", self.database.display()))?;
        database.retain_ids(&self.only);
        Ok((config, database))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Run { batch, no_title } => {
            let (config, database) = batch.load(&cwd)?;
            let orchestrator =
                BatchOrchestrator::from_config(&config)?.with_terminal_title(config.log.terminal_title && !no_title);
            let mut run_log = RunLog::open(&config.paths.output_dir, &config.log.file_template)?;

            let report = orchestrator.run_batch(&database, &mut run_log).await;
            println!("{}", report.summary());
            if report.failed() > 0 || report.rejected > 0 {
                println!("Errors logged to {}", run_log.path().display());
            }
        }
        Commands::Plan { batch } => {
            let (config, database) = batch.load(&cwd)?;
            info!(preset = %config.preset, "Planning");
            let orchestrator = BatchOrchestrator::from_config(&config)?;

            for preview in orchestrator.preview(&database.records).await? {
                let layout = &preview.layout;
                let status = match (preview.binary_present, preview.graph_present) {
                    (_, true) => "done",
                    (true, false) => "trace",
                    (false, false) => "build+trace",
                };
                println!(
                    "{:<24} #{:<12} {:<12} {} -> {}",
                    layout.pass_name(),
                    layout.revision,
                    status,
                    layout.binary,
                    layout.graph
                );
            }
            for rejected in &database.rejected {
                println!("rejected entry #{}: {}", rejected.index, rejected.reason);
            }
        }
    }

    Ok(())
}
