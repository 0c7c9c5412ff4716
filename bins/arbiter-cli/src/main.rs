mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Check test data and submit code to the judge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a test-data directory and print its subtasks
    Check {
        /// Test-data directory
        dir: PathBuf,

        /// Secret key; a matching key skips validation
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Push a submission onto the judge queue
    Submit {
        /// Language key (e.g., cc, py3)
        #[arg(short, long)]
        lang: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// Test-data directory, as seen by the worker
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Standard input for a self-test run
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// JSON file with config overrides
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Mark as a self-submission
        #[arg(long, default_value = "false")]
        self_test: bool,

        /// Follow events until the verdict arrives
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Show the stored result of a request
    Result {
        /// Request id
        id: uuid::Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { dir, key } => {
            commands::check(&dir, key.as_deref())?;
        }
        Commands::Submit {
            lang,
            file,
            data,
            input,
            config,
            self_test,
            wait,
        } => {
            commands::submit(commands::Submission {
                lang,
                file,
                data,
                input,
                config,
                self_test,
                wait,
            })
            .await?;
        }
        Commands::Result { id } => {
            commands::show_result(&id).await?;
        }
    }

    Ok(())
}
