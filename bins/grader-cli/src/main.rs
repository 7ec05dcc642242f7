mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grader-cli")]
#[command(about = "Grader CLI - Grade code locally, compare submissions, preview test input", long_about = None)]
struct Cli {
    /// Config file (defaults to $GRADER_CONFIG or config/grader.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file against a JSON file of test cases and print the grade
    Grade {
        /// Source file to grade
        #[arg(short, long)]
        file: PathBuf,

        /// Language name (e.g., python, java, cpp)
        #[arg(short, long)]
        language: String,

        /// JSON array of test cases
        #[arg(short, long)]
        tests: PathBuf,

        /// Maximum score of the assignment
        #[arg(short, long, default_value = "100")]
        max_score: u32,

        /// Print the full run report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Compare two source files for similarity
    Compare {
        first: PathBuf,
        second: PathBuf,

        /// Language used to pick comment markers
        #[arg(short, long, default_value = "python")]
        language: String,
    },

    /// Find similar pairs among every source file in a directory
    Scan {
        /// Directory of submissions, one file per student
        #[arg(short, long)]
        dir: PathBuf,

        #[arg(short, long, default_value = "python")]
        language: String,

        /// Minimum similarity percentage (defaults to configured threshold)
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Show the stdin a structured test input produces
    Format {
        /// Input value as JSON (e.g., '[1, 2, 3]')
        #[arg(short, long)]
        input: String,

        /// Input format tag (single, multiple, multiline, array, matrix, raw)
        #[arg(short, long, default_value = "single")]
        format: String,
    },

    /// List configured languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Grade {
            file,
            language,
            tests,
            max_score,
            json,
        } => {
            commands::grade(&config, &file, &language, &tests, max_score, json).await?;
        }
        Commands::Compare {
            first,
            second,
            language,
        } => {
            commands::compare(&config, &first, &second, &language)?;
        }
        Commands::Scan {
            dir,
            language,
            threshold,
        } => {
            commands::scan(&config, &dir, &language, threshold)?;
        }
        Commands::Format { input, format } => {
            commands::format_input(&input, &format)?;
        }
        Commands::Languages => {
            commands::list_languages(&config);
        }
    }

    Ok(())
}
