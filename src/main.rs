//! # docseek CLI
//!
//! ## Usage
//!
//! ```bash
//! docseek --config ./config/docseek.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docseek search "<query>"` | Hybrid search over the documentation tree |
//! | `docseek suggest <prefix>` | Autocomplete titles, tags and documents |
//! | `docseek docs` | List indexed documents |
//! | `docseek eval <queries.toml>` | Recall@K, MRR@10 and nDCG@10 for a labeled query set |
//! | `docseek tune <queries.toml>` | Grid search over pipeline parameters |
//!
//! Logging goes to stderr. `DOCSEEK_LOG` takes an `EnvFilter` directive
//! and overrides `-q` / `-v`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use docseek::config::load_config;
use docseek::eval::{load_query_set, run_eval, run_tune};
use docseek::index::DocumentationIndex;
use docseek::search::{run_docs, run_search, run_suggest, OutputMode};
use docseek_core::evaluation::EvalOptions;
use docseek_core::pipeline::SearchOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// docseek: hybrid BM25 + embedding retrieval over markdown documentation.
#[derive(Parser)]
#[command(name = "docseek", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docseek.toml")]
    config: PathBuf,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the documentation.
    ///
    /// Runs BM25 retrieval, rank fusion, MMR diversification, chunking and
    /// semantic scoring, then prints the best chunks with their scores.
    Search {
        query: String,

        /// Maximum number of results (capped by `retrieval.final_context_size`).
        #[arg(long)]
        limit: Option<usize>,

        /// Requester role; sections whose `role` metadata matches get a bonus.
        #[arg(long)]
        role: Option<String>,

        /// Override the lexical/semantic blend for this query.
        #[arg(long)]
        alpha: Option<f64>,

        /// Print the per-stage pipeline trace.
        #[arg(long)]
        trace: bool,
    },

    /// Suggest completions for a prefix.
    Suggest {
        prefix: String,

        #[arg(long, default_value_t = 5)]
        limit: usize,
    },

    /// List indexed documents.
    Docs,

    /// Evaluate retrieval quality against a labeled query set.
    Eval {
        queries: PathBuf,

        /// Results requested per query.
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Recall cut-offs.
        #[arg(long = "k", value_delimiter = ',', default_values_t = [5, 10])]
        ks: Vec<usize>,
    },

    /// Sweep pipeline parameters and rank them by nDCG@10.
    Tune {
        queries: PathBuf,

        /// Trials to print.
        #[arg(long, default_value_t = 5)]
        top: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long = "k", value_delimiter = ',', default_values_t = [5, 10])]
        ks: Vec<usize>,
    },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSEEK_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = load_config(&cli.config)?;
    let mut index = DocumentationIndex::from_config(&config)?;

    match cli.command {
        Commands::Search {
            query,
            limit,
            role,
            alpha,
            trace,
        } => {
            let options = SearchOptions {
                limit: limit.unwrap_or(config.retrieval.final_context_size),
                role,
                alpha,
            };
            let mode = OutputMode {
                json: cli.json,
                trace,
            };
            run_search(&mut index, &query, &options, mode)?;
        }
        Commands::Suggest { prefix, limit } => {
            run_suggest(&index, &prefix, limit, cli.json)?;
        }
        Commands::Docs => {
            run_docs(&index, cli.json)?;
        }
        Commands::Eval { queries, limit, ks } => {
            let set = load_query_set(&queries)?;
            run_eval(&mut index, &set, &EvalOptions { limit, ks }, cli.json)?;
        }
        Commands::Tune {
            queries,
            top,
            limit,
            ks,
        } => {
            let set = load_query_set(&queries)?;
            run_tune(&mut index, &set, &EvalOptions { limit, ks }, top, cli.json)?;
        }
    }

    Ok(())
}
