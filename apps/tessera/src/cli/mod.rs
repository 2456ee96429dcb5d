//! # Tessera CLI Module
//!
//! ## Available Commands
//!
//! - `eval` - Evaluate a document and print the evaluated tree
//! - `run` - Execute a script-object function and apply its mutations
//! - `classify` - Report every function as sync or async
//! - `deps` - Print the evaluation order and dependency edges

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_core::TesseraError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Tessera - reactive evaluation engine
///
/// Evaluates entity documents whose properties are bound to JavaScript-like
/// expressions, and applies script-object mutations incrementally.
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate a document and print the evaluated tree
    Eval {
        /// Path to the document (JSON)
        #[arg(short, long)]
        document: PathBuf,
    },

    /// Execute a function and apply the mutations it made
    Run {
        /// Path to the document (JSON)
        #[arg(short, long)]
        document: PathBuf,

        /// Function to call, as Entity.function
        #[arg(short, long)]
        function: String,

        /// Arguments as JSON (an array spreads into positional arguments)
        #[arg(short, long)]
        args: Option<String>,
    },

    /// Classify every function as sync or async
    Classify {
        /// Path to the document (JSON)
        #[arg(short, long)]
        document: PathBuf,
    },

    /// Print the evaluation order and dependency edges
    Deps {
        /// Path to the document (JSON)
        #[arg(short, long)]
        document: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), TesseraError> {
    let ctx = CommandContext {
        config: cli.config.as_deref(),
        json_mode: cli.json_mode,
    };

    match cli.command {
        Commands::Eval { document } => cmd_eval(ctx, &document),
        Commands::Run {
            document,
            function,
            args,
        } => cmd_run(ctx, &document, &function, args.as_deref()),
        Commands::Classify { document } => cmd_classify(ctx, &document),
        Commands::Deps { document } => cmd_deps(ctx, &document),
    }
}
