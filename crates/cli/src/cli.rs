use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Rule-driven code injection for loaded units.
#[derive(Parser, Debug)]
#[command(name = "graft", about = "Rule-driven instrumentation of loaded code units")]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Assemble a `.gasm` source file into a unit file
    Assemble {
        source: PathBuf,
        /// Output path (default: the source path with a `.unit` extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the disassembly of a unit file
    Inspect { unit: PathBuf },

    /// Parse the rules of a configuration file and report rejected entries
    Rules { config: PathBuf },

    /// Load units under the engine and invoke an entry method
    Run {
        /// Configuration file; also the rule source watched for changes
        #[arg(long, env = "GRAFT_CONFIG")]
        config: PathBuf,

        /// Directory searched recursively for `*.unit` files
        #[arg(long)]
        units: PathBuf,

        /// Entry point as `<unit>::<method>`, called without arguments
        #[arg(long)]
        entry: String,

        /// Keep running: reload rules on change and re-invoke the entry
        /// every refresh interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}
