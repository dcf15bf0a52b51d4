use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "abyss", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long = "config", value_name = "FILE", global = true)]
    pub config_path: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run simulated visitors against an in-process backend
    Simulate {
        /// Number of visitors
        #[arg(short, long, default_value_t = 12)]
        visitors: usize,

        /// How long each visitor stays, in seconds
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },

    /// Generate sample configuration
    ConfigSample {
        /// Output path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
