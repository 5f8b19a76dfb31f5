use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modstash")]
#[command(about = "Move Go module versions between a proxy, a bundle and storage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every dependency of a go.mod and pack them into one bundle
    Dump(DumpArgs),
    /// Import every bundle found in a directory into storage
    Load(LoadArgs),
}

impl Commands {
    pub fn config_dir(&self) -> Option<&std::path::Path> {
        match self {
            Commands::Dump(args) => args.config.as_deref(),
            Commands::Load(args) => args.config.as_deref(),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct DumpArgs {
    /// Directory containing go.mod
    pub manifest_dir: PathBuf,

    /// Directory the bundle is written to
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Directory containing modstash.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct LoadArgs {
    /// Directory searched for modstash_dump*.tar.gz bundles
    pub archive_dir: PathBuf,

    /// Directory containing modstash.toml
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}
