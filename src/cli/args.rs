use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "layerfs", version)]
#[command(
    about = "Mount a writable overlay over a live source directory, keeping every change in private layer storage"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Mount the overlay and serve it until unmounted")]
    Mount {
        #[arg(help = "Source directory to layer over (never modified)")]
        source: PathBuf,
        #[arg(help = "Directory holding promoted content and the shadow ledger")]
        layer_storage: PathBuf,
        #[arg(help = "Where the overlay is mounted")]
        mountpoint: PathBuf,

        #[arg(long, help = "Enable debug logging")]
        debug: bool,

        #[arg(long, value_name = "FILE", help = "Read configuration from FILE")]
        config: Option<PathBuf>,

        #[arg(long, help = "Allow hard link creation inside the overlay")]
        allow_hardlinks: bool,

        #[arg(long, help = "Allow symlinks whose targets leave the overlay")]
        allow_cross_device_symlinks: bool,

        #[arg(long, help = "Let other users access the mount")]
        allow_other: bool,
    },
    #[command(about = "List the paths recorded in a layer's shadow ledger")]
    Shadow {
        #[arg(help = "Layer storage directory")]
        layer_storage: PathBuf,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
}

impl Commands {
    pub fn debug(&self) -> bool {
        matches!(self, Commands::Mount { debug: true, .. })
    }
}
