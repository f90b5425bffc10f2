use clap::Parser;

use layerfs::cli::{Args, Commands};
use layerfs::commands::{self, MountRequest};
use layerfs::error;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> error::Result<()> {
    let args = Args::parse();

    let default_level = if args.command.debug() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("LAYERFS_LOG").unwrap_or_else(|_| default_level.to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Mount {
            source,
            layer_storage,
            mountpoint,
            debug: _,
            config,
            allow_hardlinks,
            allow_cross_device_symlinks,
            allow_other,
        } => {
            commands::mount_overlay(MountRequest {
                source,
                layer_storage,
                mountpoint,
                config,
                allow_hardlinks,
                allow_cross_device_symlinks,
                allow_other,
            })
            .await
        }
        Commands::Shadow {
            layer_storage,
            json,
        } => commands::list_shadowed(&layer_storage, json),
    }
}
