// m4b-merge - Audiobook MP3 to M4B merger
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{Context, Result};
use clap::Parser;
use m4b_merge::audio::concat::list_source_files;
use m4b_merge::{ensure_m4b_extension, MergeConfig, MergePipeline, MergeRequest, MergeRunner};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "m4b-merge")]
#[command(about = "Merge a folder of MP3 tracks into one chaptered M4B audiobook", long_about = None)]
struct Cli {
    /// Folder holding the book's MP3 files
    folder: PathBuf,

    /// Output file (".m4b" is appended when missing)
    destination: Option<PathBuf>,

    /// Embed pictures from every track, not just the first
    #[arg(short = 'a', long)]
    all_images: bool,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only list the files that would be merged, in order
    #[arg(short, long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MergeConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MergeConfig::default(),
    };

    if cli.list {
        let files = list_source_files(&cli.folder, config.source_extension()).await?;
        for (i, file) in files.iter().enumerate() {
            println!("{:>3}. {}", i + 1, file.display());
        }
        return Ok(());
    }

    let destination = cli
        .destination
        .context("a destination file is required unless --list is given")?;
    let request = MergeRequest::new(
        cli.folder,
        ensure_m4b_extension(&destination),
        cli.all_images,
    );

    let runner = MergeRunner::new(MergePipeline::with_ffmpeg(config));
    let mut handle = runner.start(request)?;
    while let Some(stage) = handle.next_progress().await {
        println!("{}...", stage);
    }

    match handle.wait().await {
        Ok(path) => {
            println!("Created {}", path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}
