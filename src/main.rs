#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

/// Decompress a gzip file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The gzip file to read
    input: PathBuf,
    /// The file to write the decompressed bytes to
    output: PathBuf,
}

fn run(cli: &Cli) -> Result<()> {
    let input = BufReader::new(
        File::open(&cli.input).with_context(|| format!("opening {}", cli.input.display()))?,
    );
    let output = BufWriter::new(
        File::create(&cli.output).with_context(|| format!("creating {}", cli.output.display()))?,
    );

    degzip::gunzip_to(input, output)
        .with_context(|| format!("decompressing {}", cli.input.display()))
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("gunzip: {err:#}");
        std::process::exit(1);
    }
}
