//! camera_mapping - resolve camera identities and write the mapping file
//!
//! Prints the resulting slot table. The daemon reads the file at startup.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use specimen_rig::{MappingFile, RigConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Mapping file to write (defaults to the configured path).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Print the mapping that would be written without writing it.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = RigConfig::load()?;
    let resolver = config.resolver()?;
    let file = MappingFile::new(args.out.unwrap_or_else(|| config.mapping_path.clone()));

    let mapping = if args.dry_run {
        resolver.resolve()
    } else {
        resolver.resolve_into(&file)?
    };

    println!("{:>4}  {:>5}  stable identifier", "slot", "index");
    for entry in mapping.iter() {
        println!(
            "{:>4}  {:>5}  {}",
            entry.slot_index, entry.enumeration_index, entry.stable_id
        );
    }
    if mapping.is_empty() {
        println!("no cameras resolved");
    }
    if !args.dry_run {
        println!("wrote {}", file.path().display());
    }
    Ok(())
}
