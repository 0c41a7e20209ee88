//! Expands a configuration grid into a whisker table on disk.

use anyhow::Context;
use clap::Parser;
use remy::config::{set_logger, GenerateArgs};
use remy::whisker::{
    generate_whiskers, persistence::extend_tree, save_whiskers, ConfigRange, LoadMode, WhiskerTree,
};

fn main() -> anyhow::Result<()> {
    let args = GenerateArgs::parse();
    set_logger(args.log_level);

    let config = ConfigRange::load(&args.config)
        .with_context(|| format!("reading configuration {}", args.config.display()))?;
    let whiskers = generate_whiskers(&config);
    anyhow::ensure!(!whiskers.is_empty(), "configuration yields no whiskers");
    tracing::info!(
        whiskers = whiskers.len(),
        generations = config.generations,
        "generated whisker grid"
    );

    let mut tree = WhiskerTree::new().with_mode(args.insert_mode());
    extend_tree(&mut tree, whiskers.iter().copied(), LoadMode::SkipConflicts)
        .context("building tree from generated whiskers")?;
    let overlaps = tree.log_overlaps();
    save_whiskers(&whiskers, &args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    println!(
        "wrote {} whiskers ({} tree nodes, {} overlapping regions) to {}",
        whiskers.len(),
        tree.len(),
        overlaps,
        args.output.display()
    );
    Ok(())
}
