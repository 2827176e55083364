//! Entity Compiler CLI
//!
//! Loads a schema (single document or directory), compiles the configured
//! roots and writes the entity graph as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use schema_entities::schema::{load_directory, load_file};
use schema_entities::{Checksum, Compiler, CompilerConfig, SchemaIndex};

#[derive(Parser)]
#[command(name = "schema-entities")]
#[command(about = "Compile an XSD type graph into a relational entity graph")]
struct Cli {
    /// Schema document (JSON) or a directory of documents
    schema: PathBuf,

    /// Configuration file (defaults to entities.toml lookup)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root type path; repeatable, overrides the configured roots
    #[arg(short, long = "root")]
    roots: Vec<String>,

    /// Write the entity graph here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Fail when any warning was reported
    #[arg(long)]
    strict: bool,

    /// Fail unless the output matches this fingerprint
    #[arg(long, value_name = "SHA256")]
    expect_fingerprint: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let document = if cli.schema.is_dir() {
        load_directory(&cli.schema)
    } else {
        load_file(&cli.schema)
    }
    .with_context(|| format!("loading schema from {}", cli.schema.display()))?;

    let index = SchemaIndex::build(document).context("indexing schema")?;
    let mut config = CompilerConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if !cli.roots.is_empty() {
        config.compiler.roots = cli.roots;
    }
    if config.compiler.roots.is_empty() {
        bail!("no roots given; pass --root or set compiler.roots");
    }

    let graph = Compiler::new(&index, &config)?.compile(&config.compiler.roots)?;

    let json = graph.to_json_pretty()?;
    match &cli.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} entities to {}", graph.entities.len(), path.display());
        }
        None => println!("{}", json),
    }

    if !graph.diagnostics.is_empty() {
        eprintln!("{}", graph.diagnostics.format_all());
    }
    eprintln!("Fingerprint: {}", graph.fingerprint()?);

    if let Some(expected) = cli.expect_fingerprint {
        let expected = Checksum::from(expected.to_lowercase());
        if !expected.verify(&graph.entities)? {
            bail!("entity graph does not match fingerprint {}", expected);
        }
    }

    if cli.strict && graph.diagnostics.has_warnings() {
        bail!("{} warning(s) reported", graph.diagnostics.warning_count());
    }
    Ok(())
}
