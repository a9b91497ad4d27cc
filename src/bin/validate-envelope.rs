use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::{fs, path::PathBuf};

use savings_pipeline::envelope::{compile_schema, validation_errors, OUTPUT_ENVELOPE_SCHEMA};

/// Validate an output envelope JSON file against the output envelope v1 schema.
#[derive(Parser, Debug)]
#[command(name = "validate-envelope", version, about = "Validate output envelope JSON against schema")]
struct Cli {
    /// Path to the envelope JSON file to validate
    path: PathBuf,

    /// Optional path to a schema file (defaults to the bundled output_envelope.v1.json)
    #[arg(long)]
    schema: Option<PathBuf>,
}

fn load_json(path: &PathBuf) -> Result<Value> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let json: Value = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    Ok(json)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let schema_json = match &args.schema {
        Some(path) => load_json(path)?,
        None => serde_json::from_str(OUTPUT_ENVELOPE_SCHEMA)
            .context("Bundled schema is not valid JSON")?,
    };
    let instance = load_json(&args.path)?;

    let compiled = compile_schema(schema_json)?;
    let errors = validation_errors(&compiled, &instance);
    if errors.is_empty() {
        println!("valid");
        Ok(())
    } else {
        eprintln!("invalid:");
        for error in errors {
            eprintln!("- {}", error);
        }
        std::process::exit(1)
    }
}
