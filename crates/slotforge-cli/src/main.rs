//! slotforge CLI: lower JSON plan documents against a YAML catalog.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use slotforge_core::config::LoweringConfig;
use slotforge_core::explain::explain_abt;
use slotforge_core::names::NameGenerator;
use slotforge_core::scan_def::ScanDefinitions;
use slotforge_lower::{
    lower_plan, parse_plan_json, parse_yaml_catalog, rewrite_to_fixpoint, LoweringOptions,
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "slotforge")]
#[command(about = "Lower optimizer plans into slot-based stage trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the input ABT and the lowered stage tree
    Explain {
        /// Path to the JSON plan document
        #[arg(short, long)]
        plan: PathBuf,

        /// Path to the YAML catalog
        #[arg(short, long)]
        catalog: Option<PathBuf>,

        /// Partition count for parallel scans (overrides config)
        #[arg(long)]
        partitions: Option<usize>,

        /// Register the shard-filterer runtime slot before lowering
        #[arg(long)]
        sharded: bool,

        /// Mask collection UUIDs in the output
        #[arg(long)]
        strip_uuids: bool,
    },

    /// Run the path-lowering/const-eval fixpoint only
    Validate {
        /// Path to the JSON plan document
        #[arg(short, long)]
        plan: PathBuf,

        /// Rewrite round cap (overrides config)
        #[arg(long)]
        max_rounds: Option<usize>,
    },
}

fn main() {
    install_tracing_subscriber();
    let cli = Cli::parse();

    match cli.command {
        Commands::Explain {
            plan,
            catalog,
            partitions,
            sharded,
            strip_uuids,
        } => {
            let explained =
                explain_plan(&plan, catalog.as_deref(), partitions, sharded, strip_uuids);
            if let Err(e) = explained {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { plan, max_rounds } => match validate_plan(&plan, max_rounds) {
            Ok(rounds) => println!("✓ Plan is valid ({rounds} rewrite round(s))"),
            Err(e) => {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
        },
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn load_catalog(path: Option<&Path>) -> Result<ScanDefinitions, Box<dyn std::error::Error>> {
    match path {
        Some(p) => Ok(parse_yaml_catalog(&fs::read_to_string(p)?)?),
        None => Ok(ScanDefinitions::new()),
    }
}

fn explain_plan(
    plan_path: &Path,
    catalog_path: Option<&Path>,
    partitions: Option<usize>,
    sharded: bool,
    strip_uuids: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let doc = parse_plan_json(&fs::read_to_string(plan_path)?)?;
    let defs = load_catalog(catalog_path)?;

    let mut config = LoweringConfig::from_env();
    if let Some(n) = partitions {
        config.partitions = n;
    }
    config.register_shard_filterer |= sharded;
    let options = LoweringOptions::new(config);

    let input = explain_abt(&doc.root);
    let lowered = lower_plan(doc.root, &doc.props, &defs, &options)?;
    tracing::info!(rounds = lowered.rounds, "plan lowered");

    println!("=== INPUT ===");
    print!("{input}");
    println!();
    let text = if strip_uuids {
        lowered.explain_stripped()
    } else {
        lowered.explain()
    };
    print!("{text}");
    println!();
    println!("=== OUTPUTS ===");
    for (name, slot) in &lowered.output_slots {
        println!("  {name} -> {slot}");
    }
    if let Some(rid) = lowered.rid_slot {
        println!("  <rid> -> {rid}");
    }
    for (param, slot) in lowered.input_params.iter() {
        println!("  param {param} -> {slot}");
    }
    println!("fingerprint: {}", lowered.fingerprint().short());
    Ok(())
}

fn validate_plan(
    plan_path: &Path,
    max_rounds: Option<usize>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let doc = parse_plan_json(&fs::read_to_string(plan_path)?)?;
    let mut config = LoweringConfig::from_env();
    if let Some(n) = max_rounds {
        config.max_rewrite_rounds = n;
    }
    config.validate()?;

    let mut names = NameGenerator::new();
    let outcome = rewrite_to_fixpoint(doc.root, &mut names, config.max_rewrite_rounds)?;
    Ok(outcome.rounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_explain_flags() {
        let cli = Cli::try_parse_from([
            "slotforge",
            "explain",
            "--plan",
            "plan.json",
            "--catalog",
            "catalog.yaml",
            "--partitions",
            "4",
            "--sharded",
        ])
        .unwrap();
        match cli.command {
            Commands::Explain {
                plan,
                catalog,
                partitions,
                sharded,
                strip_uuids,
            } => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert_eq!(catalog, Some(PathBuf::from("catalog.yaml")));
                assert_eq!(partitions, Some(4));
                assert!(sharded);
                assert!(!strip_uuids);
            }
            Commands::Validate { .. } => panic!("expected explain"),
        }
    }

    #[test]
    fn missing_catalog_means_empty() {
        assert!(load_catalog(None).unwrap().is_empty());
    }
}
