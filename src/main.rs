use std::{env, path::PathBuf, process};

use anyhow::Context;
use humanoid_rig::options::{LoadOptions, load_options};
use humanoid_rig::pipeline::load_model_from_path;

const USAGE: &str = "Usage: humanoid-rig <input> [--options <file.json>] [--json]";

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let mut input: Option<PathBuf> = None;
    let mut options_path: Option<PathBuf> = None;
    let mut json = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--options" => match args.next() {
                Some(path) => options_path = Some(PathBuf::from(path)),
                None => usage(),
            },
            flag if flag.starts_with("--") => usage(),
            _ if input.is_none() => input = Some(PathBuf::from(&arg)),
            _ => usage(),
        }
    }
    let Some(input) = input else { usage() };

    let options = match &options_path {
        Some(path) => load_options(path)?,
        None => LoadOptions::default(),
    };
    let model = load_model_from_path(&input, &options)?;
    let report = &model.report;

    if json {
        let text =
            serde_json::to_string_pretty(report).context("failed to serialize report as JSON")?;
        println!("{text}");
        return Ok(());
    }

    println!("Model: {} ({:?})", report.model_name, report.source);
    println!(
        "Nodes: {} -> {} ({} pruned)",
        report.node_count_before_prune,
        report.node_count,
        report.removed_nodes.len()
    );
    println!(
        "Meshes: {}, Vertices: {}, Polygons: {}",
        report.mesh_count, report.total_vertices, report.total_polygons
    );
    println!("Mapped bones: {}", report.mapped_bones.len());
    for (slot, node) in &report.mapped_bones {
        println!("  {slot:<24} {node}");
    }
    if !report.missing_required_bones.is_empty() {
        println!("Missing: {}", report.missing_required_bones.join(", "));
    }
    for issue in &report.issues {
        println!("[{:?}] {}: {}", issue.severity, issue.code, issue.message);
    }

    Ok(())
}

fn usage() -> ! {
    eprintln!("{USAGE}");
    process::exit(2);
}
