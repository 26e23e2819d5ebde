//! Gridcalc - recalculate a spreadsheet snapshot from the command line

mod config_dir;

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use gridcalc_core::{CellPosition, CellsBySheet, EngineConfig, RecalcEngine};
use tracing_subscriber::EnvFilter;

const DEFAULT_SHEET: &str = "Sheet1";

fn print_usage() {
    eprintln!("Usage: gridcalc [OPTIONS] <SNAPSHOT.json>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <SNAPSHOT.json>           Cells by sheet, row and column (JSON)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -f, --functions <FILE>    Load custom Rhai functions (can be repeated)");
    eprintln!("  --config <FILE>           Engine config (default: config.toml in the config dir)");
    eprintln!("  --no-default-functions    Do not load default.rhai from the config dir");
    eprintln!("  --set <SHEET!A1=TEXT>     Edit a cell after initializing (can be repeated)");
    eprintln!("  -h, --help                Print help");
}

#[derive(Debug, Default, PartialEq)]
struct Options {
    snapshot: PathBuf,
    functions_files: Vec<PathBuf>,
    config: Option<PathBuf>,
    no_default_functions: bool,
    edits: Vec<(CellPosition, String)>,
}

/// `None` when help was requested.
fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut options = Options::default();
    let mut snapshot: Option<PathBuf> = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(None),
            "-f" | "--functions" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--functions requires a file path");
                };
                options.functions_files.push(PathBuf::from(path));
            }
            "--config" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--config requires a file path");
                };
                options.config = Some(PathBuf::from(path));
            }
            "--no-default-functions" => options.no_default_functions = true,
            "--set" => {
                i += 1;
                let Some(edit) = args.get(i) else {
                    bail!("--set requires SHEET!A1=TEXT");
                };
                options.edits.push(parse_edit(edit)?);
            }
            arg if arg.starts_with('-') => bail!("Unknown option: {}", arg),
            arg => {
                if snapshot.is_some() {
                    bail!("Unexpected argument: {}", arg);
                }
                snapshot = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let Some(snapshot) = snapshot else {
        bail!("missing snapshot file");
    };
    options.snapshot = snapshot;
    Ok(Some(options))
}

/// `Sheet1!B2==A1*2` edits B2 on Sheet1 to `=A1*2`.
fn parse_edit(edit: &str) -> Result<(CellPosition, String)> {
    let Some((target, text)) = edit.split_once('=') else {
        bail!("Invalid edit {:?}: expected SHEET!A1=TEXT", edit);
    };
    let Some(pos) = CellPosition::parse_a1(target.trim(), DEFAULT_SHEET) else {
        bail!("Invalid cell reference: {}", target);
    };
    Ok((pos, text.to_string()))
}

fn load_config(options: &Options) -> Result<EngineConfig> {
    let mut config = match &options.config {
        Some(path) => EngineConfig::load(path)?,
        None => match config_dir::default_config_path().filter(|p| p.is_file()) {
            Some(path) => EngineConfig::load(&path)?,
            None => EngineConfig::default(),
        },
    };
    config_dir::prepend_default_functions_if_present(
        &mut config.functions_files,
        options.no_default_functions,
    );
    config.functions_files.extend(options.functions_files.iter().cloned());
    Ok(config)
}

/// `RUST_LOG` wins over the configured filter; the default is `warn`.
fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(options: Options, config: EngineConfig) -> Result<CellsBySheet> {
    let text = std::fs::read_to_string(&options.snapshot)
        .with_context(|| format!("reading {}", options.snapshot.display()))?;
    let mut cells: CellsBySheet = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", options.snapshot.display()))?;

    let mut engine = RecalcEngine::with_config(config)?;
    let mut changes = engine.initialize(&cells, &CellsBySheet::new()).await?;
    cells.merge(&changes);

    for (pos, text) in &options.edits {
        let edit = engine.calculate(&pos.sheet, pos.coords(), text, &cells).await?;
        cells.merge(&edit);
        for (pos, config) in edit.iter() {
            changes.insert(&pos, config.clone());
        }
    }
    Ok(changes)
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Some(options)) => options,
        Ok(None) => {
            print_usage();
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = real_main(options) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn real_main(options: Options) -> Result<()> {
    let config = load_config(&options)?;
    init_tracing(config.log_filter.as_deref());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .context("starting runtime")?;
    let changes = runtime.block_on(run(options, config))?;
    println!("{}", serde_json::to_string_pretty(&changes)?);
    Ok(())
}
