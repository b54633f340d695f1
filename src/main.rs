//! optima-host - drive the Optima script runtime from the command line.
//!
//! Usage:
//!   optima-host --root <DIR> list            Show discovered script units
//!   optima-host --root <DIR> open            Dispatch a workbook-open event
//!   optima-host --root <DIR> enter <PAGE>    Dispatch a page-enter event
//!   optima-host --root <DIR> cell <PAGE> <CELL> <VALUE>
//!                                            Dispatch a cell-changed event
//!   optima-host --root <DIR> run             Full lifecycle: open + enter
//!                                            every discovered page

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::Result;

use optima_core::{
    CellSnapshot, CellValue, ChangeSnapshot, Event, PageSnapshot, WorkbookSnapshot,
};
use optima_script::{EventReport, HostConfig, Scope, ScriptHost};

#[derive(Parser)]
#[command(
    name = "optima-host",
    version,
    about = "Script-hosting runtime for the Optima spreadsheet",
    long_about = "optima-host loads the global/, pages/ and shared/ script scopes \
                  from a scripts directory and dispatches spreadsheet events to \
                  the hooks they define."
)]
struct Cli {
    /// Scripts root directory (holds global/, pages/, shared/)
    #[arg(short, long, default_value = "scripts")]
    root: PathBuf,

    /// Per-invocation timeout in milliseconds
    #[arg(short, long, default_value = "5000")]
    timeout_ms: u64,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show discovered script units and the hooks they export
    List,

    /// Dispatch a workbook-open event
    Open,

    /// Dispatch a page-enter event for one page
    Enter {
        /// Page identifier (e.g. feuille_1)
        page: String,

        /// Display name (defaults to the identifier)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Dispatch a cell-changed event
    Cell {
        /// Page identifier
        page: String,

        /// Cell label (e.g. B4)
        cell: String,

        /// New raw value
        value: String,
    },

    /// Full lifecycle: workbook-open, then page-enter for every page scope
    Run,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = HostConfig::default()
        .with_scripts_root(&cli.root)
        .with_timeout(cli.timeout_ms);
    let host = ScriptHost::new(config)?;

    let diagnostics = host.load_all();
    for diagnostic in &diagnostics {
        eprintln!("warning: {diagnostic}");
    }

    match cli.command {
        Command::List => list_units(&host),
        Command::Open => {
            let page_count = page_ids(&host).len() as u32;
            let report = host.dispatch(&Event::WorkbookOpen {
                workbook: WorkbookSnapshot { page_count },
            })?;
            print_report(&report, cli.format)?;
        }
        Command::Enter { page, name } => {
            let name = name.unwrap_or_else(|| page.clone());
            let report = host.dispatch(&Event::PageEnter {
                page: PageSnapshot::new(page.as_str(), name),
            })?;
            print_report(&report, cli.format)?;
        }
        Command::Cell { page, cell, value } => {
            let new_raw = parse_cell_value(&value);
            let report = host.dispatch(&Event::CellChanged {
                page: Some(PageSnapshot::new(page.as_str(), page.clone())),
                cell: CellSnapshot { label: cell },
                change: ChangeSnapshot { new_raw },
            })?;
            print_report(&report, cli.format)?;
        }
        Command::Run => {
            let pages = page_ids(&host);
            let report = host.dispatch(&Event::WorkbookOpen {
                workbook: WorkbookSnapshot {
                    page_count: pages.len() as u32,
                },
            })?;
            print_report(&report, cli.format)?;

            for page in pages {
                let report = host.dispatch(&Event::PageEnter {
                    page: PageSnapshot::new(page.as_str(), page.clone()),
                })?;
                print_report(&report, cli.format)?;
            }
        }
    }

    Ok(())
}

fn list_units(host: &ScriptHost) {
    for unit in host.units() {
        let hooks = host
            .module_for(&unit.id)
            .map(|module| {
                module
                    .exports
                    .iter()
                    .map(|h| h.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "<not compiled>".to_string());
        println!("{:<40} {:<16} {}", unit.id, unit.scope.to_string(), hooks);
    }
}

fn page_ids(host: &ScriptHost) -> Vec<String> {
    let mut ids: Vec<String> = host
        .units()
        .iter()
        .filter_map(|unit| match &unit.scope {
            Scope::Page(id) => Some(id.to_string()),
            _ => None,
        })
        .collect();
    ids.dedup();
    ids
}

/// Interpret a CLI value the way a cell edit would: number, boolean, empty
/// or plain text.
fn parse_cell_value(raw: &str) -> CellValue {
    if raw.is_empty() {
        return CellValue::Empty;
    }
    if let Ok(number) = raw.parse::<f64>() {
        return CellValue::Number(number);
    }
    match raw {
        "true" => CellValue::Bool(true),
        "false" => CellValue::Bool(false),
        _ => CellValue::Text(raw.to_string()),
    }
}

fn print_report(report: &EventReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => {
            println!("event: {}", report.kind);
            for result in &report.results {
                let status = match result.error() {
                    None => "ok".to_string(),
                    Some(error) => error.to_string(),
                };
                println!("  {:<40} {:>8.1?}  {}", result.unit, result.elapsed, status);
                for line in &result.log {
                    println!("    {line}");
                }
            }
        }
    }
    Ok(())
}
