//! Binary entry point for the quadstore command line tool.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use quadstore::admin::{
    inspect_database, open_database, stats_for, verify_database, AdminOpenOptions,
    MetarootReport, ResourceDetail, StatsReport, VerifyLevel, VerifyReport,
};
use quadstore::session::{Decision, RecoveryReport};
use quadstore::{DatabaseConfig, IndexId, NodeId, PhaseNumber, Quad, DECISION_LOG_FILE};

#[path = "cli/config.rs"]
mod config;

use config::{CliConfig, DATABASE_CONFIG_FILE};

#[derive(Parser, Debug)]
#[command(
    name = "quadstore",
    version,
    about = "Command line tool for quadstore databases",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, value_name = "DIR", help = "Database directory")]
    db: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Database configuration file (TOML)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "QUADSTORE_CLI_CONFIG",
        help = "CLI settings file; defaults to the platform config directory"
    )]
    cli_config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QuadArgs {
    subject: u64,
    predicate: u64,
    object: u64,
    graph: u64,
}

impl QuadArgs {
    fn quad(&self) -> Quad {
        Quad::new(self.subject, self.predicate, self.object, self.graph)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Create a database and write its configuration file")]
    Init {
        #[arg(
            long = "index",
            value_name = "NAME",
            help = "Index to maintain, e.g. spog (repeatable; default all six)"
        )]
        indexes: Vec<String>,

        #[arg(long, value_name = "BYTES", help = "Block size of statement stores")]
        block_size: Option<usize>,

        #[arg(long, help = "Skip fsync of block files on prepare")]
        no_sync: bool,
    },

    #[command(about = "Insert one quad and commit")]
    Add(QuadArgs),

    #[command(about = "Remove one quad and commit")]
    Remove(QuadArgs),

    #[command(about = "List quads matching a pattern; 0 is a wildcard")]
    Find {
        #[arg(default_value_t = 0)]
        subject: u64,
        #[arg(default_value_t = 0)]
        predicate: u64,
        #[arg(default_value_t = 0)]
        object: u64,
        #[arg(default_value_t = 0)]
        graph: u64,

        #[arg(long, value_name = "NAME", help = "Scan this index instead of the chosen one")]
        index: Option<String>,

        #[arg(long, value_name = "N", help = "Stop after N quads")]
        limit: Option<usize>,
    },

    #[command(about = "Show recovery results, the decision log and metaroot slots")]
    Phases,

    #[command(about = "Print per-participant statistics")]
    Stats,

    #[command(about = "Verify on-disk structures")]
    Verify {
        #[arg(
            long,
            value_enum,
            default_value_t = VerifyLevelArg::Fast,
            help = "Verification level"
        )]
        level: VerifyLevelArg,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

#[derive(Serialize)]
struct InitReport<'a> {
    directory: String,
    config_file: String,
    recovery: &'a RecoveryReport,
}

#[derive(Serialize)]
struct MutationReport {
    changed: bool,
    quad: Quad,
    phases: Vec<(String, PhaseNumber)>,
}

#[derive(Serialize)]
struct FindReport {
    index: String,
    phase: PhaseNumber,
    quads: Vec<Quad>,
}

#[derive(Serialize)]
struct PhasesReport<'a> {
    recovery: &'a RecoveryReport,
    decision: Option<&'a Decision>,
    metaroots: Vec<MetarootReport>,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let cli_config = CliConfig::load(cli.open.cli_config.clone())?;
    let mut db_config =
        cli_config.resolve(cli.open.config.as_deref(), cli.open.db.as_deref())?;
    tracing::debug!(
        cli_config = ?cli_config.source(),
        directory = %db_config.directory.display(),
        "cli.resolve"
    );

    match cli.command {
        Command::Init {
            indexes,
            block_size,
            no_sync,
        } => {
            if !indexes.is_empty() {
                db_config.indexes = indexes;
            }
            if let Some(size) = block_size {
                db_config.block_size = size;
            }
            if no_sync {
                db_config.sync = false;
            }
            run_init(cli.format, db_config)?;
        }
        Command::Add(args) => run_mutation(cli.format, db_config, args.quad(), true)?,
        Command::Remove(args) => run_mutation(cli.format, db_config, args.quad(), false)?,
        Command::Find {
            subject,
            predicate,
            object,
            graph,
            index,
            limit,
        } => {
            let pattern = [
                NodeId(subject),
                NodeId(predicate),
                NodeId(object),
                NodeId(graph),
            ];
            run_find(cli.format, db_config, pattern, index.as_deref(), limit)?;
        }
        Command::Phases => {
            let db = open_database(&AdminOpenOptions::new(db_config))?;
            let report = PhasesReport {
                recovery: db.recovery(),
                decision: db.coordinator().decision_log().latest(),
                metaroots: inspect_database(&db)?,
            };
            emit(cli.format, &report, || print_phases_text(&report))?;
        }
        Command::Stats => {
            let db = open_database(&AdminOpenOptions::new(db_config))?;
            let report = stats_for(&db)?;
            emit(cli.format, &report, || print_stats_text(&report))?;
        }
        Command::Verify { level } => {
            let db = open_database(&AdminOpenOptions::new(db_config))?;
            let report = verify_database(&db, level.into())?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn run_init(format: OutputFormat, config: DatabaseConfig) -> Result<(), Box<dyn Error>> {
    let directory = config.directory.clone();
    if directory.join(DECISION_LOG_FILE).exists() {
        return Err(format!("database already exists in {}", directory.display()).into());
    }
    config.validate()?;
    config.store_options()?;
    fs::create_dir_all(&directory)?;
    let mut on_disk = config.clone();
    on_disk.directory = PathBuf::from(".");
    let config_file = directory.join(DATABASE_CONFIG_FILE);
    fs::write(&config_file, on_disk.to_toml_string()?)?;

    let db = open_database(&AdminOpenOptions::new(config).create_if_missing(true))?;
    let report = InitReport {
        directory: directory.display().to_string(),
        config_file: config_file.display().to_string(),
        recovery: db.recovery(),
    };
    emit(format, &report, || {
        println!("Initialised {}", report.directory);
        println!("  config: {}", report.config_file);
        for (name, phase) in &report.recovery.selected {
            println!("  {name}: phase {phase}");
        }
    })
}

fn run_mutation(
    format: OutputFormat,
    config: DatabaseConfig,
    quad: Quad,
    insert: bool,
) -> Result<(), Box<dyn Error>> {
    let mut db = open_database(&AdminOpenOptions::new(config))?;
    let changed = {
        let store = db.statements()?;
        let mut store = store.lock();
        if insert {
            store.add_triple(quad.subject, quad.predicate, quad.object, quad.graph)?
        } else {
            store.remove_triples(quad.subject, quad.predicate, quad.object, quad.graph)?
        }
    };
    let phases = if changed { db.commit()? } else { Vec::new() };
    let report = MutationReport {
        changed,
        quad,
        phases,
    };
    emit(format, &report, || {
        let verb = match (insert, report.changed) {
            (true, true) => "added",
            (true, false) => "already present",
            (false, true) => "removed",
            (false, false) => "not present",
        };
        println!("{verb} {}", report.quad);
        for (name, phase) in &report.phases {
            println!("  {name}: phase {phase}");
        }
    })
}

fn run_find(
    format: OutputFormat,
    config: DatabaseConfig,
    pattern: [NodeId; 4],
    index: Option<&str>,
    limit: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let db = open_database(&AdminOpenOptions::new(config))?;
    let snapshot = db.snapshot()?;
    let mut tuples = match index {
        Some(name) => snapshot.find_tuples_in(name.parse::<IndexId>()?, pattern)?,
        None => snapshot.find_tuples(pattern[0], pattern[1], pattern[2], pattern[3])?,
    };
    let index = tuples.index();
    let phase = tuples.phase();
    let mut quads = Vec::new();
    while let Some(quad) = tuples.next_quad()? {
        if limit.is_some_and(|n| quads.len() >= n) {
            break;
        }
        quads.push(quad);
    }
    tuples.close();
    let report = FindReport {
        index: index.name().to_string(),
        phase,
        quads,
    };
    emit(format, &report, || {
        for quad in &report.quads {
            println!(
                "{} {} {} {}",
                quad.subject, quad.predicate, quad.object, quad.graph
            );
        }
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_phases_text(report: &PhasesReport<'_>) {
    println!("Recovery: fresh={}", report.recovery.fresh);
    for (name, phase) in &report.recovery.selected {
        println!("  {name}: phase {phase}");
    }
    if !report.recovery.aborted.is_empty() {
        println!("  aborted: {}", report.recovery.aborted.join(", "));
    }
    if !report.recovery.replayed.is_empty() {
        println!("  replayed: {}", report.recovery.replayed.join(", "));
    }
    if report.recovery.decision_aborted {
        println!("  pending decision abandoned");
    }
    match report.decision {
        Some(decision) => println!("Decision: seq={} state={:?}", decision.seq, decision.state),
        None => println!("Decision: none"),
    }
    for meta in &report.metaroots {
        println!("{}:", meta.resource);
        for slot in &meta.slots {
            let phase = slot
                .phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into());
            print!("  slot {} {:<8} phase={phase}", slot.slot, slot.status);
            if let Some(detail) = &slot.detail {
                print!(" ({detail})");
            }
            println!();
        }
    }
}

fn print_stats_text(report: &StatsReport) {
    println!(
        "Directory: {} ({} bytes on disk)",
        report.directory, report.disk_bytes
    );
    for res in &report.resources {
        let phase = res
            .phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        println!("{} [{}] phase={phase}", res.name, res.state);
        match &res.detail {
            ResourceDetail::Statements(s) => {
                println!(
                    "  quads={} indexes={} block_size={} blocks={} free={} pending={}",
                    s.nr_quads,
                    s.indexes.join(","),
                    s.block_size,
                    s.block_count,
                    s.free_blocks,
                    s.pending_blocks
                );
            }
            ResourceDetail::Nodes(n) => {
                println!(
                    "  nodes={} next={} high_water={} free={} pending={}",
                    n.nr_nodes, n.next_node, n.high_water, n.free_ids, n.pending_ids
                );
            }
            ResourceDetail::Other => {}
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} resources={} keys={} blocks={} live_nodes={}",
        report.level,
        report.success,
        report.counts.resources,
        report.counts.keys_scanned,
        report.counts.blocks_checked,
        report.counts.live_nodes,
    );
    for finding in &report.findings {
        match &finding.resource {
            Some(res) => println!("- {:?} [{res}]: {}", finding.severity, finding.message),
            None => println!("- {:?}: {}", finding.severity, finding.message),
        }
    }
}
