//! `strata` command-line tool

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_cache::{CacheStatistics, ContentCache};
use strata_codegraph::{analyze_project, CodeGraph, DEFAULT_EXCLUDES};
use strata_common::PathPattern;
use strata_core::OrchestratorConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_SNAPSHOT: &str = ".strata/cache.json";

fn cli() -> Command {
    let root = Arg::new("root")
        .long("root")
        .default_value(".")
        .value_parser(value_parser!(PathBuf))
        .help("Project root to analyze");
    let exclude = Arg::new("exclude")
        .long("exclude")
        .action(ArgAction::Append)
        .help("Extra exclude pattern (repeatable)");
    let json = Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON");
    let snapshot = Arg::new("snapshot")
        .long("snapshot")
        .default_value(DEFAULT_SNAPSHOT)
        .value_parser(value_parser!(PathBuf))
        .help("Cache snapshot file");

    Command::new("strata")
        .version(strata_core::VERSION)
        .about("Tiered change orchestration tools")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines (filter with RUST_LOG)"),
        )
        .subcommand(
            Command::new("analyze")
                .about("Build the code graph and print a summary")
                .arg(root.clone())
                .arg(exclude.clone())
                .arg(json.clone()),
        )
        .subcommand(
            Command::new("context")
                .about("Print prompt context for a file::symbol target")
                .arg(root)
                .arg(exclude)
                .arg(
                    Arg::new("target")
                        .required(true)
                        .help("Target such as app/models.py::User.save"),
                )
                .arg(
                    Arg::new("depth")
                        .long("depth")
                        .default_value("2")
                        .value_parser(value_parser!(usize))
                        .help("Caller/callee hops to include"),
                ),
        )
        .subcommand(
            Command::new("cache")
                .about("Inspect and maintain a result cache snapshot")
                .subcommand_required(true)
                .subcommand(
                    Command::new("stats")
                        .about("Show cache statistics")
                        .arg(snapshot.clone())
                        .arg(json),
                )
                .subcommand(
                    Command::new("prune")
                        .about("Drop entries older than an age")
                        .arg(snapshot.clone())
                        .arg(
                            Arg::new("older-than-secs")
                                .long("older-than-secs")
                                .required(true)
                                .value_parser(value_parser!(u64))
                                .help("Maximum entry age in seconds"),
                        ),
                )
                .subcommand(
                    Command::new("clear")
                        .about("Drop every entry")
                        .arg(snapshot.clone()),
                )
                .subcommand(
                    Command::new("invalidate")
                        .about("Drop entries whose file matches a pattern")
                        .arg(snapshot)
                        .arg(
                            Arg::new("pattern")
                                .required(true)
                                .action(ArgAction::Append)
                                .help("Glob pattern such as **/tests/*.py"),
                        ),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Validate configuration and print the effective settings")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML file to load (defaults when omitted)"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(err) = installed {
        eprintln!("logging disabled: {err}");
    }
}

fn build_graph(args: &ArgMatches) -> Result<CodeGraph> {
    let root = args
        .get_one::<PathBuf>("root")
        .context("missing --root")?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(ToString::to_string).collect();
    if let Some(extra) = args.get_many::<String>("exclude") {
        excludes.extend(extra.cloned());
    }
    analyze_project(root, excludes.as_slice()).with_context(|| format!("analyzing {}", root.display()))
}

fn analyze(args: &ArgMatches) -> Result<()> {
    let graph = build_graph(args)?;
    let stats = graph.stats();
    let cycles = graph.import_cycles();

    if args.get_flag("json") {
        let out = serde_json::json!({
            "stats": stats,
            "import_cycles": cycles,
            "skipped_files": graph.skipped_files(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Code Graph Summary");
    println!("==================");
    println!("Files:             {}", stats.files);
    println!("Classes:           {}", stats.classes);
    println!("Functions:         {}", stats.functions);
    println!("Methods:           {}", stats.methods);
    println!("Call edges:        {} ({} name-match only)", stats.call_edges, stats.low_confidence_edges);
    println!("Import edges:      {}", stats.import_edges);
    println!("Unresolved calls:  {}", stats.unresolved_calls);
    println!("Skipped files:     {}", stats.skipped_files);
    if !cycles.is_empty() {
        println!();
        println!("Import cycles:");
        for cycle in &cycles {
            println!("  {}", cycle.join(" -> "));
        }
    }
    Ok(())
}

fn context(args: &ArgMatches) -> Result<()> {
    let target = args
        .get_one::<String>("target")
        .context("missing target")?;
    let depth = args.get_one::<usize>("depth").copied().unwrap_or(2);
    let graph = build_graph(args)?;

    let (file, symbol) = target.split_once("::").unwrap_or((target.as_str(), ""));
    let symbol = symbol.replace("::", ".");
    let Some(element) = graph.locate(file, &symbol) else {
        bail!("no element found for {target}");
    };
    let Some(ctx) = graph.context_for(&element.id, depth) else {
        bail!("no context for {}", element.id);
    };
    print!("{}", ctx.render());
    Ok(())
}

async fn load_cache(snapshot: &Path) -> Result<ContentCache> {
    let cache = ContentCache::default();
    let loaded = cache
        .load_snapshot(snapshot)
        .await
        .with_context(|| format!("loading {}", snapshot.display()))?;
    tracing::debug!(entries = loaded, snapshot = %snapshot.display(), "cache snapshot loaded");
    Ok(cache)
}

async fn save_cache(cache: &ContentCache, snapshot: &Path) -> Result<()> {
    if let Some(dir) = snapshot.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    cache
        .save_snapshot(snapshot)
        .await
        .with_context(|| format!("saving {}", snapshot.display()))?;
    Ok(())
}

fn print_stats(stats: &CacheStatistics) {
    println!("Cache Statistics");
    println!("================");
    println!("Entries:        {}", stats.total_entries);
    println!("Approx. bytes:  {}", stats.approximate_bytes);
    if let Some(oldest) = stats.oldest_entry {
        println!("Oldest entry:   {oldest}");
    }
    if let Some(newest) = stats.newest_entry {
        println!("Newest entry:   {newest}");
    }
    if let Some(file) = &stats.most_accessed_file {
        println!("Hottest file:   {file}");
    }
}

async fn cache(args: &ArgMatches) -> Result<()> {
    let Some((name, sub)) = args.subcommand() else {
        bail!("missing cache subcommand");
    };
    let snapshot = sub
        .get_one::<PathBuf>("snapshot")
        .context("missing --snapshot")?;
    let cache = load_cache(snapshot).await?;

    let removed = match name {
        "stats" => {
            let stats = cache.statistics().await;
            if sub.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
            return Ok(());
        }
        "prune" => {
            let secs = sub.get_one::<u64>("older-than-secs").copied().unwrap_or(0);
            cache.prune_older_than(Duration::from_secs(secs)).await
        }
        "clear" => cache.clear_all().await,
        "invalidate" => {
            let patterns: Vec<&String> = sub
                .get_many::<String>("pattern")
                .context("missing pattern")?
                .collect();
            let pattern = PathPattern::new(patterns)?;
            cache.invalidate_pattern(&pattern).await
        }
        other => bail!("unknown cache subcommand {other}"),
    };

    save_cache(&cache, snapshot).await?;
    println!("Removed {removed} entries");
    Ok(())
}

fn config(args: &ArgMatches) -> Result<()> {
    let config = match args.get_one::<PathBuf>("file") {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };
    config.validate()?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("analyze", args)) => analyze(args),
        Some(("context", args)) => context(args),
        Some(("cache", args)) => cache(args).await,
        Some(("config", args)) => config(args),
        _ => Ok(()),
    }
}
