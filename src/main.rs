use blastradius::{
    audit::{AuditOperation, AuditRecord},
    config::Config,
    utils::format_duration_ms,
    BlastResult, GraphCache, ImpactAnalyzer, ImpactResult, RemovalPlan, ServiceStatus, Severity,
};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::time::{Duration, Instant};

const LIST_PREVIEW: usize = 10;

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    let default_level = if matches.get_flag("verbose") { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    if matches.get_flag("no-color") {
        colored::control::set_override(false);
    }

    let start_time = Instant::now();
    if let Err(e) = run_command(&matches).await {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(e.exit_code());
    }
    info!(
        "Finished in {}",
        format_duration_ms(start_time.elapsed().as_millis() as u64)
    );
}

fn build_cli() -> Command {
    Command::new("blastradius")
        .version(blastradius::BLASTRADIUS_VERSION)
        .about("Shows what removing a Debian package would break, before anything is removed.")
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .global(true)
            .action(ArgAction::SetTrue))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .global(true)
            .value_name("CONFIG"))
        .arg(Arg::new("json")
            .long("json")
            .global(true)
            .action(ArgAction::SetTrue)
            .help("Print results as JSON"))
        .arg(Arg::new("audit")
            .long("audit")
            .global(true)
            .action(ArgAction::SetTrue)
            .help("Write an audit record as a JSON line to stderr"))
        .arg(Arg::new("no-color")
            .long("no-color")
            .global(true)
            .action(ArgAction::SetTrue))
        .subcommand_required(true)
        .subcommand(Command::new("analyze")
            .about("Analyze the impact of removing a package")
            .alias("a")
            .arg(Arg::new("package")
                .required(true)
                .help("Package name")))
        .subcommand(Command::new("plan")
            .about("Show the commands that would remove a package (nothing is executed)")
            .alias("p")
            .arg(Arg::new("package")
                .required(true)
                .help("Package name"))
            .arg(Arg::new("purge")
                .long("purge")
                .action(ArgAction::SetTrue)
                .help("Also remove configuration files")))
        .subcommand(Command::new("cache")
            .about("Dependency graph cache commands")
            .subcommand_required(true)
            .subcommand(Command::new("refresh")
                .about("Rebuild the dependency graph now"))
            .subcommand(Command::new("clear")
                .about("Delete the cached dependency graph"))
            .subcommand(Command::new("status")
                .about("Show cache age and size")))
}

async fn run_command(matches: &ArgMatches) -> BlastResult<()> {
    let config = load_config(matches)?;
    let json = matches.get_flag("json");
    let audit = matches.get_flag("audit");

    match matches.subcommand() {
        Some(("analyze", sub_matches)) => {
            let package = required(sub_matches, "package");
            let analyzer = ImpactAnalyzer::new(&config)?;
            let started = Instant::now();

            let pb = spinner(!json, &format!("Analyzing {}...", package));
            let outcome = analyzer.analyze(package).await;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    if audit {
                        let elapsed = started.elapsed().as_millis() as u64;
                        emit_audit(&AuditRecord::from_error(AuditOperation::Analyze, package, &e, elapsed))?;
                    }
                    return Err(e);
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
            if audit {
                emit_audit(&AuditRecord::from_result(&result))?;
            }
        }

        Some(("plan", sub_matches)) => {
            let package = required(sub_matches, "package");
            let purge = sub_matches.get_flag("purge");
            let analyzer = ImpactAnalyzer::new(&config)?;
            let started = Instant::now();

            let pb = spinner(!json, &format!("Planning removal of {}...", package));
            let outcome = match analyzer.analyze(package).await {
                Ok(result) => Ok(analyzer.removal_plan(&result, purge).await),
                Err(e) => Err(e),
            };
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            let elapsed = started.elapsed().as_millis() as u64;

            let plan = match outcome {
                Ok(plan) => plan,
                Err(e) => {
                    if audit {
                        emit_audit(&AuditRecord::from_error(AuditOperation::Plan, package, &e, elapsed))?;
                    }
                    return Err(e);
                }
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
            if audit {
                emit_audit(&AuditRecord::from_plan(&plan, elapsed))?;
            }
        }

        Some(("cache", sub_matches)) => match sub_matches.subcommand() {
            Some(("refresh", _)) => {
                let analyzer = ImpactAnalyzer::new(&config)?;
                let pb = spinner(!json, "Building dependency graph...");
                let graph = analyzer.graph_builder().rebuild().await;
                if let Some(pb) = pb {
                    pb.finish_and_clear();
                }
                let graph = graph?;
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "installed": graph.installed_count(),
                            "edges": graph.edges().len(),
                            "built_at": graph.built_at(),
                        })
                    );
                } else {
                    println!(
                        "{} {} packages, {} dependency edges",
                        "✅ Dependency graph rebuilt:".green(),
                        graph.installed_count(),
                        graph.edges().len()
                    );
                }
            }
            Some(("clear", _)) => {
                let analyzer = ImpactAnalyzer::new(&config)?;
                let builder = analyzer.graph_builder();
                let removed = builder.clear_cache().await?;
                if json {
                    println!("{}", serde_json::json!({ "removed": removed }));
                } else if removed {
                    println!("{}", "✅ Graph cache cleared".green());
                } else {
                    println!("No graph cache at {}", builder.cache().path().display());
                }
            }
            Some(("status", _)) => print_cache_status(&GraphCache::from_config(&config), json)?,
            _ => println!("❌ Invalid cache command. Use 'blastradius cache --help' for usage information."),
        },

        _ => {
            println!("❌ Invalid command. Use --help for usage information.");
        }
    }

    Ok(())
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

fn spinner(enabled: bool, message: &str) -> Option<ProgressBar> {
    if !enabled {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

fn emit_audit(record: &AuditRecord) -> BlastResult<()> {
    eprintln!("{}", record.to_json_line()?);
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    let label = severity.as_str().to_uppercase();
    match severity {
        Severity::Critical => label.red().bold(),
        Severity::High => label.red(),
        Severity::Medium => label.yellow(),
        Severity::Low => label.blue(),
        Severity::Safe => label.green(),
    }
}

fn preview(items: &[String]) -> String {
    if items.len() <= LIST_PREVIEW {
        items.join(", ")
    } else {
        format!(
            "{} ... and {} more",
            items[..LIST_PREVIEW].join(", "),
            items.len() - LIST_PREVIEW
        )
    }
}

fn print_result(result: &ImpactResult) {
    match &result.version {
        Some(version) => println!("Impact analysis for {} {}", result.target_package.bold(), version),
        None => println!("Impact analysis for {}", result.target_package.bold()),
    }
    println!(
        "Severity: {} ({})",
        severity_label(result.severity),
        result.severity_rule
    );
    if !result.installed {
        println!("Installed: {}", "no".yellow());
    }
    if result.essential {
        println!("Essential: {}", "yes".red().bold());
    }

    if !result.direct_dependents.is_empty() {
        println!(
            "Direct dependents ({}): {}",
            result.direct_dependents.len(),
            preview(&result.direct_dependents)
        );
    }
    if !result.transitive_dependents.is_empty() {
        println!(
            "Transitive dependents: {} (depth {})",
            result.transitive_dependents.len(),
            result.cascade_depth
        );
    }
    if !result.cascade_packages.is_empty() {
        println!(
            "Cascade removal ({}): {}",
            result.cascade_packages.len(),
            preview(&result.cascade_packages)
        );
    }
    if !result.orphaned_packages.is_empty() {
        println!(
            "Orphaned packages ({}{}): {}",
            result.orphaned_packages.len(),
            if result.orphans_approximate { ", estimated" } else { "" },
            preview(&result.orphaned_packages)
        );
    }
    println!("Total affected: {}", result.total_affected);

    if !result.affected_services.is_empty() {
        println!("Affected services:");
        for service in &result.affected_services {
            let status = match service.status {
                ServiceStatus::Running => service.status.to_string().green(),
                ServiceStatus::Stopped => service.status.to_string().normal(),
                _ => service.status.to_string().yellow(),
            };
            let critical = if service.is_critical { " (critical)".red().to_string() } else { String::new() };
            println!("  {} [{}]{}", service.name, status, critical);
        }
    }
    let cascade_running: Vec<String> = result
        .cascade_services
        .iter()
        .filter(|service| service.is_running())
        .map(|service| format!("{} ({})", service.name, service.package))
        .collect();
    if !cascade_running.is_empty() {
        println!("Services of cascade packages: {}", cascade_running.join(", "));
    }

    if !result.warnings.is_empty() {
        println!();
        for warning in &result.warnings {
            println!("{} {}", "⚠".yellow(), warning);
        }
    }
    if !result.recommendations.is_empty() {
        println!();
        for recommendation in &result.recommendations {
            println!("→ {}", recommendation);
        }
    }

    println!();
    if result.safe_to_remove {
        println!("{}", "✅ Safe to remove".green().bold());
    } else {
        println!("{}", "❌ Not safe to remove. Review recommendations above.".red().bold());
    }
}

fn print_plan(plan: &RemovalPlan) {
    println!(
        "Removal plan for {}{} (severity {})",
        plan.target_package.bold(),
        if plan.purge { " with purge" } else { "" },
        severity_label(plan.severity)
    );
    if !plan.packages_to_remove.is_empty() {
        println!("Packages to remove: {}", preview(&plan.packages_to_remove));
    }
    if !plan.autoremove_candidates.is_empty() {
        println!("Autoremove candidates: {}", preview(&plan.autoremove_candidates));
    }
    if !plan.config_files_affected.is_empty() {
        println!("Config files removed:");
        for file in &plan.config_files_affected {
            println!("  {}", file);
        }
    }
    println!("Estimated freed space: {}", plan.estimated_freed_space);
    println!();
    println!("Commands (not executed):");
    for (idx, command) in plan.commands.iter().enumerate() {
        println!("  {}. {}", idx + 1, command.cyan());
    }
    if !plan.warnings.is_empty() {
        println!();
        for warning in &plan.warnings {
            println!("{} {}", "⚠".yellow(), warning);
        }
    }
    if plan.is_degraded() {
        println!();
        println!(
            "{}",
            "❌ Parts of the analysis failed; the package lists above may be incomplete.".red()
        );
    } else if !plan.safe_to_remove {
        println!();
        println!("{}", "❌ Analysis flagged this removal. Review it before running the commands.".red());
    }
}

fn print_cache_status(cache: &GraphCache, json: bool) -> BlastResult<()> {
    let snapshot = match cache.read() {
        Ok(snapshot) => Some(snapshot),
        Err(blastradius::BlastError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            if !json {
                println!("{} {}", "⚠".yellow(), e);
            }
            None
        }
    };

    let Some(snapshot) = snapshot else {
        if json {
            println!("{}", serde_json::json!({ "path": cache.path(), "present": false }));
        } else {
            println!("No usable graph cache at {}", cache.path().display());
        }
        return Ok(());
    };

    let fresh = snapshot.is_fresh(cache.max_age(), Utc::now());
    let age_ms = Utc::now()
        .signed_duration_since(snapshot.built_at)
        .num_milliseconds()
        .max(0) as u64;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "path": cache.path(),
                "present": true,
                "fresh": fresh,
                "built_at": snapshot.built_at,
                "installed": snapshot.installed.len(),
                "edges": snapshot.edges.len(),
            })
        );
    } else {
        println!("Cache: {}", cache.path().display());
        println!(
            "Built: {} ({} ago, {})",
            snapshot.built_at.format("%Y-%m-%d %H:%M:%S UTC"),
            format_duration_ms(age_ms),
            if fresh { "fresh".green() } else { "stale".yellow() }
        );
        println!(
            "Packages: {}, dependency edges: {}",
            snapshot.installed.len(),
            snapshot.edges.len()
        );
    }
    Ok(())
}

fn load_config(matches: &ArgMatches) -> BlastResult<Config> {
    if let Some(config_path) = matches.get_one::<String>("config") {
        Config::load(Some(config_path))
    } else {
        Config::load(None)
    }
}
