mod cli;
mod prompts;

use anyhow::{Context, Result};
use clap::Parser;
use colored::{ColoredString, Colorize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use capgraph_core::context::type_from_file_name;
use capgraph_core::export::{export_json, export_overview, render_overview};
use capgraph_core::{
    detect_type, load_context, parse, Approval, CapabilityDraft, CapabilityUpdate, ChangeKind,
    ChangeNotifier, Dependency, DocumentType, EnablerDraft, EnablerUpdate, GraphSnapshot, IdPrefix,
    PollingWatcher, Priority, RequirementDraft, SpecStore, SyncReport,
};

use crate::cli::{CapabilityCommand, Cli, Command, EnablerCommand};

/// Log filter, e.g. `CAPGRAPH_LOG=capgraph_core=debug`
const LOG_ENV_VAR: &str = "CAPGRAPH_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let ctx = load_context(cli.config.as_deref())?;
    debug!(roots = ?ctx.roots, templates = ?ctx.templates_path, "Loaded store context");
    let store = SpecStore::new(ctx);

    match &cli.command {
        Command::List {
            capabilities,
            enablers,
            status,
        } => {
            list_documents(&store, !*enablers, !*capabilities, status.as_deref());
        }
        Command::Show { id, raw } => {
            show_document(&store, id, *raw)?;
        }
        Command::Parse { file, r#type } => {
            parse_file(file, r#type.as_deref())?;
        }
        Command::Allocate { prefix } => {
            let prefix: IdPrefix = prefix.parse().context("Use CAP, ENB, FR or NFR")?;
            println!("{}", store.allocate_id(prefix));
        }
        Command::Cap(cap_cmd) => {
            handle_capability_command(cap_cmd, &store)?;
        }
        Command::Enb(enb_cmd) => {
            handle_enabler_command(enb_cmd, &store)?;
        }
        Command::Check => {
            check_integrity(&store);
        }
        Command::Repair => {
            let report = store.repair()?;
            print_sync_report(&report);
            check_integrity(&store);
        }
        Command::Export { format, output } => {
            handle_export_command(&store, format, output.as_deref())?;
        }
        Command::Watch { interval } => {
            watch_documents(&store, Duration::from_secs((*interval).max(1)));
        }
    }

    Ok(())
}

fn status_colored(status: &str) -> ColoredString {
    match status.to_lowercase().as_str() {
        "implemented" | "ready" | "done" => status.green(),
        "in progress" | "in development" => status.cyan(),
        "" => "-".dimmed(),
        _ => status.yellow(),
    }
}

fn approval_colored(approval: &str) -> ColoredString {
    match approval.to_lowercase().as_str() {
        "approved" => approval.green(),
        "pending" => approval.yellow(),
        _ => approval.red(),
    }
}

fn list_documents(store: &SpecStore, capabilities: bool, enablers: bool, status: Option<&str>) {
    let matches_status = |s: &str| status.map_or(true, |want| s.eq_ignore_ascii_case(want));

    if capabilities {
        let caps: Vec<_> = store
            .list_capabilities()
            .into_iter()
            .filter(|c| matches_status(&c.status))
            .collect();
        if caps.is_empty() {
            println!("{}", "No capabilities found.".yellow());
        } else {
            println!(
                "{:<12} | {:<40} | {:<15} | {:<12} | {:<8} | {}",
                "ID", "Name", "Status", "Approval", "Priority", "Enablers"
            );
            println!("{}", "-".repeat(110));
            for cap in caps {
                println!(
                    "{:<12} | {:<40} | {:<15} | {:<12} | {:<8} | {}",
                    cap.id.blue(),
                    cap.name,
                    status_colored(&cap.status),
                    approval_colored(&cap.approval),
                    cap.priority,
                    cap.enablers.len()
                );
            }
        }
    }

    if capabilities && enablers {
        println!();
    }

    if enablers {
        let enbs: Vec<_> = store
            .list_enablers()
            .into_iter()
            .filter(|e| matches_status(&e.status))
            .collect();
        if enbs.is_empty() {
            println!("{}", "No enablers found.".yellow());
        } else {
            println!(
                "{:<12} | {:<40} | {:<15} | {:<12} | {:<8} | {}",
                "ID", "Name", "Status", "Approval", "Priority", "Capability"
            );
            println!("{}", "-".repeat(110));
            for enb in enbs {
                println!(
                    "{:<12} | {:<40} | {:<15} | {:<12} | {:<8} | {}",
                    enb.id.blue(),
                    enb.name,
                    status_colored(&enb.status),
                    approval_colored(&enb.approval),
                    enb.priority,
                    enb.capability_id.as_deref().unwrap_or("-")
                );
            }
        }
    }
}

fn show_document(store: &SpecStore, id: &str, raw: bool) -> Result<()> {
    if raw {
        let document = store.document(id)?;
        println!("{}: {}", "Path".blue(), document.path.display());
        println!("{}: {}", "Version".blue(), document.version.short());
        println!();
        print!("{}", document.content);
    } else {
        print!("{}", store.render(id)?);
    }
    Ok(())
}

fn parse_file(file: &Path, doc_type: Option<&str>) -> Result<()> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let doc_type = match doc_type {
        Some(t) => t.parse::<DocumentType>().context("Use capability or enabler")?,
        None => type_from_file_name(file)
            .or_else(|| detect_type(&text))
            .context("Cannot tell whether this is a capability or an enabler; pass --type")?,
    };

    let parsed = parse(&text, doc_type);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

/// Parses `CAP-1:why,CAP-2` into dependencies; an empty string clears
fn parse_dependencies(value: &str) -> Vec<Dependency> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((id, description)) => Dependency::new(id.trim(), description.trim()),
            None => Dependency::new(entry, ""),
        })
        .collect()
}

fn print_sync_report(report: &SyncReport) {
    for path in &report.updated {
        println!("  {} {}", "updated".green(), path.display());
    }
    for skipped in &report.skipped {
        println!(
            "  {} {}: {}",
            "skipped".yellow(),
            skipped.target,
            skipped.reason
        );
    }
}

/// Rewrites a user-typed approval or priority into its stored spelling
fn canonical<T>(value: &Option<String>) -> Result<Option<String>>
where
    T: FromStr + fmt::Display,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .as_deref()
        .map(|v| -> Result<String> { Ok(v.parse::<T>()?.to_string()) })
        .transpose()
}

fn handle_capability_command(cmd: &CapabilityCommand, store: &SpecStore) -> Result<()> {
    match cmd {
        CapabilityCommand::Add {
            name,
            description,
            status,
            approval,
            priority,
            owner,
            system,
            component,
            interactive,
        } => {
            let draft = match name {
                Some(name) if !*interactive => CapabilityDraft {
                    name: name.clone(),
                    description: description.clone(),
                    status: status.clone(),
                    approval: canonical::<Approval>(approval)?,
                    priority: canonical::<Priority>(priority)?,
                    owner: owner.clone(),
                    system: system.clone(),
                    component: component.clone(),
                },
                // Default to interactive mode if no name is provided
                _ => crate::prompts::prompt_new_capability()?,
            };

            let cap = store.create_capability(&draft)?;
            println!("{}", "Capability added successfully!".green());
            println!("ID: {}", cap.id.green());
        }
        CapabilityCommand::Edit {
            id,
            name,
            status,
            approval,
            priority,
            owner,
            system,
            component,
            upstream,
            downstream,
        } => {
            let update = CapabilityUpdate {
                name: name.clone(),
                status: status.clone(),
                approval: canonical::<Approval>(approval)?,
                priority: canonical::<Priority>(priority)?,
                owner: owner.clone(),
                system: system.clone(),
                component: component.clone(),
                upstream: upstream.as_deref().map(parse_dependencies),
                downstream: downstream.as_deref().map(parse_dependencies),
                expected_version: None,
            };
            let cap = store.update_capability(id, &update)?;
            println!("{} {}", "Updated".green(), cap.id);
        }
        CapabilityCommand::Copy { id, name } => {
            let report = store.copy_capability_with_enablers(id, name)?;
            println!(
                "{} {} -> {}",
                "Copied".green(),
                id,
                report.capability.id.green()
            );
            for enb in &report.enablers {
                println!("  {} {}", enb.id, enb.name);
            }
            for skipped in &report.skipped {
                println!(
                    "  {} {}: {}",
                    "skipped".yellow(),
                    skipped.target,
                    skipped.reason
                );
            }
        }
        CapabilityCommand::Del { id, yes } => {
            let cap = store.get_capability(id)?;
            if !*yes && !crate::prompts::confirm_delete(&cap.id, &cap.name)? {
                println!("{}", "Cancelled.".yellow());
                return Ok(());
            }
            let report = store.delete_capability(id)?;
            println!("{} {}", "Deleted".green(), id);
            print_sync_report(&report);
        }
    }
    Ok(())
}

fn handle_enabler_command(cmd: &EnablerCommand, store: &SpecStore) -> Result<()> {
    match cmd {
        EnablerCommand::Add {
            name,
            capability,
            description,
            status,
            approval,
            priority,
            owner,
            interactive,
        } => {
            let (draft, parent) = match name {
                Some(name) if !*interactive => (
                    EnablerDraft {
                        name: name.clone(),
                        description: description.clone(),
                        status: status.clone(),
                        approval: canonical::<Approval>(approval)?,
                        priority: canonical::<Priority>(priority)?,
                        owner: owner.clone(),
                    },
                    capability.clone(),
                ),
                _ => crate::prompts::prompt_new_enabler(&store.list_capabilities())?,
            };

            let enb = store.create_enabler(&draft, parent.as_deref())?;
            println!("{}", "Enabler added successfully!".green());
            println!("ID: {}", enb.id.green());
            if let Some(parent) = &enb.capability_id {
                println!("Capability: {}", parent);
            }
        }
        EnablerCommand::Edit {
            id,
            name,
            description,
            status,
            approval,
            priority,
        } => {
            let update = EnablerUpdate {
                name: name.clone(),
                description: description.clone(),
                status: status.clone(),
                approval: canonical::<Approval>(approval)?,
                priority: canonical::<Priority>(priority)?,
                ..Default::default()
            };
            let enb = store.update_enabler(id, &update)?;
            println!("{} {}", "Updated".green(), enb.id);
        }
        EnablerCommand::Move {
            id,
            capability,
            detach,
        } => {
            if capability.is_none() && !*detach {
                anyhow::bail!("Pass --capability <CAP-ID> or --detach");
            }
            let update = EnablerUpdate {
                capability_id: Some(capability.clone()),
                ..Default::default()
            };
            let enb = store.update_enabler(id, &update)?;
            match &enb.capability_id {
                Some(parent) => println!("{} {} -> {}", "Moved".green(), enb.id, parent),
                None => println!("{} {}", "Detached".green(), enb.id),
            }
        }
        EnablerCommand::Req {
            id,
            name,
            text,
            r#type,
            priority,
        } => {
            let draft = RequirementDraft {
                name: name.clone(),
                requirement: text.clone(),
                priority: canonical::<Priority>(priority)?,
                req_type: r#type.clone(),
                ..Default::default()
            };
            let req = store.add_requirement(id, &draft)?;
            println!("{} {} to {}", "Added".green(), req.id.green(), id);
        }
        EnablerCommand::Del { id, yes } => {
            let enb = store.get_enabler(id)?;
            if !*yes && !crate::prompts::confirm_delete(&enb.id, &enb.name)? {
                println!("{}", "Cancelled.".yellow());
                return Ok(());
            }
            let report = store.delete_enabler(id)?;
            println!("{} {}", "Deleted".green(), id);
            print_sync_report(&report);
        }
    }
    Ok(())
}

fn check_integrity(store: &SpecStore) {
    let report = store.check_integrity();
    println!(
        "{} capabilities, {} enablers",
        report.capabilities, report.enablers
    );
    if report.is_clean() {
        println!("{}", "No issues found.".green());
        return;
    }
    for issue in &report.issues {
        println!("  {} {}", "!".red(), issue);
    }
    let summary = format!(
        "{} issue(s); `capgraph repair` fixes missing rows and mirrors",
        report.issues.len()
    );
    println!("{}", summary.yellow());
}

fn handle_export_command(store: &SpecStore, format: &str, output: Option<&Path>) -> Result<()> {
    let snapshot = GraphSnapshot::from_context(store.context());

    match format.to_lowercase().as_str() {
        "json" => match output {
            Some(path) => {
                export_json(&snapshot, path)?;
                println!("{} {}", "Exported to".green(), path.display());
            }
            None => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        },
        "overview" | "markdown" | "md" => match output {
            Some(path) => {
                export_overview(&snapshot, path)?;
                println!("{} {}", "Exported to".green(), path.display());
            }
            None => print!("{}", render_overview(&snapshot)),
        },
        other => anyhow::bail!("Unknown export format '{}' (use json or overview)", other),
    }
    Ok(())
}

fn watch_documents(store: &SpecStore, interval: Duration) {
    let mut watcher = PollingWatcher::new(store.context().clone(), ChangeNotifier::new());
    let roots: Vec<String> = store
        .context()
        .roots
        .iter()
        .map(|r: &PathBuf| r.display().to_string())
        .collect();
    println!("Watching {} (Ctrl-C to stop)", roots.join(", "));

    loop {
        for change in watcher.poll() {
            let kind = match change.kind {
                ChangeKind::Created => "created".green(),
                ChangeKind::Modified => "modified".yellow(),
                ChangeKind::Deleted => "deleted".red(),
            };
            println!("{:>8} {}", kind, change.path.display());
        }
        thread::sleep(interval);
    }
}
