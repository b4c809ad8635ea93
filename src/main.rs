use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use serde_json::json;
use tutelary::{
    authz::{Policy, Subject},
    bootstrap,
    config::TutelaryConfig,
    observability,
};

/// CLI arguments for tutelary
#[derive(Parser, Debug)]
#[command(version, about = "Path-scoped access control policies", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Decide whether a subject may perform an action on an object path
    ///
    /// Exits with status 0 when allowed and 1 when denied.
    Check {
        /// User id, or `default` / `anonymous`
        subject: String,
        /// Dotted action name, e.g. `project.update`
        action: String,
        /// Object path, e.g. `organization/acme/project/p1`
        path: String,
    },
    /// Parse policy files and report errors
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List the policies a subject resolves to, in evaluation order
    PoliciesFor { subject: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match TutelaryConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config from {}: {}", path.display(), e);
                return ExitCode::from(2);
            }
        },
        None => TutelaryConfig::default(),
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("{e}");
        return ExitCode::from(2);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        eprintln!("{e}");
        return ExitCode::from(2);
    }

    match args.command {
        Command::Check {
            subject,
            action,
            path,
        } => run_check(&config, &subject, &action, &path, args.json),
        Command::Validate { files } => run_validate(&files, args.json),
        Command::PoliciesFor { subject } => run_policies_for(&config, &subject, args.json),
    }
}

fn run_check(config: &TutelaryConfig, subject: &str, action: &str, path: &str, as_json: bool) -> ExitCode {
    let service = match bootstrap::build_service(config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Failed to load policies: {e}");
            return ExitCode::from(2);
        }
    };

    let result = service.authorize(&Subject::from(subject), action, path);
    if as_json {
        println!("{}", json!(result));
    } else {
        let verdict = if result.allowed { "ALLOW" } else { "DENY" };
        match &result.policy_name {
            Some(policy) => println!("{verdict} ({}, policy '{policy}')", result.decision.as_str()),
            None => println!("{verdict} (no policy matched)"),
        }
        for (name, value) in &result.bindings {
            println!("  {name} = {value}");
        }
    }

    if result.allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_validate(files: &[PathBuf], as_json: bool) -> ExitCode {
    let mut failed = false;
    let mut report = Vec::with_capacity(files.len());

    for file in files {
        match Policy::from_file(file) {
            Ok(policy) => {
                report.push(json!({
                    "file": file.display().to_string(),
                    "policy": policy.name(),
                    "clauses": policy.clauses().len(),
                }));
                if !as_json {
                    println!(
                        "ok      {} ({}, {} clauses)",
                        file.display(),
                        policy.name(),
                        policy.clauses().len()
                    );
                }
            }
            Err(e) => {
                failed = true;
                report.push(json!({
                    "file": file.display().to_string(),
                    "error": e.to_string(),
                }));
                if !as_json {
                    println!("invalid {}: {}", file.display(), e);
                }
            }
        }
    }

    if as_json {
        println!("{}", json!(report));
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run_policies_for(config: &TutelaryConfig, subject: &str, as_json: bool) -> ExitCode {
    let registry = match bootstrap::build_registry(&config.authz) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Failed to load policies: {e}");
            return ExitCode::from(2);
        }
    };

    let resolved = registry.policies_for(&Subject::from(subject));
    if as_json {
        let entries: Vec<_> = resolved
            .iter()
            .map(|p| {
                json!({
                    "policy": p.name(),
                    "via_role": p.via_role,
                    "variables": p.variables,
                })
            })
            .collect();
        println!("{}", json!(entries));
    } else {
        for instance in resolved.iter() {
            let via = instance
                .via_role
                .as_deref()
                .map(|role| format!(" (role {role})"))
                .unwrap_or_default();
            if instance.variables.is_empty() {
                println!("{}{via}", instance.name());
            } else {
                println!("{}{via} {:?}", instance.name(), instance.variables);
            }
        }
    }
    ExitCode::SUCCESS
}
