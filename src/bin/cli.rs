use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;

use crm_authz::authz::{
    ActionRestriction, FieldPermissionEngine, FieldSensitivityRegistry, RestrictionConfig, RestrictionRegistry,
};
use crm_authz::config::non_empty_path;
use crm_authz::models::rbac::{Resource, Role};

#[derive(Parser, Debug)]
#[command(author, version, about = "crm-authz rule table tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List restriction rules, optionally filtered
    Rules {
        #[arg(long)]
        role: Option<Role>,
        #[arg(long)]
        resource: Option<Resource>,
        /// JSON restriction table (defaults to RESTRICTIONS_FILE or the built-in table)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Show which configured fields of a resource a role can read
    Fields {
        resource: Resource,
        #[arg(long)]
        role: Role,
        /// JSON field sensitivity table (defaults to FIELD_SENSITIVITY_FILE or the built-in table)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Validate rule tables without starting the server
    Validate {
        #[arg(long)]
        restrictions: Option<PathBuf>,
        #[arg(long)]
        fields: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Rules { role, resource, file } => {
            let registry = restriction_registry(file)?;
            println!("{:<18} {:<15} {:<8} {:<22} {}", "Role", "Resource", "Action", "Kind", "Config");
            for rule in registry.all().iter().filter(|rule| {
                role.map_or(true, |r| rule.role == r) && resource.map_or(true, |r| rule.resource == r)
            }) {
                print_rule(rule);
            }
        }
        Commands::Fields { resource, role, file } => {
            let engine = FieldPermissionEngine::new(field_registry(file)?);
            if engine.get_resource_field_config(resource).is_none() {
                println!("{resource} has no sensitive fields; every field is readable");
                return Ok(());
            }
            println!("{:<8} {:<20} {}", "Access", "Field", "Sensitivity");
            for field in engine.get_accessible_fields(role, resource) {
                println!("{:<8} {:<20} {}", "read", field, engine.get_field_sensitivity(resource, &field));
            }
            for field in engine.get_restricted_fields(role, resource) {
                println!("{:<8} {:<20} {}", "hidden", field, engine.get_field_sensitivity(resource, &field));
            }
        }
        Commands::Validate { restrictions, fields } => {
            let registry = restriction_registry(restrictions)?;
            let field_registry = field_registry(fields)?;
            println!(
                "ok: {} restriction rules, {} resources with sensitive fields",
                registry.len(),
                field_registry.len()
            );
        }
    }

    Ok(())
}

fn restriction_registry(file: Option<PathBuf>) -> anyhow::Result<RestrictionRegistry> {
    match file.or_else(|| non_empty_path("RESTRICTIONS_FILE")) {
        Some(path) => RestrictionRegistry::load(&path)
            .with_context(|| format!("failed to load restrictions from {}", path.display())),
        None => Ok(RestrictionRegistry::builtin()),
    }
}

fn field_registry(file: Option<PathBuf>) -> anyhow::Result<FieldSensitivityRegistry> {
    match file.or_else(|| non_empty_path("FIELD_SENSITIVITY_FILE")) {
        Some(path) => FieldSensitivityRegistry::load(&path)
            .with_context(|| format!("failed to load field sensitivity from {}", path.display())),
        None => Ok(FieldSensitivityRegistry::builtin()),
    }
}

fn print_rule(rule: &ActionRestriction) {
    let detail = match &rule.config {
        RestrictionConfig::RateLimit(cfg) => format!("{} per {}s", cfg.limit, cfg.window_seconds),
        RestrictionConfig::QuotaLimit(cfg) => format!("{} per {}", cfg.limit, cfg.period),
        RestrictionConfig::FieldRestriction(cfg) => {
            format!("no writes: {}", cfg.restricted_fields.iter().cloned().collect::<Vec<_>>().join(", "))
        }
        RestrictionConfig::ConditionRestriction(cfg) => {
            format!("must be empty: {}", cfg.required_empty_fields.iter().cloned().collect::<Vec<_>>().join(", "))
        }
    };
    println!(
        "{:<18} {:<15} {:<8} {:<22} {}",
        rule.role,
        rule.resource,
        rule.action,
        rule.kind(),
        detail
    );
}
