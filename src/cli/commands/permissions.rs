use clap::Subcommand;
use serde_json::json;

use crate::authz::Role;
use crate::cli::utils::*;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum PermissionsCommands {
    #[command(about = "Check whether a role holds a permission key")]
    Check {
        #[arg(help = "Role name")]
        role: String,
        #[arg(help = "Permission key, e.g. expenses.approve")]
        key: String,
        #[arg(long = "override", help = "Override as a JSON array or comma list; prefix '-' to deny")]
        overrides: Option<String>,
        #[arg(long, help = "YAML role permission table to use instead of the defaults")]
        roles_file: Option<String>,
    },

    #[command(about = "List the effective permissions of a role")]
    List {
        #[arg(help = "Role name")]
        role: String,
        #[arg(long = "override", help = "Override as a JSON array or comma list; prefix '-' to deny")]
        overrides: Option<String>,
        #[arg(long, help = "YAML role permission table to use instead of the defaults")]
        roles_file: Option<String>,
    },
}

pub async fn handle(cmd: PermissionsCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PermissionsCommands::Check { role, key, overrides, roles_file } => {
            let table = load_role_table(roles_file.as_deref())?;
            let overrides = parse_override_arg(overrides.as_deref())?;
            let role = Role::parse(&role);
            let allowed = table.allows(&role, &key, &overrides);

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({
                        "role": role,
                        "key": key,
                        "allowed": allowed,
                    }))?);
                }
                OutputFormat::Text => {
                    let verdict = if allowed { "allowed" } else { "denied" };
                    println!("{} {} {}", role, verdict, key);
                }
            }

            if !allowed {
                std::process::exit(2);
            }
            Ok(())
        }
        PermissionsCommands::List { role, overrides, roles_file } => {
            let table = load_role_table(roles_file.as_deref())?;
            let overrides = parse_override_arg(overrides.as_deref())?;
            let role = Role::parse(&role);
            let effective: Vec<String> = table.effective_permissions(&role, &overrides).into_iter().collect();

            if effective.is_empty() {
                return output_empty_collection(&output_format, "permissions", &format!("{} has no permissions", role));
            }

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({
                        "role": role,
                        "permissions": effective,
                    }))?);
                }
                OutputFormat::Text => {
                    for key in effective {
                        let marker = if overrides.grants.contains(&key) { "+" } else { " " };
                        println!("{}{}", marker, key);
                    }
                }
            }
            Ok(())
        }
    }
}
