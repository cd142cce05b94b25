use clap::Subcommand;
use serde_json::json;

use crate::authz::PolicyTable;
use crate::cli::OutputFormat;

#[derive(Subcommand)]
pub enum PolicyCommands {
    #[command(about = "List every guarded action with its permission and scope")]
    List,
}

pub async fn handle(cmd: PolicyCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        PolicyCommands::List => {
            let policy = PolicyTable::global();

            match output_format {
                OutputFormat::Json => {
                    let rules: Vec<_> = policy
                        .entries()
                        .map(|(action, rule)| {
                            json!({
                                "action": action.to_string(),
                                "permission": rule.permission,
                                "scope": rule.scope,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json!({ "rules": rules }))?);
                }
                OutputFormat::Text => {
                    println!("{:<32} {:<22} {}", "ACTION", "PERMISSION", "SCOPE");
                    println!("{}", "-".repeat(66));
                    for (action, rule) in policy.entries() {
                        println!(
                            "{:<32} {:<22} {:?}",
                            action.to_string(),
                            rule.permission.unwrap_or("-"),
                            rule.scope
                        );
                    }
                }
            }
            Ok(())
        }
    }
}
