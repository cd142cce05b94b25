use serde_json::json;

use crate::authz::{PermissionOverride, RolePermissionTable};
use crate::cli::OutputFormat;

/// Output an empty collection in the appropriate format
pub fn output_empty_collection(
    output_format: &OutputFormat,
    collection_name: &str,
    message: &str,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&json!({
                collection_name: []
            }))?);
        }
        OutputFormat::Text => {
            println!("{}", message);
        }
    }
    Ok(())
}

/// Strict override parse for command-line input.
pub fn parse_override_arg(raw: Option<&str>) -> anyhow::Result<PermissionOverride> {
    match raw {
        Some(raw) => PermissionOverride::try_parse(raw).map_err(|e| anyhow::anyhow!("--override: {}", e)),
        None => Ok(PermissionOverride::default()),
    }
}

/// Role table from `--roles-file`, or the built-in defaults.
pub fn load_role_table(path: Option<&str>) -> anyhow::Result<RolePermissionTable> {
    match path {
        Some(path) => Ok(RolePermissionTable::from_yaml_file(path)?),
        None => Ok(RolePermissionTable::defaults()),
    }
}

/// JWT secret from `--secret` or the JWT_SECRET environment variable.
pub fn resolve_secret(secret: Option<String>) -> anyhow::Result<String> {
    secret
        .or_else(|| std::env::var("JWT_SECRET").ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("No JWT secret: pass --secret or set JWT_SECRET"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_arg_is_strict() {
        assert!(parse_override_arg(None).unwrap().is_empty());
        let parsed = parse_override_arg(Some("-documents.delete")).unwrap();
        assert!(parsed.denials.contains("documents.delete"));
        assert!(parse_override_arg(Some("not a key")).is_err());
    }

    #[test]
    fn explicit_secret_wins() {
        assert_eq!(resolve_secret(Some("s3cret".to_string())).unwrap(), "s3cret");
    }
}
