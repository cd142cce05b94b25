use chrono::{DateTime, Duration};
use clap::Subcommand;
use serde_json::json;

use crate::auth::{decode_jwt, generate_jwt, hours_ttl, Claims};
use crate::authz::Role;
use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::config::config;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Sign a bearer token for a user")]
    Issue {
        #[arg(help = "User id (token subject)")]
        sub: String,
        #[arg(long, help = "User email")]
        email: String,
        #[arg(long, help = "Role name, e.g. CREW or SUPER_ADMIN")]
        role: String,
        #[arg(long, help = "Tenant the user belongs to")]
        tenant: Option<String>,
        #[arg(long, help = "Lifetime in hours (defaults to the configured expiry)")]
        ttl_hours: Option<i64>,
        #[arg(long, help = "Platform admin id to record as impersonator")]
        imp: Option<String>,
        #[arg(long, help = "Signing secret (defaults to JWT_SECRET)")]
        secret: Option<String>,
    },

    #[command(about = "Verify a bearer token and print its claims")]
    Inspect {
        #[arg(help = "Encoded token")]
        token: String,
        #[arg(long, help = "Verification secret (defaults to JWT_SECRET)")]
        secret: Option<String>,
    },
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Issue { sub, email, role, tenant, ttl_hours, imp, secret } => {
            let role = Role::parse(&role);
            if let Role::Unknown(name) = &role {
                return Err(anyhow::anyhow!("Unknown role '{}'", name));
            }
            if !role.is_platform_admin() && tenant.is_none() {
                tracing::warn!("Issuing a {} token without a tenant; every tenant route will refuse it", role);
            }

            let secret = resolve_secret(secret)?;
            let ttl = match ttl_hours {
                Some(hours) => Duration::try_hours(hours)
                    .ok_or_else(|| anyhow::anyhow!("--ttl-hours {} is out of range", hours))?,
                None => hours_ttl(config().security.jwt_expiry_hours),
            };
            let mut claims = Claims::with_ttl(&sub, &email, &role, tenant, ttl);
            if let Some(admin) = imp {
                claims = claims.impersonated_by(admin);
            }
            let token = generate_jwt(&claims, &secret)?;

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&json!({
                        "token": token,
                        "claims": claims,
                    }))?);
                }
                OutputFormat::Text => println!("{}", token),
            }
            Ok(())
        }
        TokenCommands::Inspect { token, secret } => {
            let secret = resolve_secret(secret)?;
            let claims = decode_jwt(token.trim(), &secret)?;

            match output_format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&claims)?);
                }
                OutputFormat::Text => {
                    println!("Subject:     {}", claims.sub);
                    println!("Email:       {}", claims.email);
                    println!("Role:        {}", claims.role);
                    println!("Tenant:      {}", claims.tenant_id.as_deref().unwrap_or("-"));
                    if let Some(imp) = &claims.imp {
                        println!("Impersonator: {}", imp);
                    }
                    if let Some(expires) = DateTime::from_timestamp(claims.exp, 0) {
                        println!("Expires:     {}", expires.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                }
            }
            Ok(())
        }
    }
}
