use std::sync::Arc;
use std::time::Duration;

use bearing_core::{RegistrySnapshot, ServiceInstance, TokenIssuer, TokenVerifier};
use bearing_registry::{HttpRegistrySource, RegistryClient, RegistryConfig, RegistryFormat};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bearing")]
#[command(about = "Bearing gateway operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base64-encoded HMAC key shared with the gateway
    #[arg(long, global = true, env = "TOKEN_SECRET", hide_env_values = true)]
    secret: Option<String>,

    #[arg(long, global = true, env = "REGISTRY_URL", default_value = "http://localhost:8761/eureka/apps")]
    registry_url: String,

    #[arg(long, global = true, env = "REGISTRY_FORMAT", default_value = "eureka")]
    registry_format: RegistryFormat,

    #[arg(long, global = true, env = "HEARTBEAT_STALENESS_SECS", default_value_t = 90)]
    heartbeat_staleness_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Credential tooling
    Token {
        #[command(subcommand)]
        sub: TokenCommands,
    },
    /// Inspect the service registry as the gateway sees it
    Registry {
        #[command(subcommand)]
        sub: RegistryCommands,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Issue a signed credential
    Issue {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
    /// Verify a credential and show its subject
    Verify { credential: String },
}

#[derive(Subcommand)]
enum RegistryCommands {
    /// Show registry status overview
    Status,
    /// List instances for a service or all instances
    Instances {
        #[arg(long)]
        service: Option<String>,
        /// Print the instances as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Token { sub } => {
            let secret = cli
                .secret
                .as_deref()
                .ok_or("A token secret is required (--secret or TOKEN_SECRET)")?;
            match sub {
                TokenCommands::Issue { subject, ttl_secs } => {
                    let token = TokenIssuer::from_base64_secret(secret)?.issue(subject, Duration::from_secs(ttl_secs))?;
                    println!("{}", token);
                }
                TokenCommands::Verify { credential } => {
                    let verifier = TokenVerifier::from_base64_secret(secret)?;
                    match verifier.verify(credential.trim()) {
                        Ok(identity) => {
                            println!("Subject:    {}", identity.subject);
                            println!("Expires at: {}", identity.expires_at);
                        }
                        Err(e) => return Err(format!("Credential rejected: {}", e.reason()).into()),
                    }
                }
            }
        }
        Commands::Registry { sub } => {
            let config = RegistryConfig {
                heartbeat_staleness: Duration::from_secs(cli.heartbeat_staleness_secs),
                ..RegistryConfig::default()
            };
            let source = HttpRegistrySource::new(&cli.registry_url, cli.registry_format, Duration::from_secs(10))?;
            let client = RegistryClient::new(Arc::new(source), config);
            let snapshot = client.refresh_once().await?;
            let now = bearing_core::time::now();

            match sub {
                RegistryCommands::Status => {
                    let routable = snapshot.healthy_count();
                    println!("Registry Status Overview ({})", cli.registry_url);
                    println!("{}", "=".repeat(35));
                    println!("Services:  {}", snapshot.services().len());
                    println!("Instances: {}", snapshot.instances().len());
                    println!("Routable:  {}", routable);
                    println!("Excluded:  {}", snapshot.instances().len() - routable);
                }
                RegistryCommands::Instances { service, json } => {
                    let instances: Vec<&ServiceInstance> = snapshot
                        .instances()
                        .iter()
                        .filter(|i| service.as_deref().is_none_or(|s| i.service_name.eq_ignore_ascii_case(s)))
                        .collect();

                    if json {
                        println!("{}", serde_json::to_string_pretty(&instances)?);
                        return Ok(());
                    }

                    println!("Service Instances:");
                    println!(
                        "{:<20} {:<25} {:<22} {:<8} {:<10} {:<8}",
                        "Service", "ID", "Address", "Health", "Heartbeat", "Routable"
                    );
                    println!("{}", "-".repeat(96));
                    for inst in instances {
                        println!(
                            "{:<20} {:<25} {:<22} {:<8} {:<10} {:<8}",
                            inst.service_name,
                            inst.instance_id,
                            inst.address,
                            format!("{:?}", inst.health),
                            heartbeat_age(inst.last_heartbeat, now),
                            if is_routable(&snapshot, inst) { "yes" } else { "no" }
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn is_routable(snapshot: &RegistrySnapshot, instance: &ServiceInstance) -> bool {
    snapshot
        .healthy(&instance.service_name)
        .iter()
        .any(|healthy| healthy.instance_id == instance.instance_id)
}

fn heartbeat_age(last_heartbeat: Option<u64>, now_millis: u64) -> String {
    match last_heartbeat {
        Some(beat) => format!("{}s", now_millis.saturating_sub(beat) / 1000),
        None => "never".to_string(),
    }
}
