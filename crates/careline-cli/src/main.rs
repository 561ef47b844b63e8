mod config;

use anyhow::Context;
use careline_agents::catalog::lab;
use careline_agents::{build_agent, demo_referral, Fixtures, LocalCluster};
use careline_core::AgentKind;
use careline_gateway::{GatewayServer, HttpResolver};
use careline_orchestrator::{AgentCard, OrchestrationOutcome, UpdateBatch};
use clap::{Parser, Subcommand};
use config::CarelineConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "careline", about = "CareLine referral agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "careline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve agents over HTTP
    Serve {
        /// Agent to serve; all agents when omitted
        #[arg(short, long)]
        agent: Option<AgentKind>,
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides config, single agent only)
        #[arg(short, long, requires = "agent")]
        port: Option<u16>,
    },
    /// Print every agent's card
    Agents,
    /// Run a referral and a records update through in-process agents
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let mut config = CarelineConfig::load(&cli.config)?;
    config.apply_env(|key| std::env::var(key).ok())?;

    match cli.command {
        Commands::Serve { agent, host, port } => {
            let host = host.unwrap_or_else(|| config.network.host.clone());
            let kinds = match agent {
                Some(kind) => vec![kind],
                None => AgentKind::ALL.to_vec(),
            };
            serve(&config, &kinds, &host, port).await?;
        }
        Commands::Agents => {
            let cards = cards(&config)?;
            println!("{}", serde_json::to_string_pretty(&cards)?);
        }
        Commands::Demo => demo(&config).await?,
    }

    Ok(())
}

fn cards(config: &CarelineConfig) -> anyhow::Result<Vec<AgentCard>> {
    let cluster = LocalCluster::start(Fixtures::demo(), config.monitoring())?;
    Ok(cluster.cards(|kind| config.agent_url(kind)))
}

async fn serve(
    config: &CarelineConfig,
    kinds: &[AgentKind],
    host: &str,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let resolver = HttpResolver::new(config.request_timeout(), |kind| config.agent_url(kind))?;
    let fixtures = Fixtures::demo();
    let directory = cards(config)?;

    let mut servers = Vec::with_capacity(kinds.len());
    for &kind in kinds {
        let agent = build_agent(kind, &resolver, &fixtures, config.monitoring());
        let app = GatewayServer::build_with_directory(
            agent.host,
            config.agent_url(kind),
            directory.clone(),
        );
        let addr = format!("{host}:{}", port.unwrap_or_else(|| config.ports.port(kind)));
        info!(agent = %kind, addr = %addr, "Starting agent");
        servers.push(async move {
            GatewayServer::serve(app, &addr)
                .await
                .with_context(|| format!("{kind} agent on {addr} stopped"))
        });
    }

    futures_util::future::try_join_all(servers).await?;
    Ok(())
}

async fn demo(config: &CarelineConfig) -> anyhow::Result<()> {
    let cluster = LocalCluster::start(Fixtures::demo(), config.monitoring())?;
    let referral = demo_referral();

    println!(
        "Referral {} for {}: {} ({:?})",
        referral.id, referral.patient_id, referral.specialty, referral.urgency
    );
    let outcome: OrchestrationOutcome = cluster
        .submit_referral(referral.clone())
        .await?
        .decode()
        .context("referral orchestration failed")?;

    let card = &outcome.decision_card;
    println!("\nDecision card ({}):", outcome.message);
    for provider in &card.providers {
        let next_slot = card
            .availability
            .iter()
            .find(|s| s.provider_id == provider.id)
            .map_or_else(|| "none".to_string(), |s| s.slot.to_rfc3339());
        let cost = card
            .cost_estimates
            .iter()
            .find(|c| c.provider_id == provider.id)
            .map_or_else(
                || "unknown".to_string(),
                |c| format!("${:.0}-${:.0}", c.estimate_low, c.estimate_high),
            );
        println!(
            "  {} ({}) {:.1} km, next slot {next_slot}, cost {cost}",
            provider.name,
            provider.practice,
            provider.distance_km.unwrap_or_default()
        );
    }
    if let Some(explainer) = &card.patient_explainer {
        println!("\n{}", explainer.summary);
    }

    let fixtures = cluster.fixtures();
    let baseline: UpdateBatch = cluster
        .records_updated(&referral.patient_id, None)
        .await?
        .decode()?;
    println!(
        "\nBaseline summary: {} referral(s), {} significant",
        baseline.referrals_processed, baseline.significant_changes
    );

    fixtures.records.add_lab(
        &referral.patient_id,
        lab("Potassium", "6.4", "mmol/L", "critical", "2024-02-01"),
    )?;
    let update: UpdateBatch = cluster
        .records_updated(&referral.patient_id, None)
        .await?
        .decode()?;
    println!(
        "After critical potassium: {} referral(s), {} significant",
        update.referrals_processed, update.significant_changes
    );

    for notification in fixtures.notifier.sent() {
        println!("  notify {}: {}", notification.patient_id, notification.message);
    }
    Ok(())
}
