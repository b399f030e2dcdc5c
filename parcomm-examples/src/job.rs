//! Runs every example job on an in-process universe.
//!
//! The universe is shaped by `PARCOMM_WORLD_SIZE` and
//! `PARCOMM_RANKS_PER_NODE`; logging follows `RUST_LOG`:
//!
//! ```text
//! PARCOMM_WORLD_SIZE=6 PARCOMM_RANKS_PER_NODE=2 RUST_LOG=info cargo run --example job
//! ```

use anyhow::Result;
use parcomm::prelude::*;
use parcomm_examples::census::{collect_labels, count_participants, survey_nodes};
use parcomm_examples::greeting::broadcast_greeting;
use parcomm_examples::ring::{exchange_with_neighbors, ring_sum};
use parcomm_examples::stencil::Rod;
use parcomm_local::{LocalUniverse, UniverseConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STEPS: usize = 20;

fn participant(env: &Environment) -> Result<String> {
    let world = env.world();
    let rank = world.rank()?;

    let participants = count_participants(env)?;
    let greeting = broadcast_greeting(&world, 0, "Hello world")?;
    let token = ring_sum(&world, 0)?;
    let (from_left, from_right) = exchange_with_neighbors(&world, rank)?;
    let node = survey_nodes(env)?;
    let labels = collect_labels(env, 0)?;

    let mut rod = Rod::new(&world, vec![if rank == 0 { 100.0 } else { 0.0 }; 4])?;
    for _ in 0..STEPS {
        rod.step()?;
    }
    let heat = rod.total_heat()?;

    let mut report = format!(
        "rank {rank}: {participants} participants, greeting {greeting:?}, neighbors ({from_left}, {from_right}), \
         node rank {}/{}, heat {heat:.3}",
        node.node_rank, node.node_size
    );
    if let Some(token) = token {
        report.push_str(&format!(", ring token {token}"));
    }
    if let Some(nodes) = node.nodes {
        report.push_str(&format!(", {nodes} nodes"));
    }
    if let Some(labels) = labels {
        report.push_str(&format!(", {} labels", labels.len()));
    }
    Ok(report)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = UniverseConfig::from_env()?;
    info!(world_size = config.world_size(), ranks_per_node = config.ranks_per_node(), "running example job");

    let universe = LocalUniverse::new(config);
    let reports = universe.run(|native| -> Result<String> {
        let env = Environment::new(native)?;
        participant(&env)
    });
    for report in reports {
        info!("{}", report?);
    }
    Ok(())
}
