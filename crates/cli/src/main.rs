//! CLI for replaying historical EVM transactions.
//!
//! Pipeline: fetch tx -> hydrate state -> execute with tracer -> write trace.

use alloy_primitives::{Address, Bytes, B256, U256};
use clap::{Parser, Subcommand};
use retrace_core::{
    SimulationRequest, StateOverrides, Trace, TracerError, REORG_SAFETY_MARGIN,
};
use retrace_provider::{config, snapshot, RpcClient};
use retrace_simulator::engine::{DEFAULT_BASE_FEE, DEFAULT_BLOCK_TIMESTAMP};
use retrace_simulator::{render_trace, RevmEngine, Simulator, SimulatorConfig};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "retrace", version, about = "Historical EVM transaction tracer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a mined transaction and print its call tree.
    Simulate {
        /// Defaults to the built-in endpoint for the chain.
        #[arg(short, long, env = "RETRACE_RPC_URL")]
        rpc_url: Option<String>,

        #[arg(short, long, default_value_t = 1)]
        chain_id: u64,

        #[arg(short, long)]
        tx_hash: B256,

        /// Write the serialized trace to this file.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print the serialized trace instead of the tree view.
        #[arg(long, default_value_t = false)]
        json: bool,

        #[arg(long, default_value_t = REORG_SAFETY_MARGIN)]
        reorg_margin: u64,

        #[arg(long, default_value_t = DEFAULT_BLOCK_TIMESTAMP)]
        block_timestamp: u64,

        #[arg(long, default_value_t = DEFAULT_BASE_FEE)]
        base_fee: u64,

        /// Storage slot to read from the chain before replaying, as
        /// `ADDRESS:SLOT`. Repeatable.
        #[arg(long = "slot", value_parser = parse_slot)]
        slots: Vec<(Address, U256)>,
    },

    /// Resolve a transaction into simulation parameters without executing it.
    Resolve {
        #[arg(short, long, env = "RETRACE_RPC_URL")]
        rpc_url: Option<String>,

        #[arg(short, long, default_value_t = 1)]
        chain_id: u64,

        #[arg(short, long)]
        tx_hash: B256,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            rpc_url,
            chain_id,
            tx_hash,
            out,
            json,
            reorg_margin,
            block_timestamp,
            base_fee,
            slots,
        } => {
            let t0 = Instant::now();
            let rpc_url = config::resolve_rpc_url(rpc_url.as_deref(), chain_id)?;
            tracing::info!(rpc_url = %rpc_url, chain_id, %tx_hash, "starting simulation");

            let client = RpcClient::connect(&rpc_url)?;
            let sim = Simulator::new(client, RevmEngine).with_config(SimulatorConfig {
                reorg_safety_margin: reorg_margin,
                block_timestamp,
                base_fee,
                ..SimulatorConfig::default()
            });

            let request = SimulationRequest::new(chain_id, tx_hash);
            let outcome = sim
                .simulate_with_storage(
                    request,
                    &snapshot::empty(),
                    &slots,
                    StateOverrides::default(),
                )
                .await;
            match outcome {
                Ok(result) => {
                    tracing::info!(
                        gas_used = result.gas_used,
                        gas_limit = result.gas_limit,
                        elapsed_ms = t0.elapsed().as_millis(),
                        "simulation done"
                    );
                    emit_trace(&result.trace, out.as_deref(), json)?;
                    if !json {
                        println!(
                            "gas used {} / {}, returned 0x{}",
                            result.gas_used,
                            result.gas_limit,
                            alloy_primitives::hex::encode(&result.returned_data)
                        );
                    }
                }
                Err(TracerError::Execution { reason, trace }) => {
                    tracing::warn!(%reason, "execution failed");
                    if let Some(trace) = trace {
                        emit_trace(&trace, out.as_deref(), json)?;
                    }
                    return Err(TracerError::Execution {
                        reason,
                        trace: None,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Resolve {
            rpc_url,
            chain_id,
            tx_hash,
        } => {
            let rpc_url = config::resolve_rpc_url(rpc_url.as_deref(), chain_id)?;
            let sim = Simulator::new(RpcClient::connect(&rpc_url)?, RevmEngine);
            let resolved = sim
                .resolve(&SimulationRequest::new(chain_id, tx_hash))
                .await?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
    }

    Ok(())
}

fn parse_slot(raw: &str) -> Result<(Address, U256), String> {
    let (address, slot) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected ADDRESS:SLOT, got {raw:?}"))?;
    let address = address
        .parse::<Address>()
        .map_err(|e| format!("bad address {address:?}: {e}"))?;
    let slot = slot
        .parse::<U256>()
        .map_err(|e| format!("bad slot {slot:?}: {e}"))?;
    Ok((address, slot))
}

/// Writes the serialized trace to `out` (if given) and prints it to stdout,
/// raw with `--json`, as a tree otherwise.
fn emit_trace(
    trace: &Bytes,
    out: Option<&Path>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if trace.is_empty() {
        tracing::warn!("no trace was produced");
        return Ok(());
    }

    if let Some(path) = out {
        std::fs::write(path, trace)?;
        tracing::info!(path = %path.display(), bytes = trace.len(), "trace written");
    }

    if json {
        println!("{}", String::from_utf8_lossy(trace));
    } else {
        let parsed: Trace = serde_json::from_slice(trace)?;
        print!("{}", render_trace(&parsed));
    }
    Ok(())
}
