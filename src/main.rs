use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use weave::{
    BincodeCodec, Block, BlockStore, BlockTemplate, ChainElement, HashMiner, IntervalRetarget,
    NodeConfig, RewardAddr, SledStore, Transaction, Weave, WeaveEngine,
};

/// Single-process weave node: bootstraps or reopens a local weave, mines a
/// few blocks of demo transactions and verifies the result.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Args {
    /// Optional config file (toml, json, yaml).
    #[clap(long)]
    config: Option<PathBuf>,
    /// Overrides the configured data directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,
    /// Number of blocks to mine before exiting.
    #[clap(long, default_value_t = 3)]
    blocks: u64,
    /// Recipient of mining rewards.
    #[clap(long)]
    reward_addr: Option<String>,
}

// -----------------------------
// Helpers
// -----------------------------

fn demo_txs(count: usize) -> Vec<Transaction> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| {
            Transaction::new(
                format!("addr_{}", rng.gen::<u16>()).into_bytes(),
                format!("addr_{}", rng.gen::<u16>()).into_bytes(),
                rng.gen_range(1..1000),
                Vec::new(),
            )
        })
        .collect()
}

fn head_block(weave: &Weave) -> Result<&Block> {
    match weave.head() {
        Some(ChainElement::Materialized(block)) => Ok(block),
        _ => bail!("weave head is not materialized"),
    }
}

// -----------------------------
// Application
// -----------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load(args.config.as_deref()).context("loading config")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let store = SledStore::open(&config.data_dir)
        .with_context(|| format!("opening {}", config.data_dir.display()))?;
    let engine = WeaveEngine::new(
        store,
        BincodeCodec,
        HashMiner::new(),
        IntervalRetarget::new(config.retarget.clone()),
    );

    let mut weave = match engine.store().head()? {
        Some(hash) => {
            let head = engine
                .store()
                .resolve_block(&hash)?
                .with_context(|| format!("head block {hash} missing from store"))?;
            info!(height = head.height, hash = %hash.short(), "resuming weave");
            Weave::from_head(head)?
        }
        None => {
            let weave = engine.init(&config.weave)?;
            let genesis = head_block(&weave)?;
            engine.store().put_block(genesis)?;
            engine.store().set_head(&genesis.sealed_hash()?)?;
            weave
        }
    };

    let reward_addr = match args.reward_addr {
        Some(addr) => RewardAddr::Address(addr.into_bytes()),
        None => RewardAddr::Unclaimed,
    };

    for _ in 0..args.blocks {
        let txs = demo_txs(3);
        for tx in &txs {
            engine.store().put_tx(tx)?;
        }
        let template = BlockTemplate {
            reward_addr: reward_addr.clone(),
            ..BlockTemplate::default()
        };
        weave = engine.append(&weave, &txs, template).await?;

        let head = head_block(&weave)?;
        engine.store().put_block(head)?;
        engine.store().set_head(&head.sealed_hash()?)?;
    }

    if !engine.verify(&weave)? {
        bail!("local weave failed verification");
    }

    let head = head_block(&weave)?;
    let recall = engine.recall_block(head)?;
    info!(
        height = head.height,
        hash = %head.sealed_hash()?.short(),
        diff = head.diff,
        recall_height = recall.as_ref().map(|b| b.height),
        "weave verified"
    );
    Ok(())
}
