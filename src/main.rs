use anyhow::Context;
use log::{info, warn};
use std::path::Path;

use pow_chain::blockchain::ledger::record_outputs;
use pow_chain::blockchain::{
    Address, BlockStore, Blockchain, MemoryBlockStore, MemoryDirectory, MemoryLedger, Miner,
    MiningEngine, SledBlockStore, UtxoLedger, Wallet, WalletDirectory,
};
use pow_chain::config::Config;

const DEFAULT_CONFIG_PATH: &str = "pow_chain.toml";

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading config from {}", path)),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::load(DEFAULT_CONFIG_PATH).context("loading default config")
        }
        None => {
            info!("No config file given, using defaults");
            Ok(Config::default())
        }
    }
}

// Open sled storage, falling back to an in-memory store
fn open_store(path: &str) -> Box<dyn BlockStore> {
    if let Err(err) = std::fs::create_dir_all(path) {
        warn!("Failed to create data directory: {}", err);
    }

    match SledBlockStore::new(path) {
        Ok(store) => {
            info!("Using block storage at {}", path);
            Box::new(store)
        }
        Err(err) => {
            warn!("Failed to open block storage: {}", err);
            warn!("Using in-memory storage instead");
            Box::new(MemoryBlockStore::new())
        }
    }
}

// Create and register a wallet with some initial funds
fn create_funded_wallet(
    owner: &str,
    funds: u64,
    ledger: &MemoryLedger,
    directory: &MemoryDirectory,
) -> anyhow::Result<Wallet> {
    let wallet = Wallet::new(owner);
    directory.register(&wallet.to_record())?;
    ledger.add_utxo(funds, wallet.address())?;

    info!("Created wallet {} for {} with {} coins", wallet.address(), owner, funds);
    Ok(wallet)
}

fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = load_config()?;
    let store = open_store(&config.storage.path);
    let blockchain = Blockchain::bootstrap(store.as_ref(), &config.chain)?;

    let ledger = MemoryLedger::new();
    let directory = MemoryDirectory::new();

    let alice = create_funded_wallet("alice", 500, &ledger, &directory)?;
    let bob = Wallet::new("bob");
    directory.register(&bob.to_record())?;
    let bob_address: Address = directory.user_address("bob")?;

    let transaction = alice.create_transaction(&ledger, bob_address, 300)?;
    if directory.verify_transaction(&transaction)? {
        blockchain.add_transaction(transaction)?;
    } else {
        warn!("Dropping transaction with an invalid signature");
    }

    let engine = MiningEngine::new(
        config.miner.miners.iter().map(Miner::new).collect(),
        config.miner.commit_timeout(),
    );

    for _ in 0..config.miner.rounds {
        let report = engine.mine_pending(&blockchain)?;

        let block = match report.block {
            Some(block) => block,
            None => {
                warn!("No block committed this round");
                continue;
            }
        };

        for transaction in &block.transactions {
            record_outputs(&ledger, transaction)?;
        }
        store.save_block(&block)?;

        info!(
            "Block {} sealed by {} after {} hashes",
            block.index,
            report.winner.as_deref().unwrap_or("unknown"),
            report.attempts
        );
    }

    store.flush()?;

    info!(
        "Chain has {} blocks, valid: {}",
        blockchain.len(),
        blockchain.is_valid()
    );
    info!("Alice balance: {}", ledger.balance(alice.address()));

    Ok(())
}
