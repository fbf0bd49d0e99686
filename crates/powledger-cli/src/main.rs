use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use powledger_core::{Ledger, LedgerConfig};
use powledger_storage::SledStore;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "powledger")]
#[command(about = "Append to and inspect a proof-of-work ledger")]
struct Cli {
    /// Data directory for sled
    #[arg(long, env = "POWLEDGER_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// TOML file with ledger settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured difficulty (leading zero bits)
    #[arg(long, global = true)]
    difficulty: Option<u32>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mine and append a block
    Addblock {
        /// Block data
        #[arg(long)]
        data: String,
    },
    /// Print the chain from tip to genesis
    Printchain,
    /// Check every block's proof of work
    Verify,
}

fn load_config(cli: &Cli) -> Result<LedgerConfig> {
    let mut config = match &cli.config {
        Some(path) => LedgerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    if let Some(bits) = cli.difficulty {
        config.difficulty_bits = bits;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let store = SledStore::open(&cli.data_dir, &config.namespace)
        .with_context(|| format!("opening store at {}", cli.data_dir.display()))?;
    let ledger = Ledger::open(store, config).context("opening ledger")?;

    match cli.cmd {
        Command::Addblock { data } => {
            let block = ledger.add_block(&data).context("adding block")?;
            info!(hash = %block.hash_hex(), nonce = block.nonce, "block added");
            println!("Success!");
        }
        Command::Printchain => {
            for block in ledger.iterator()? {
                let block = block?;
                println!("PrevHash: {}", hex::encode(&block.prev_hash));
                println!("Data: {}", String::from_utf8_lossy(&block.data));
                println!("Hash: {}", block.hash_hex());
                println!("PoW: {}", ledger.pow().validate(&block));
                println!();
                println!("=================");
            }
        }
        Command::Verify => {
            let count = ledger.verify().context("verifying chain")?;
            info!(blocks = count, "chain verified");
            println!("chain ok: {count} blocks");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_flag_overrides_config() {
        let cli = Cli::parse_from(["powledger", "--difficulty", "12", "printchain"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.difficulty_bits, 12);
        assert_eq!(config.namespace, "blocks");
    }

    #[test]
    fn addblock_requires_data() {
        assert!(Cli::try_parse_from(["powledger", "addblock"]).is_err());
        let cli = Cli::parse_from(["powledger", "addblock", "--data", "Send 1 BTC"]);
        assert!(matches!(cli.cmd, Command::Addblock { data } if data == "Send 1 BTC"));
    }

    #[test]
    fn invalid_difficulty_is_rejected() {
        let cli = Cli::parse_from(["powledger", "--difficulty", "0", "verify"]);
        assert!(load_config(&cli).is_err());
    }
}
