// Transaction signing seam. The swap API returns prebuilt transactions;
// signing is the only place the wallet key material is touched.

use crate::error::CoreError;
use crate::settings::{load_keypair_from_env_var, parse_private_key_string, Settings};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;

/// Env var holding a base64-encoded keypair, checked when the settings
/// file configures neither a path nor a key string.
pub const WALLET_KEYPAIR_ENV: &str = "SOL_CYCLE_WALLET_KEYPAIR";

pub trait TransactionSigner {
    fn public_key(&self) -> Pubkey;

    /// Sign a prebuilt transaction in place using its embedded blockhash.
    fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), CoreError>;
}

pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Resolve the wallet keypair from settings: explicit key string,
    /// then keypair file, then the env var.
    pub fn from_settings(settings: &Settings) -> Result<Self, CoreError> {
        if let Some(key_string) = &settings.wallet_private_key_string {
            let bytes = parse_private_key_string(key_string)
                .map_err(CoreError::InvalidKeypair)?;
            let keypair = Keypair::from_bytes(&bytes)
                .map_err(|e| CoreError::InvalidKeypair(e.to_string()))?;
            return Ok(Self::new(keypair));
        }

        if let Some(path) = &settings.wallet_keypair_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CoreError::InvalidKeypair(format!("read {}: {}", path, e)))?;
            let bytes: Vec<u8> = serde_json::from_str(&contents)
                .map_err(|e| CoreError::InvalidKeypair(format!("parse {}: {}", path, e)))?;
            let keypair = Keypair::from_bytes(&bytes)
                .map_err(|e| CoreError::InvalidKeypair(e.to_string()))?;
            return Ok(Self::new(keypair));
        }

        if let Some(bytes) = load_keypair_from_env_var(WALLET_KEYPAIR_ENV) {
            let keypair = Keypair::from_bytes(&bytes)
                .map_err(|e| CoreError::InvalidKeypair(e.to_string()))?;
            return Ok(Self::new(keypair));
        }

        Err(CoreError::InvalidKeypair(
            "no wallet key configured (wallet_private_key_string, wallet_keypair_path, or env)"
                .to_string(),
        ))
    }
}

impl TransactionSigner for KeypairSigner {
    fn public_key(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), CoreError> {
        let blockhash = tx.message.recent_blockhash;
        tx.try_sign(&[&self.keypair], blockhash)
            .map_err(|e| CoreError::Transaction(format!("signing failed: {}", e)))
    }
}
