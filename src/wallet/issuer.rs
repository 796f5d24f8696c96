//! Address Issuer
//!
//! Deterministic deposit addresses from the bot's seed phrase. The derivation
//! index is the ledger-assigned trade id, so distinct trades never share an
//! address. With no usable seed every call fails with `WalletUnavailable`.
//!
//! | network  | path                       | encoding          |
//! |----------|----------------------------|-------------------|
//! | Litecoin | `m/44'/2'/0'/0/{index}`    | P2WPKH `ltc1…`    |
//! | Bitcoin  | `m/84'/0'/0'/0/{index}`    | P2WPKH `bc1…`     |
//! | Solana   | `m/44'/501'/{index}'/0'`   | base58 public key |

use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use ed25519_dalek::SigningKey;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::types::{Currency, Network, TradeId};
use crate::wallet::encoding::{p2wpkh_address, slip10_ed25519, solana_address};

/// Largest index usable as a non-hardened BIP32 child.
pub const MAX_INDEX: TradeId = (1 << 31) - 1;

enum SeedState {
    Ready(Arc<[u8; 64]>),
    Unavailable(String),
}

#[derive(Clone)]
pub struct AddressIssuer {
    state: Arc<SeedState>,
}

impl fmt::Debug for AddressIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.as_ref() {
            SeedState::Ready(_) => f.write_str("AddressIssuer(ready)"),
            SeedState::Unavailable(r) => write!(f, "AddressIssuer(unavailable: {})", r),
        }
    }
}

impl AddressIssuer {
    /// Build from a BIP39 phrase of 12 to 24 words (English wordlist, empty
    /// passphrase).
    pub fn from_mnemonic(phrase: &str) -> EscrowResult<Self> {
        let normalized = phrase
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" ");
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| EscrowError::WalletUnavailable(format!("invalid seed phrase: {}", e)))?;
        Ok(Self::from_seed(mnemonic.to_seed("")))
    }

    pub fn from_seed(seed: [u8; 64]) -> Self {
        Self {
            state: Arc::new(SeedState::Ready(Arc::new(seed))),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: Arc::new(SeedState::Unavailable(reason.into())),
        }
    }

    /// Startup helper: a missing or broken seed disables trading instead of
    /// aborting the process.
    pub fn from_config(phrase: Option<&str>) -> Self {
        match phrase {
            None => {
                warn!("[WALLET] BOT_MNEMONIC not set; trade initiation is disabled");
                Self::unavailable("no seed phrase configured")
            }
            Some(p) => match Self::from_mnemonic(p) {
                Ok(issuer) => {
                    info!("[WALLET] Seed phrase loaded");
                    issuer
                }
                Err(e) => {
                    warn!("[WALLET] {}; trade initiation is disabled", e);
                    Self::unavailable("seed phrase rejected")
                }
            },
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state.as_ref(), SeedState::Ready(_))
    }

    /// Fails the same way `derive_address` would, without deriving anything.
    pub fn ensure_ready(&self, currency: Currency) -> EscrowResult<()> {
        self.seed()?;
        match currency.network() {
            Network::Bitcoin | Network::Litecoin | Network::Solana => Ok(()),
            Network::Ethereum | Network::BnbSmartChain => {
                Err(EscrowError::UnsupportedCurrency(currency))
            }
        }
    }

    pub fn derive_address(&self, currency: Currency, index: TradeId) -> EscrowResult<String> {
        self.ensure_ready(currency)?;
        let seed = self.seed()?;
        if !(0..=MAX_INDEX).contains(&index) {
            return Err(EscrowError::InvalidInput(format!(
                "derivation index {} out of range",
                index
            )));
        }
        let index = index as u32;
        match currency.network() {
            Network::Bitcoin => segwit(seed, &format!("m/84'/0'/0'/0/{}", index), "bc"),
            Network::Litecoin => segwit(seed, &format!("m/44'/2'/0'/0/{}", index), "ltc"),
            Network::Solana => {
                let secret = slip10_ed25519(seed, &[44, 501, index, 0]);
                let public = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
                Ok(solana_address(&public))
            }
            Network::Ethereum | Network::BnbSmartChain => {
                Err(EscrowError::UnsupportedCurrency(currency))
            }
        }
    }

    fn seed(&self) -> EscrowResult<&[u8; 64]> {
        match self.state.as_ref() {
            SeedState::Ready(seed) => Ok(seed.as_ref()),
            SeedState::Unavailable(reason) => Err(EscrowError::WalletUnavailable(reason.clone())),
        }
    }
}

fn segwit(seed: &[u8; 64], path: &str, hrp: &str) -> EscrowResult<String> {
    let path: DerivationPath = path
        .parse()
        .map_err(|e| EscrowError::WalletUnavailable(format!("bad path {}: {}", path, e)))?;
    let xprv = XPrv::derive_from_path(seed, &path)
        .map_err(|e| EscrowError::WalletUnavailable(format!("derivation failed: {}", e)))?;
    let pubkey = xprv.public_key().to_bytes();
    p2wpkh_address(hrp, &pubkey)
        .map_err(|e| EscrowError::WalletUnavailable(format!("address encoding failed: {}", e)))
}
