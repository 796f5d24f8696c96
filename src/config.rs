use anyhow::{Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscordCfg {
    pub token: Option<String>,
    pub application_id: Option<String>,
    pub public_key: Option<String>,
    pub guild_id: Option<String>,
    pub ticket_category: Option<String>,
    pub api_base: Option<String>,
    pub owner_id: Option<String>,
    pub button_cooldown_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Confirmations {
    pub btc: Option<u64>,
    pub ltc: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitorCfg {
    pub poll_secs: Option<u64>,
    pub min_deposit_units: Option<u64>,
    pub role_timeout_secs: Option<u64>,
    pub deposit_timeout_secs: Option<u64>,
    pub blockchair_url: Option<String>,
    pub blockchair_key: Option<String>,
    pub solana_rpc_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCfg {
    pub port: Option<u16>,
    pub db_path: Option<String>,
}

/// On-disk `escrow.toml`. Every field is optional; env vars win over the file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    pub discord: Option<DiscordCfg>,
    pub confirmations: Option<Confirmations>,
    pub monitor: Option<MonitorCfg>,
    pub server: Option<ServerCfg>,
    /// Accepted for local setups; prefer `BOT_MNEMONIC` in the environment.
    pub mnemonic: Option<String>,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            let s = fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.as_ref().display()))?;
            let cfg: AppConfig = toml::from_str(&s)
                .with_context(|| format!("parsing {}", path.as_ref().display()))?;
            Ok(cfg)
        } else {
            Ok(Default::default())
        }
    }

    /// Resolve against the process environment.
    pub fn resolved(&self) -> ResolvedConfig {
        self.resolved_with(|k| std::env::var(k).ok())
    }

    /// Resolve against an arbitrary env lookup (tests pass a map here).
    pub fn resolved_with<F>(&self, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_str = |key: &str, toml_opt: Option<&String>| -> Option<String> {
            env(key)
                .filter(|s| !s.trim().is_empty())
                .or_else(|| toml_opt.cloned())
                .map(|s| s.trim().to_string())
        };
        let env_u64 = |key: &str, toml_opt: Option<u64>, default_: u64| -> u64 {
            env(key)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or_else(|| toml_opt.unwrap_or(default_))
        };

        let d = self.discord.clone().unwrap_or_default();
        let c = self.confirmations.clone().unwrap_or_default();
        let m = self.monitor.clone().unwrap_or_default();
        let s = self.server.clone().unwrap_or_default();

        let port = env("ESCROW_PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or_else(|| s.port.unwrap_or(8080));

        ResolvedConfig {
            discord_token: env_str("DISCORD_TOKEN", d.token.as_ref()),
            application_id: env_str("DISCORD_APPLICATION_ID", d.application_id.as_ref()),
            public_key: env_str("DISCORD_PUBLIC_KEY", d.public_key.as_ref()),
            guild_id: env_str("DISCORD_GUILD_ID", d.guild_id.as_ref()),
            ticket_category: env_str("TICKET_CATEGORY", d.ticket_category.as_ref()),
            api_base: env_str("DISCORD_API_BASE", d.api_base.as_ref())
                .unwrap_or_else(|| "https://discord.com/api/v10".into()),
            owner_id: env_str("OWNER_ID", d.owner_id.as_ref()),
            button_cooldown_ms: env_u64("BUTTON_COOLDOWN_MS", d.button_cooldown_ms, 5_000),
            mnemonic: env_str("BOT_MNEMONIC", self.mnemonic.as_ref()),
            db_path: PathBuf::from(
                env_str("ESCROW_DB_PATH", s.db_path.as_ref())
                    .unwrap_or_else(|| "data/escrow.db".into()),
            ),
            port,
            poll_secs: env_u64("MONITOR_POLL_SECS", m.poll_secs, 60).max(1),
            btc_conf: env_u64("CONF_BTC", c.btc, 2),
            ltc_conf: env_u64("CONF_LTC", c.ltc, 6),
            min_deposit_units: env_u64("MIN_DEPOSIT_UNITS", m.min_deposit_units, 1).max(1),
            role_timeout_secs: env_u64("ROLE_TIMEOUT_SECS", m.role_timeout_secs, 86_400),
            deposit_timeout_secs: env_u64("DEPOSIT_TIMEOUT_SECS", m.deposit_timeout_secs, 86_400),
            blockchair_url: env_str("BLOCKCHAIR_URL", m.blockchair_url.as_ref())
                .unwrap_or_else(|| "https://api.blockchair.com".into()),
            blockchair_key: env_str("BLOCKCHAIR_KEY", m.blockchair_key.as_ref()),
            solana_rpc_url: env_str("SOLANA_RPC_URL", m.solana_rpc_url.as_ref())
                .unwrap_or_else(|| "https://api.mainnet-beta.solana.com".into()),
        }
    }
}

#[derive(Clone)]
pub struct ResolvedConfig {
    pub discord_token: Option<String>,
    pub application_id: Option<String>,
    pub public_key: Option<String>,
    pub guild_id: Option<String>,
    pub ticket_category: Option<String>,
    pub api_base: String,
    pub owner_id: Option<String>,
    /// Minimum gap between one user's button presses; zero disables it.
    pub button_cooldown_ms: u64,
    pub mnemonic: Option<String>,
    pub db_path: PathBuf,
    pub port: u16,
    pub poll_secs: u64,
    pub btc_conf: u64,
    pub ltc_conf: u64,
    pub min_deposit_units: u64,
    pub role_timeout_secs: u64,
    pub deposit_timeout_secs: u64,
    pub blockchair_url: String,
    pub blockchair_key: Option<String>,
    pub solana_rpc_url: String,
}

// Hand-written so the token and mnemonic never reach a log line.
impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("discord_token", &self.discord_token.as_ref().map(|_| "<set>"))
            .field("application_id", &self.application_id)
            .field("guild_id", &self.guild_id)
            .field("ticket_category", &self.ticket_category)
            .field("api_base", &self.api_base)
            .field("owner_id", &self.owner_id)
            .field("button_cooldown_ms", &self.button_cooldown_ms)
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<set>"))
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("poll_secs", &self.poll_secs)
            .field("btc_conf", &self.btc_conf)
            .field("ltc_conf", &self.ltc_conf)
            .field("min_deposit_units", &self.min_deposit_units)
            .field("role_timeout_secs", &self.role_timeout_secs)
            .field("deposit_timeout_secs", &self.deposit_timeout_secs)
            .field("blockchair_url", &self.blockchair_url)
            .field("solana_rpc_url", &self.solana_rpc_url)
            .finish()
    }
}

impl ResolvedConfig {
    /// The bot credential is the one setting the process refuses to start without.
    pub fn require_token(&self) -> Result<&str> {
        self.discord_token
            .as_deref()
            .context("DISCORD_TOKEN is not set; the bot cannot authenticate")
    }

    pub fn require_application_id(&self) -> Result<&str> {
        self.application_id
            .as_deref()
            .context("DISCORD_APPLICATION_ID is not set")
    }

    pub fn require_public_key(&self) -> Result<&str> {
        self.public_key
            .as_deref()
            .context("DISCORD_PUBLIC_KEY is not set; inbound interactions cannot be verified")
    }

    pub fn require_guild_id(&self) -> Result<&str> {
        self.guild_id.as_deref().context("DISCORD_GUILD_ID is not set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = AppConfig::default().resolved_with(lookup(&[]));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.poll_secs, 60);
        assert_eq!(cfg.btc_conf, 2);
        assert_eq!(cfg.ltc_conf, 6);
        assert_eq!(cfg.role_timeout_secs, 86_400);
        assert_eq!(cfg.button_cooldown_ms, 5_000);
        assert_eq!(cfg.db_path, PathBuf::from("data/escrow.db"));
        assert!(cfg.mnemonic.is_none());
        assert!(cfg.require_token().is_err());
    }

    #[test]
    fn blank_env_values_count_as_unset() {
        let cfg = AppConfig::default().resolved_with(lookup(&[("BOT_MNEMONIC", "   ")]));
        assert!(cfg.mnemonic.is_none());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = AppConfig::default().resolved_with(lookup(&[
            ("DISCORD_TOKEN", "very-secret-token"),
            ("BOT_MNEMONIC", "abandon abandon about"),
        ]));
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("very-secret-token"));
        assert!(!dbg.contains("abandon"));
        assert!(dbg.contains("<set>"));
    }
}
