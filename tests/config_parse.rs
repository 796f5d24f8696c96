use escrow_bot::config::AppConfig;
use std::collections::HashMap;
use std::io::Write;

const SAMPLE: &str = r#"
mnemonic = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"

[discord]
application_id = "111"
public_key = "aa"
guild_id = "222"
owner_id = "1000"
button_cooldown_ms = 2500

[confirmations]
btc = 3

[monitor]
poll_secs = 15
role_timeout_secs = 0

[server]
port = 9000
db_path = "/tmp/escrow-test.db"
"#;

fn load_sample() -> AppConfig {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(SAMPLE.as_bytes()).unwrap();
    AppConfig::load_from(f.path()).unwrap()
}

#[test]
fn toml_values_apply_with_defaults_for_the_rest() {
    let cfg = load_sample().resolved_with(|_| None);
    assert_eq!(cfg.application_id.as_deref(), Some("111"));
    assert_eq!(cfg.guild_id.as_deref(), Some("222"));
    assert_eq!(cfg.owner_id.as_deref(), Some("1000"));
    assert_eq!(cfg.button_cooldown_ms, 2_500);
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.poll_secs, 15);
    assert_eq!(cfg.btc_conf, 3);
    assert_eq!(cfg.ltc_conf, 6);
    assert_eq!(cfg.role_timeout_secs, 0);
    assert_eq!(cfg.deposit_timeout_secs, 86_400);
    assert_eq!(cfg.min_deposit_units, 1);
    assert_eq!(cfg.db_path.to_str(), Some("/tmp/escrow-test.db"));
    assert_eq!(cfg.api_base, "https://discord.com/api/v10");
    assert!(cfg.discord_token.is_none());
    assert!(cfg.require_token().is_err());
    assert!(cfg.mnemonic.is_some());
}

#[test]
fn environment_overrides_toml() {
    let env: HashMap<&str, &str> = [
        ("DISCORD_TOKEN", "secret-token"),
        ("ESCROW_PORT", "7070"),
        ("CONF_LTC", "12"),
        ("BUTTON_COOLDOWN_MS", "0"),
        ("OWNER_ID", "   "),
        ("BOT_MNEMONIC", " legal winner thank year wave sausage worth useful legal winner thank yellow "),
    ]
    .into_iter()
    .collect();
    let cfg = load_sample().resolved_with(|k| env.get(k).map(|v| v.to_string()));

    assert_eq!(cfg.require_token().unwrap(), "secret-token");
    assert_eq!(cfg.port, 7070);
    assert_eq!(cfg.ltc_conf, 12);
    assert_eq!(cfg.button_cooldown_ms, 0);
    // blank env values fall through to the file
    assert_eq!(cfg.owner_id.as_deref(), Some("1000"));
    assert!(cfg.mnemonic.as_deref().unwrap().starts_with("legal winner"));

    // secrets never reach the logs
    let dbg = format!("{:?}", cfg);
    assert!(!dbg.contains("secret-token"));
    assert!(!dbg.contains("legal winner"));
}

#[test]
fn missing_file_means_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = AppConfig::load_from(dir.path().join("absent.toml"))
        .unwrap()
        .resolved_with(|_| None);
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.poll_secs, 60);
    assert_eq!(cfg.btc_conf, 2);
    assert!(cfg.mnemonic.is_none());
}

#[test]
fn malformed_toml_is_an_error() {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(b"[server]\nport = \"not a number\"\n").unwrap();
    assert!(AppConfig::load_from(f.path()).is_err());
}
