//! Server configuration, parsed from a TOML file plus environment variable
//! overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use keirloom_core::{Address, FamilySeed, Keypair};
use keirloom_exec::ExecConfig;

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// General daemon settings
    #[serde(default)]
    pub server: ServerSection,

    /// Ledger RPC settings
    pub ledger: LedgerSection,

    /// System co-signer wallet
    pub signer: SignerSection,

    /// Seed vault key material
    pub vault: VaultSection,

    /// Execution pipeline tuning
    #[serde(default)]
    pub execution: ExecutionSection,
}

/// General daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (SQLite case store)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            poll_interval_secs: default_poll_interval(),
            log_level: default_log_level(),
        }
    }
}

/// Ledger RPC settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// JSON-RPC endpoint of the ledger node
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// HTTP timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Destination of approval payments; heirs consent by co-signing a
    /// one-drop transfer to this address
    pub verify_address: String,
}

/// System co-signer wallet. The seed stays inside this process and is
/// excluded from Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct SignerSection {
    /// Classic address of the system signer
    pub address: String,

    /// Family seed of the system signer
    pub seed: String,
}

impl std::fmt::Debug for SignerSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerSection")
            .field("address", &self.address)
            .field("seed", &"****")
            .finish()
    }
}

/// Master key for the at-rest seed vault
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultSection {
    /// Key material the custodial seeds are sealed under
    pub master_key: String,
}

impl std::fmt::Debug for VaultSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSection")
            .field("master_key", &"****")
            .finish()
    }
}

/// Execution pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSection {
    /// Payment attempts per distribution item before escalation
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Approval transaction lifetime in ledgers
    #[serde(default = "default_approval_ttl")]
    pub approval_ttl_ledgers: u32,

    /// Case lease lifetime in seconds
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            approval_ttl_ledgers: default_approval_ttl(),
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_poll_interval() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rpc_url() -> String {
    "http://localhost:5005".to_string()
}

fn default_rpc_timeout() -> u64 {
    10
}

fn default_retry_limit() -> u32 {
    3
}

fn default_approval_ttl() -> u32 {
    600 // roughly half an hour of ledgers
}

fn default_lease_ttl() -> u64 {
    120
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `KEIRLOOM_DATA_DIR`
    /// - `KEIRLOOM_POLL_INTERVAL`
    /// - `KEIRLOOM_LOG_LEVEL`
    /// - `KEIRLOOM_RPC_URL`
    /// - `KEIRLOOM_VERIFY_ADDRESS`
    /// - `KEIRLOOM_SIGNER_ADDRESS`
    /// - `KEIRLOOM_SIGNER_SEED`
    /// - `KEIRLOOM_VAULT_KEY`
    /// - `KEIRLOOM_RETRY_LIMIT`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KEIRLOOM_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KEIRLOOM_POLL_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.server.poll_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("KEIRLOOM_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("KEIRLOOM_RPC_URL") {
            self.ledger.rpc_url = v;
        }
        if let Ok(v) = std::env::var("KEIRLOOM_VERIFY_ADDRESS") {
            self.ledger.verify_address = v;
        }
        if let Ok(v) = std::env::var("KEIRLOOM_SIGNER_ADDRESS") {
            self.signer.address = v;
        }
        if let Ok(v) = std::env::var("KEIRLOOM_SIGNER_SEED") {
            self.signer.seed = v;
        }
        if let Ok(v) = std::env::var("KEIRLOOM_VAULT_KEY") {
            self.vault.master_key = v;
        }
        if let Ok(v) = std::env::var("KEIRLOOM_RETRY_LIMIT") {
            if let Ok(limit) = v.parse::<u32>() {
                self.execution.retry_limit = limit;
            }
        }
    }

    /// Validate that the configuration is usable. Error text never echoes
    /// the seed or vault key.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.server.poll_interval_secs >= 5,
            "server.poll_interval_secs must be >= 5"
        );

        anyhow::ensure!(
            !self.ledger.rpc_url.is_empty(),
            "ledger.rpc_url must not be empty"
        );
        anyhow::ensure!(
            self.ledger.timeout_secs > 0,
            "ledger.timeout_secs must be > 0"
        );
        self.ledger
            .verify_address
            .parse::<Address>()
            .context("ledger.verify_address is not a valid classic address")?;

        self.signer
            .address
            .parse::<Address>()
            .context("signer.address is not a valid classic address")?;
        let seed: FamilySeed = self
            .signer
            .seed
            .parse()
            .context("signer.seed is not a valid family seed")?;
        let keypair = Keypair::derive(&seed).context("signer.seed failed key derivation")?;
        anyhow::ensure!(
            keypair.address().to_string() == self.signer.address,
            "signer.seed does not derive signer.address"
        );

        anyhow::ensure!(
            !self.vault.master_key.is_empty(),
            "vault.master_key must not be empty"
        );

        anyhow::ensure!(
            self.execution.retry_limit >= 1,
            "execution.retry_limit must be >= 1"
        );
        anyhow::ensure!(
            self.execution.approval_ttl_ledgers >= 10,
            "execution.approval_ttl_ledgers must be >= 10"
        );

        Ok(())
    }

    /// Map into the execution pipeline's configuration.
    pub fn exec_config(&self) -> ExecConfig {
        ExecConfig {
            system_signer_address: Some(self.signer.address.clone()),
            system_signer_seed: Some(self.signer.seed.clone()),
            verify_address: Some(self.ledger.verify_address.clone()),
            retry_limit: self.execution.retry_limit,
            approval_ttl_ledgers: self.execution.approval_ttl_ledgers,
            lease_ttl_secs: self.execution.lease_ttl_secs,
        }
    }

    /// Path of the SQLite case store inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("keirloom.db")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn test_signer() -> (String, String) {
        let seed = FamilySeed::generate();
        let keypair = Keypair::derive(&seed).unwrap();
        (keypair.address().to_string(), seed.to_string())
    }

    fn minimal_toml(address: &str, seed: &str) -> String {
        format!(
            r#"
[ledger]
verify_address = "{address}"

[signer]
address = "{address}"
seed = "{seed}"

[vault]
master_key = "unit-test-master-key"
"#
        )
    }

    fn full_toml(address: &str, seed: &str) -> String {
        format!(
            r#"
[server]
data_dir = "/custom/data"
poll_interval_secs = 10
log_level = "debug"

[ledger]
rpc_url = "http://ledger.internal:5005"
timeout_secs = 30
verify_address = "{address}"

[signer]
address = "{address}"
seed = "{seed}"

[vault]
master_key = "full-master-key"

[execution]
retry_limit = 5
approval_ttl_ledgers = 1200
lease_ttl_secs = 60
"#
        )
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn test_parse_minimal_config() {
        let (address, seed) = test_signer();
        let file = write_config(&minimal_toml(&address, &seed));

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.data_dir, PathBuf::from("/data"));
        assert_eq!(config.server.poll_interval_secs, 30); // default
        assert_eq!(config.server.log_level, "info"); // default
        assert_eq!(config.ledger.rpc_url, "http://localhost:5005"); // default
        assert_eq!(config.ledger.timeout_secs, 10);
        assert_eq!(config.execution.retry_limit, 3);
        assert_eq!(config.execution.approval_ttl_ledgers, 600);
        assert_eq!(config.execution.lease_ttl_secs, 120);
        assert_eq!(config.db_path(), PathBuf::from("/data/keirloom.db"));
    }

    #[test]
    fn test_parse_full_config() {
        let (address, seed) = test_signer();
        let file = write_config(&full_toml(&address, &seed));

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.server.poll_interval_secs, 10);
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.ledger.rpc_url, "http://ledger.internal:5005");
        assert_eq!(config.ledger.timeout_secs, 30);
        assert_eq!(config.ledger.verify_address, address);
        assert_eq!(config.signer.address, address);
        assert_eq!(config.vault.master_key, "full-master-key");
        assert_eq!(config.execution.retry_limit, 5);
        assert_eq!(config.execution.approval_ttl_ledgers, 1200);
        assert_eq!(config.execution.lease_ttl_secs, 60);
    }

    #[test]
    fn test_missing_signer_section_rejected() {
        let (address, _) = test_signer();
        let toml = format!(
            r#"
[ledger]
verify_address = "{address}"

[vault]
master_key = "unit-test-master-key"
"#
        );
        let file = write_config(&toml);
        assert!(ServerConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let (address, seed) = test_signer();
        let file = write_config(&minimal_toml(&address, &seed));
        let mut config = ServerConfig::from_file(file.path()).unwrap();

        std::env::set_var("KEIRLOOM_DATA_DIR", "/env/data");
        std::env::set_var("KEIRLOOM_POLL_INTERVAL", "15");
        std::env::set_var("KEIRLOOM_RPC_URL", "http://env.internal:5005");

        config.apply_env_overrides();

        assert_eq!(config.server.data_dir, PathBuf::from("/env/data"));
        assert_eq!(config.server.poll_interval_secs, 15);
        assert_eq!(config.ledger.rpc_url, "http://env.internal:5005");

        std::env::remove_var("KEIRLOOM_DATA_DIR");
        std::env::remove_var("KEIRLOOM_POLL_INTERVAL");
        std::env::remove_var("KEIRLOOM_RPC_URL");
    }

    #[test]
    fn test_validation_ok() {
        let (address, seed) = test_signer();
        let file = write_config(&full_toml(&address, &seed));
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_verify_address() {
        let (address, seed) = test_signer();
        let toml = minimal_toml(&address, &seed).replace(
            &format!("verify_address = \"{address}\""),
            "verify_address = \"not-an-address\"",
        );
        let file = write_config(&toml);
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_seed_address_mismatch() {
        let (address, _) = test_signer();
        let (_, other_seed) = test_signer();
        let file = write_config(&minimal_toml(&address, &other_seed));
        let config = ServerConfig::from_file(file.path()).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("does not derive"));
    }

    #[test]
    fn test_validation_rejects_short_poll_interval() {
        let (address, seed) = test_signer();
        let toml = format!(
            "[server]\npoll_interval_secs = 1\n{}",
            minimal_toml(&address, &seed)
        );
        let file = write_config(&toml);
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exec_config_mapping() {
        let (address, seed) = test_signer();
        let file = write_config(&full_toml(&address, &seed));
        let config = ServerConfig::from_file(file.path()).unwrap();

        let exec = config.exec_config();
        assert_eq!(exec.system_signer_address.as_deref(), Some(address.as_str()));
        assert_eq!(exec.system_signer_seed.as_deref(), Some(seed.as_str()));
        assert_eq!(exec.verify_address.as_deref(), Some(address.as_str()));
        assert_eq!(exec.retry_limit, 5);
        assert_eq!(exec.approval_ttl_ledgers, 1200);
        assert_eq!(exec.lease_ttl_secs, 60);
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let (address, seed) = test_signer();
        let file = write_config(&full_toml(&address, &seed));
        let config = ServerConfig::from_file(file.path()).unwrap();

        let debug = format!("{:?}", config);
        assert!(debug.contains(&address));
        assert!(!debug.contains(&seed));
        assert!(!debug.contains("full-master-key"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let (address, seed) = test_signer();
        let file = write_config(&full_toml(&address, &seed));
        let config = ServerConfig::from_file(file.path()).unwrap();

        let serialized = toml::to_string_pretty(&config).unwrap();
        let reparsed: ServerConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(reparsed.signer.address, config.signer.address);
        assert_eq!(reparsed.execution.retry_limit, config.execution.retry_limit);
    }
}
