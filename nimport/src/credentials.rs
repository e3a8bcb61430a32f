//! Credential lookup for configuration resolution.
//!
//! Job payloads only carry *names* of stored settings. The resolver turns
//! those names into concrete connection details through a [`CredentialStore`].
//!
//! [`RegistryCredentialStore`] keeps the non-secret part of each record in
//! memory and reads secrets from a [`SecretSource`] at lookup time, so a
//! rotated secret is picked up by the next job without re-registration.
//! With [`EnvSecrets`] the secrets come from environment variables:
//!
//! - `NI_INVENTORY_SETTING_TOKEN_<name>`
//! - `NI_NET_CREDS_LOGIN_<name>`
//! - `NI_NET_CREDS_PASSWORD_<name>`

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

const INVENTORY_TOKEN_PREFIX: &str = "NI_INVENTORY_SETTING_TOKEN_";
const NET_LOGIN_PREFIX: &str = "NI_NET_CREDS_LOGIN_";
const NET_PASSWORD_PREFIX: &str = "NI_NET_CREDS_PASSWORD_";

/// Lowest port a batfish service may listen on.
pub const BATFISH_MIN_PORT: u16 = 1024;

/// Kind of stored record a lookup targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CredentialKind {
    Inventory,
    Network,
    Batfish,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialKind::Inventory => "inventory setting",
            CredentialKind::Network => "network credentials",
            CredentialKind::Batfish => "batfish service",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("{kind} '{name}' does not exist")]
    NotFound { kind: CredentialKind, name: String },
    #[error("{kind} '{name}': environment variable '{variable}' is not set or empty")]
    MissingSecret {
        kind: CredentialKind,
        name: String,
        variable: String,
    },
    #[error("no {kind} is registered")]
    NoDefault { kind: CredentialKind },
    #[error("{kind} '{name}' is invalid: {reason}")]
    InvalidRecord {
        kind: CredentialKind,
        name: String,
        reason: String,
    },
}

/// Connection details for the inventory system.
#[derive(Clone, Serialize, Deserialize)]
pub struct InventoryCredentials {
    pub address: String,
    pub token: String,
    pub verify_ssl: bool,
}

impl fmt::Debug for InventoryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InventoryCredentials")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .field("verify_ssl", &self.verify_ssl)
            .finish()
    }
}

/// Device login for the network.
#[derive(Clone, Serialize, Deserialize)]
pub struct NetworkCredentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for NetworkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A batfish service record. Every field besides the name is optional and
/// only injected when set.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BatfishService {
    pub name: String,
    pub address: Option<String>,
    pub port_v1: Option<u16>,
    pub port_v2: Option<u16>,
    pub use_ssl: Option<bool>,
    pub network_name: Option<String>,
    pub snapshot_name: Option<String>,
}

impl BatfishService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Ports must be unprivileged and distinct.
    pub fn validate(&self) -> Result<(), CredentialError> {
        let invalid = |reason: String| CredentialError::InvalidRecord {
            kind: CredentialKind::Batfish,
            name: self.name.clone(),
            reason,
        };
        for (field, port) in [("port_v1", self.port_v1), ("port_v2", self.port_v2)] {
            match port {
                Some(port) if port < BATFISH_MIN_PORT => {
                    return Err(invalid(format!(
                        "{field} {port} must be between {BATFISH_MIN_PORT} and 65535"
                    )));
                }
                _ => {}
            }
        }
        match (self.port_v1, self.port_v2) {
            (Some(v1), Some(v2)) if v1 == v2 => {
                Err(invalid("port_v1 and port_v2 must be different".into()))
            }
            _ => Ok(()),
        }
    }
}

/// Source of stored credential records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup_inventory(&self, name: &str) -> Result<InventoryCredentials, CredentialError>;

    async fn lookup_network(&self, name: &str) -> Result<NetworkCredentials, CredentialError>;

    /// Look up a batfish service by name, or the default record when `name`
    /// is `None`.
    async fn lookup_batfish(&self, name: Option<&str>) -> Result<BatfishService, CredentialError>;
}

/// Where secret values live.
pub trait SecretSource: Send + Sync {
    /// The value of `key`; empty values count as unset.
    fn secret(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    }
}

/// Secrets held in a map, keyed by the same names [`EnvSecrets`] reads.
#[derive(Clone, Default)]
pub struct MapSecrets {
    values: HashMap<String, String>,
}

impl fmt::Debug for MapSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("MapSecrets").field("keys", &keys).finish()
    }
}

impl MapSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_inventory_token(self, name: &str, token: impl Into<String>) -> Self {
        self.with(inventory_token_var(name), token)
    }

    pub fn with_network_login(
        self,
        name: &str,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.with(network_login_var(name), login)
            .with(network_password_var(name), password)
    }
}

impl SecretSource for MapSecrets {
    fn secret(&self, key: &str) -> Option<String> {
        self.values.get(key).filter(|value| !value.is_empty()).cloned()
    }
}

pub fn inventory_token_var(name: &str) -> String {
    format!("{INVENTORY_TOKEN_PREFIX}{name}")
}

pub fn network_login_var(name: &str) -> String {
    format!("{NET_LOGIN_PREFIX}{name}")
}

pub fn network_password_var(name: &str) -> String {
    format!("{NET_PASSWORD_PREFIX}{name}")
}

/// Non-secret part of an inventory setting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventorySetting {
    pub name: String,
    pub address: String,
    pub verify_ssl: bool,
}

/// Non-secret part of a network credential reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkCredentialRef {
    pub name: String,
    pub description: Option<String>,
}

/// In-memory record registry backed by a [`SecretSource`].
///
/// The default batfish service is the first one registered.
pub struct RegistryCredentialStore<S: SecretSource> {
    secrets: S,
    inventory: RwLock<HashMap<String, InventorySetting>>,
    network: RwLock<HashMap<String, NetworkCredentialRef>>,
    batfish: RwLock<Vec<BatfishService>>,
}

impl<S: SecretSource> fmt::Debug for RegistryCredentialStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentialStore")
            .field("inventory", &self.inventory.read().len())
            .field("network", &self.network.read().len())
            .field("batfish", &self.batfish.read().len())
            .finish()
    }
}

impl RegistryCredentialStore<EnvSecrets> {
    pub fn from_env() -> Self {
        Self::new(EnvSecrets)
    }
}

impl<S: SecretSource> RegistryCredentialStore<S> {
    pub fn new(secrets: S) -> Self {
        Self {
            secrets,
            inventory: RwLock::new(HashMap::new()),
            network: RwLock::new(HashMap::new()),
            batfish: RwLock::new(Vec::new()),
        }
    }

    pub fn register_inventory(&self, setting: InventorySetting) {
        self.inventory.write().insert(setting.name.clone(), setting);
    }

    pub fn register_network(&self, creds: NetworkCredentialRef) {
        self.network.write().insert(creds.name.clone(), creds);
    }

    /// Register a batfish service, replacing any record with the same name
    /// in place so the default does not move.
    pub fn register_batfish(&self, service: BatfishService) -> Result<(), CredentialError> {
        service.validate()?;
        let mut services = self.batfish.write();
        match services.iter_mut().find(|s| s.name == service.name) {
            Some(existing) => *existing = service,
            None => services.push(service),
        }
        Ok(())
    }

    fn secret(
        &self,
        kind: CredentialKind,
        name: &str,
        variable: String,
    ) -> Result<String, CredentialError> {
        self.secrets
            .secret(&variable)
            .ok_or_else(|| CredentialError::MissingSecret {
                kind,
                name: name.to_string(),
                variable,
            })
    }
}

#[async_trait]
impl<S: SecretSource> CredentialStore for RegistryCredentialStore<S> {
    async fn lookup_inventory(&self, name: &str) -> Result<InventoryCredentials, CredentialError> {
        let setting = self.inventory.read().get(name).cloned().ok_or_else(|| {
            CredentialError::NotFound {
                kind: CredentialKind::Inventory,
                name: name.to_string(),
            }
        })?;
        let token = self.secret(CredentialKind::Inventory, name, inventory_token_var(name))?;
        Ok(InventoryCredentials {
            address: setting.address,
            token,
            verify_ssl: setting.verify_ssl,
        })
    }

    async fn lookup_network(&self, name: &str) -> Result<NetworkCredentials, CredentialError> {
        if !self.network.read().contains_key(name) {
            return Err(CredentialError::NotFound {
                kind: CredentialKind::Network,
                name: name.to_string(),
            });
        }
        let login = self.secret(CredentialKind::Network, name, network_login_var(name))?;
        let password = self.secret(CredentialKind::Network, name, network_password_var(name))?;
        Ok(NetworkCredentials { login, password })
    }

    async fn lookup_batfish(&self, name: Option<&str>) -> Result<BatfishService, CredentialError> {
        let services = self.batfish.read();
        match name {
            Some(name) => services
                .iter()
                .find(|s| s.name == name)
                .cloned()
                .ok_or_else(|| CredentialError::NotFound {
                    kind: CredentialKind::Batfish,
                    name: name.to_string(),
                }),
            None => services.first().cloned().ok_or(CredentialError::NoDefault {
                kind: CredentialKind::Batfish,
            }),
        }
    }
}
