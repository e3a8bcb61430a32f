//! Turns a user payload into a complete, secret-bearing engine configuration.
//!
//! The payload names stored settings instead of carrying secrets. Resolution
//! replaces those names with the values from a [`CredentialStore`], fills in
//! defaults for `main` and `drivers`, and strips the reference fields so the
//! engine never sees them.
//!
//! Conflicts are handled differently per section. A user payload that
//! already carries `inventory.settings`, `network.login` or
//! `network.password` is rejected. Batfish fields set by the user are kept
//! and the stored record only fills the gaps.

use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::{Map, Value, json};

use crate::credentials::{BatfishService, CredentialError, CredentialStore};

/// Replacement for secret values in the sanitized form.
pub const REDACTED: &str = "[REDACTED]";

const SNAPSHOT_SUFFIX_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration payload must be a dictionary")]
    PayloadNotObject,
    #[error("{section} section is required")]
    MissingSection { section: &'static str },
    #[error("{section} must be a dictionary")]
    NotAnObject { section: String },
    #[error("{section}.{key} is required")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },
    #[error("{section}.{key} must be a string")]
    InvalidKey {
        section: &'static str,
        key: &'static str,
    },
    #[error("Invalid {section} {key} '{name}': {source}")]
    InvalidReference {
        section: &'static str,
        key: &'static str,
        name: String,
        #[source]
        source: CredentialError,
    },
    #[error(
        "{field} is already defined in the config. This would conflict with the credentials lookup."
    )]
    Collision { field: &'static str },
    #[error("{0}")]
    Credential(#[from] CredentialError),
}

/// Built-in platform to driver mapping. User entries override per key.
pub fn default_drivers_mapping() -> Map<String, Value> {
    let mut mapping = Map::new();
    for (platform, driver) in [
        ("default", "network_importer.drivers.default"),
        ("cisco_nxos", "network_importer.drivers.cisco_default"),
        ("cisco_ios", "network_importer.drivers.cisco_default"),
        ("cisco_xr", "network_importer.drivers.cisco_default"),
        ("juniper_junos", "network_importer.drivers.juniper_junos"),
        ("arista_eos", "network_importer.drivers.arista_eos"),
    ] {
        mapping.insert(platform.to_string(), Value::String(driver.to_string()));
    }
    mapping
}

/// Defaults applied to every unset key of the `main` section.
pub fn default_main_config() -> Map<String, Value> {
    let defaults = json!({
        "import_ips": true,
        "import_prefixes": true,
        "import_cabling": "cdp",
        "import_intf_status": false,
        "import_vlans": "cli",
        "backend": "nautobot",
        "nbr_workers": 10,
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// `BF_NETWORK_<SITE>`.
pub fn batfish_network_name(site_code: &str) -> String {
    format!("BF_NETWORK_{}", site_code.to_uppercase())
}

/// `BF_SNAPSHOT_` followed by a random alphanumeric suffix.
pub fn batfish_snapshot_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SNAPSHOT_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("BF_SNAPSHOT_{suffix}")
}

/// A fully resolved engine configuration.
///
/// Holds live secrets. `Debug` prints the sanitized form; use
/// [`ResolvedConfig::sanitized`] for anything that gets logged or stored.
#[derive(Clone)]
pub struct ResolvedConfig {
    site_code: String,
    document: Map<String, Value>,
}

impl ResolvedConfig {
    pub fn site_code(&self) -> &str {
        &self.site_code
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.document.get(name)
    }

    /// JSON pointer lookup, e.g. `/inventory/settings/address`.
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let mut segments = pointer.strip_prefix('/')?.splitn(2, '/');
        let head = self.document.get(segments.next()?)?;
        match segments.next() {
            Some(rest) => head.pointer(&format!("/{rest}")),
            None => Some(head),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.document
    }

    /// The configuration including secrets, for handing to the engine.
    pub fn to_value(&self) -> Value {
        Value::Object(self.document.clone())
    }

    /// Same structure with the inventory token and network password
    /// replaced by [`REDACTED`].
    pub fn sanitized(&self) -> Value {
        let mut document = self.document.clone();
        if let Some(token) = document
            .get_mut("inventory")
            .and_then(|inventory| inventory.get_mut("settings"))
            .and_then(|settings| settings.get_mut("token"))
        {
            *token = Value::String(REDACTED.to_string());
        }
        if let Some(password) = document
            .get_mut("network")
            .and_then(|network| network.get_mut("password"))
        {
            *password = Value::String(REDACTED.to_string());
        }
        Value::Object(document)
    }
}

impl fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("site_code", &self.site_code)
            .field("document", &self.sanitized())
            .finish()
    }
}

/// Resolves user payloads against a credential store.
#[derive(Clone)]
pub struct ConfigResolver {
    credentials: Arc<dyn CredentialStore>,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver").finish_non_exhaustive()
    }
}

impl ConfigResolver {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self { credentials }
    }

    /// Resolve `payload` for `site_code`. The payload itself is not modified.
    pub async fn resolve(
        &self,
        site_code: &str,
        payload: &Value,
    ) -> Result<ResolvedConfig, ConfigError> {
        let mut document = match payload {
            Value::Object(map) => map.clone(),
            _ => return Err(ConfigError::PayloadNotObject),
        };

        self.resolve_inventory(&mut document).await?;
        self.resolve_network(&mut document).await?;
        self.resolve_batfish(site_code, &mut document).await?;
        apply_main_defaults(&mut document)?;
        merge_drivers(&mut document)?;
        strip_reference_fields(&mut document);

        tracing::debug!(site_code, sections = document.len(), "configuration resolved");

        Ok(ResolvedConfig {
            site_code: site_code.to_string(),
            document,
        })
    }

    async fn resolve_inventory(&self, document: &mut Map<String, Value>) -> Result<(), ConfigError> {
        let (section, name) = reference(document, "inventory", "name")?;
        let creds = self
            .credentials
            .lookup_inventory(&name)
            .await
            .map_err(|source| ConfigError::InvalidReference {
                section: "inventory",
                key: "name",
                name: name.clone(),
                source,
            })?;

        if section.contains_key("settings") {
            return Err(ConfigError::Collision {
                field: "inventory.settings",
            });
        }
        section.insert(
            "settings".to_string(),
            json!({
                "address": creds.address,
                "token": creds.token,
                "verify_ssl": creds.verify_ssl,
            }),
        );
        Ok(())
    }

    async fn resolve_network(&self, document: &mut Map<String, Value>) -> Result<(), ConfigError> {
        let (section, name) = reference(document, "network", "credentials_name")?;
        let creds = self
            .credentials
            .lookup_network(&name)
            .await
            .map_err(|source| ConfigError::InvalidReference {
                section: "network",
                key: "credentials_name",
                name: name.clone(),
                source,
            })?;

        if section.contains_key("login") {
            return Err(ConfigError::Collision {
                field: "network.login",
            });
        }
        if section.contains_key("password") {
            return Err(ConfigError::Collision {
                field: "network.password",
            });
        }
        section.insert("login".to_string(), Value::String(creds.login));
        section.insert("password".to_string(), Value::String(creds.password));
        Ok(())
    }

    async fn resolve_batfish(
        &self,
        site_code: &str,
        document: &mut Map<String, Value>,
    ) -> Result<(), ConfigError> {
        let user = match document.remove("batfish") {
            // An absent section resolves like an empty one: the default
            // service, which must exist.
            None => Map::new(),
            Some(Value::String(name)) => {
                let mut section = Map::new();
                section.insert("name".to_string(), Value::String(name));
                section
            }
            Some(Value::Object(section)) => section,
            Some(_) => {
                let record = self.credentials.lookup_batfish(None).await?;
                let expanded = expand_batfish(site_code, Map::new(), &record);
                document.insert("batfish".to_string(), Value::Object(expanded));
                return Ok(());
            }
        };

        let name = match user.get("name") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) if name.is_empty() => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(ConfigError::InvalidKey {
                    section: "batfish",
                    key: "name",
                });
            }
        };

        let record = match name {
            Some(name) => self
                .credentials
                .lookup_batfish(Some(&name))
                .await
                .map_err(|source| ConfigError::InvalidReference {
                    section: "batfish",
                    key: "name",
                    name,
                    source,
                })?,
            None => self.credentials.lookup_batfish(None).await?,
        };

        let expanded = expand_batfish(site_code, user, &record);
        document.insert("batfish".to_string(), Value::Object(expanded));
        Ok(())
    }
}

/// Finds `document[section][key]`, requiring the section to be an object and
/// the key to be a string.
fn reference<'a>(
    document: &'a mut Map<String, Value>,
    section: &'static str,
    key: &'static str,
) -> Result<(&'a mut Map<String, Value>, String), ConfigError> {
    let object = match document.get_mut(section) {
        None => return Err(ConfigError::MissingSection { section }),
        Some(Value::Object(object)) => object,
        Some(_) => {
            return Err(ConfigError::NotAnObject {
                section: section.to_string(),
            });
        }
    };
    let name = match object.get(key) {
        None => return Err(ConfigError::MissingKey { section, key }),
        Some(Value::String(name)) => name.clone(),
        Some(_) => return Err(ConfigError::InvalidKey { section, key }),
    };
    Ok((object, name))
}

/// Record values fill fields the user left unset; names are generated last.
fn expand_batfish(
    site_code: &str,
    mut user: Map<String, Value>,
    record: &BatfishService,
) -> Map<String, Value> {
    let stored = [
        ("address", record.address.clone().map(Value::String)),
        ("port_v1", record.port_v1.map(Value::from)),
        ("port_v2", record.port_v2.map(Value::from)),
        ("use_ssl", record.use_ssl.map(Value::Bool)),
    ];
    for (field, value) in stored {
        if let Some(value) = value {
            user.entry(field).or_insert(value);
        }
    }

    if !user.contains_key("network_name") {
        let name = record
            .network_name
            .clone()
            .unwrap_or_else(|| batfish_network_name(site_code));
        user.insert("network_name".to_string(), Value::String(name));
    }
    if !user.contains_key("snapshot_name") {
        let name = record
            .snapshot_name
            .clone()
            .unwrap_or_else(batfish_snapshot_name);
        user.insert("snapshot_name".to_string(), Value::String(name));
    }
    user
}

fn apply_main_defaults(document: &mut Map<String, Value>) -> Result<(), ConfigError> {
    let main = document
        .entry("main")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(main) = main else {
        return Err(ConfigError::NotAnObject {
            section: "main".to_string(),
        });
    };
    for (key, value) in default_main_config() {
        main.entry(key).or_insert(value);
    }
    Ok(())
}

fn merge_drivers(document: &mut Map<String, Value>) -> Result<(), ConfigError> {
    let drivers = document
        .entry("drivers")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(drivers) = drivers else {
        return Err(ConfigError::NotAnObject {
            section: "drivers".to_string(),
        });
    };

    let user_mapping = match drivers.remove("mapping") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(mapping)) => mapping,
        Some(_) => {
            return Err(ConfigError::NotAnObject {
                section: "drivers.mapping".to_string(),
            });
        }
    };
    let mut mapping = default_drivers_mapping();
    mapping.extend(user_mapping);
    drivers.insert("mapping".to_string(), Value::Object(mapping));
    Ok(())
}

fn strip_reference_fields(document: &mut Map<String, Value>) {
    for (section, key) in [
        ("inventory", "name"),
        ("network", "credentials_name"),
        ("batfish", "name"),
    ] {
        if let Some(Value::Object(object)) = document.get_mut(section) {
            object.remove(key);
        }
    }
}
