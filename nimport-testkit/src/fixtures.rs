//! Credential records, secrets and payloads shared by the tests.

use std::sync::Arc;

use nimport::*;
use serde_json::{Value, json};

pub const SITE: &str = "hq-01";
pub const INVENTORY_NAME: &str = "nautobot-prod";
pub const INVENTORY_ADDRESS: &str = "https://nautobot.example.net";
pub const INVENTORY_TOKEN: &str = "inv-t0ken-s3cret";
pub const NETWORK_CREDS: &str = "lab-devices";
pub const NETWORK_LOGIN: &str = "netops";
pub const NETWORK_PASSWORD: &str = "dev1ce-pa55-s3cret";
pub const BATFISH_NAME: &str = "batfish-main";
pub const BATFISH_ADDRESS: &str = "batfish.example.net";

pub fn secrets() -> MapSecrets {
    MapSecrets::new()
        .with_inventory_token(INVENTORY_NAME, INVENTORY_TOKEN)
        .with_network_login(NETWORK_CREDS, NETWORK_LOGIN, NETWORK_PASSWORD)
}

pub fn batfish_service() -> BatfishService {
    BatfishService {
        address: Some(BATFISH_ADDRESS.to_string()),
        port_v1: Some(9997),
        port_v2: Some(9996),
        use_ssl: Some(false),
        ..BatfishService::new(BATFISH_NAME)
    }
}

/// Inventory, network and batfish records, all with their secrets set.
pub fn credential_store() -> Arc<RegistryCredentialStore<MapSecrets>> {
    let store = credential_store_without_batfish();
    store
        .register_batfish(batfish_service())
        .expect("fixture batfish record is valid");
    store
}

/// Inventory and network records only.
pub fn credential_store_without_batfish() -> Arc<RegistryCredentialStore<MapSecrets>> {
    let store = RegistryCredentialStore::new(secrets());
    store.register_inventory(InventorySetting {
        name: INVENTORY_NAME.to_string(),
        address: INVENTORY_ADDRESS.to_string(),
        verify_ssl: true,
    });
    store.register_network(NetworkCredentialRef {
        name: NETWORK_CREDS.to_string(),
        description: Some("lab device login".to_string()),
    });
    Arc::new(store)
}

/// Settings naming the fixture records.
pub fn settings() -> Value {
    json!({
        "inventory": { "name": INVENTORY_NAME },
        "network": { "credentials_name": NETWORK_CREDS },
        "batfish": { "name": BATFISH_NAME },
    })
}

pub fn request(mode: JobMode) -> ImportRequest {
    ImportRequest::new(SITE, mode, settings())
}

/// A pending job stored with the fixture settings.
pub fn job(mode: JobMode) -> ImportJob {
    ImportJob::new(SITE, mode, settings())
}

/// Every secret value the fixtures hold.
pub fn secret_values() -> [&'static str; 2] {
    [INVENTORY_TOKEN, NETWORK_PASSWORD]
}
