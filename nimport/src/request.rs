use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::JobMode;

pub const SITE_MAX_LEN: usize = 50;

/// Rejected before any job is created.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("Site code cannot be empty")]
    EmptySite,
    #[error("Ensure site has no more than {SITE_MAX_LEN} characters (it has {0})")]
    SiteTooLong(usize),
    #[error("\"{0}\" is not a valid choice for mode")]
    InvalidMode(String),
    #[error("settings must be a dictionary")]
    SettingsNotObject,
    #[error("settings.{0} is required")]
    MissingSetting(&'static str),
}

/// An import request as submitted by a client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportRequest {
    pub site: String,
    pub mode: String,
    pub settings: Value,
}

/// A request that passed validation.
#[derive(Clone, Debug)]
pub struct ValidatedRequest {
    pub site_code: String,
    pub mode: JobMode,
    pub settings: Value,
}

impl ImportRequest {
    pub fn new(site: impl Into<String>, mode: JobMode, settings: Value) -> Self {
        Self {
            site: site.into(),
            mode: mode.as_str().to_string(),
            settings,
        }
    }

    /// Trim the site code and check the settings carry the credential
    /// references resolution needs.
    pub fn validate(self) -> Result<ValidatedRequest, RequestError> {
        let site_code = self.site.trim();
        if site_code.is_empty() {
            return Err(RequestError::EmptySite);
        }
        let len = site_code.chars().count();
        if len > SITE_MAX_LEN {
            return Err(RequestError::SiteTooLong(len));
        }

        let mode = self
            .mode
            .parse::<JobMode>()
            .map_err(|_| RequestError::InvalidMode(self.mode.clone()))?;

        let settings = self
            .settings
            .as_object()
            .ok_or(RequestError::SettingsNotObject)?;
        require(settings, "inventory", "name", "inventory.name")?;
        require(settings, "network", "credentials_name", "network.credentials_name")?;

        Ok(ValidatedRequest {
            site_code: site_code.to_string(),
            mode,
            settings: self.settings,
        })
    }
}

fn require(
    settings: &serde_json::Map<String, Value>,
    section: &'static str,
    key: &str,
    path: &'static str,
) -> Result<(), RequestError> {
    let section_value = settings
        .get(section)
        .ok_or(RequestError::MissingSetting(section))?;
    match section_value.get(key) {
        Some(_) => Ok(()),
        None => Err(RequestError::MissingSetting(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> Value {
        json!({
            "inventory": { "name": "nautobot-prod" },
            "network": { "credentials_name": "lab" },
        })
    }

    #[test]
    fn test_valid_request_is_trimmed() {
        let request = ImportRequest {
            site: "  hq-01 ".into(),
            mode: "check".into(),
            settings: settings(),
        };
        let validated = request.validate().unwrap();
        assert_eq!(validated.site_code, "hq-01");
        assert_eq!(validated.mode, JobMode::Check);
    }

    #[test]
    fn test_site_rules() {
        let blank = ImportRequest::new("   ", JobMode::Apply, settings());
        assert_eq!(blank.validate().unwrap_err(), RequestError::EmptySite);

        let long = ImportRequest::new("x".repeat(51), JobMode::Apply, settings());
        assert_eq!(long.validate().unwrap_err(), RequestError::SiteTooLong(51));

        let exact = ImportRequest::new("x".repeat(50), JobMode::Apply, settings());
        assert!(exact.validate().is_ok());
    }

    #[test]
    fn test_mode_must_be_known() {
        let request = ImportRequest {
            site: "hq".into(),
            mode: "dry-run".into(),
            settings: settings(),
        };
        assert_eq!(
            request.validate().unwrap_err(),
            RequestError::InvalidMode("dry-run".into())
        );
    }

    #[test]
    fn test_missing_settings_are_named() {
        let cases = [
            (json!([]), "settings must be a dictionary"),
            (json!({ "network": { "credentials_name": "lab" } }), "settings.inventory is required"),
            (
                json!({ "inventory": {}, "network": { "credentials_name": "lab" } }),
                "settings.inventory.name is required",
            ),
            (json!({ "inventory": { "name": "n" } }), "settings.network is required"),
            (
                json!({ "inventory": { "name": "n" }, "network": { "login": "x" } }),
                "settings.network.credentials_name is required",
            ),
        ];
        for (settings, message) in cases {
            let err = ImportRequest::new("hq", JobMode::Check, settings)
                .validate()
                .unwrap_err();
            assert_eq!(err.to_string(), message);
        }
    }
}
