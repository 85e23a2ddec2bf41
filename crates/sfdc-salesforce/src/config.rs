use serde::{Deserialize, Serialize};
use sfdc_core::{Error, Result};

pub const DEFAULT_API_VERSION: &str = "41.0";
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

/// Credentials and endpoints of the remote org.
///
/// Either a pre-issued `access_token` with its `instance_url`, or the
/// username/password OAuth flow through a connected app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SalesforceConfig {
    pub instance_url: Option<String>,
    pub access_token: Option<String>,

    pub username: Option<String>,
    pub password: Option<String>,
    /// Appended to the password when the org requires it
    pub security_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub login_url: String,

    pub api_version: String,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            instance_url: None,
            access_token: None,
            username: None,
            password: None,
            security_token: None,
            client_id: None,
            client_secret: None,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

impl SalesforceConfig {
    pub fn uses_access_token(&self) -> bool {
        self.access_token.is_some() && self.instance_url.is_some()
    }

    pub fn uses_password(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.uses_access_token() && !self.uses_password() {
            return Err(Error::Configuration(
                "Requires either an access token with its instance URL, or a username and password"
                    .to_string(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(Error::Configuration("API version must not be empty".to_string()));
        }
        Ok(())
    }
}
