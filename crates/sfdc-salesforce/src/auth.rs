use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use sfdc_core::{Authenticator, Connection, Error, Result};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::client::read_json;
use crate::{SalesforceConfig, SalesforceConnection};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
    /// Identity URL of the authenticated user
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identity {
    username: String,
}

/// Builds a [`SalesforceConnection`] from configured credentials.
pub struct SalesforceAuthenticator {
    config: SalesforceConfig,
    http: Client,
}

impl SalesforceAuthenticator {
    pub fn new(config: SalesforceConfig) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Connection(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    async fn password_login(&self) -> Result<TokenResponse> {
        let login_url = parse_url(&self.config.login_url, "login URL")?;
        let token_url = login_url
            .join("/services/oauth2/token")
            .map_err(|e| Error::Configuration(format!("Invalid login URL: {}", e)))?;

        let client_id = self.config.client_id.as_deref().ok_or_else(|| {
            Error::Configuration("Password login requires a connected app client id".to_string())
        })?;
        let client_secret = self.config.client_secret.as_deref().ok_or_else(|| {
            Error::Configuration("Password login requires a connected app client secret".to_string())
        })?;
        let username = self.config.username.as_deref().unwrap_or_default();
        let password = format!(
            "{}{}",
            self.config.password.as_deref().unwrap_or_default(),
            self.config.security_token.as_deref().unwrap_or_default()
        );

        info!("Logging in to {} as {}", login_url, username);
        let response = self
            .http
            .post(token_url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("username", username),
                ("password", password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Connection(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let reason = match response.json::<TokenError>().await {
                Ok(e) => format!("{}: {}", e.error, e.error_description.unwrap_or_default()),
                Err(_) => status.to_string(),
            };
            return Err(Error::Authentication(format!("Login rejected ({})", reason)));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::Authentication(format!("Unexpected token response: {}", e)))
    }

    async fn log_identity(&self, identity_url: &str, access_token: &str) {
        let identity = match self.http.get(identity_url).bearer_auth(access_token).send().await {
            Ok(response) => read_json::<Identity>(response, "Identity").await,
            Err(e) => Err(Error::Connection(e.to_string())),
        };
        match identity {
            Ok(identity) => info!("Identity {}", identity.username),
            Err(e) => warn!("Identity lookup failed: {}", e),
        }
    }
}

fn parse_url(raw: &str, what: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Configuration(format!("Invalid {} '{}': {}", what, raw, e)))
}

#[async_trait]
impl Authenticator for SalesforceAuthenticator {
    async fn authenticate(&self) -> Result<Arc<dyn Connection>> {
        let (instance_url, access_token) = match (&self.config.instance_url, &self.config.access_token) {
            (Some(instance_url), Some(access_token)) => {
                info!("Using access token for {}", instance_url);
                (instance_url.clone(), access_token.clone())
            }
            _ => {
                let token = self.password_login().await?;
                if let Some(identity_url) = &token.id {
                    self.log_identity(identity_url, &token.access_token).await;
                }
                (token.instance_url, token.access_token)
            }
        };
        parse_url(&instance_url, "instance URL")?;

        Ok(Arc::new(SalesforceConnection::new(
            self.http.clone(),
            instance_url,
            access_token,
            self.config.api_version.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn password_config(server: &MockServer) -> SalesforceConfig {
        SalesforceConfig {
            username: Some("integration@example.com".into()),
            password: Some("hunter2".into()),
            security_token: Some("TOKEN".into()),
            client_id: Some("3MVG9".into()),
            client_secret: Some("s3cr3t".into()),
            login_url: server.uri(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        assert!(matches!(
            SalesforceAuthenticator::new(SalesforceConfig::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_access_token_skips_login() {
        let config = SalesforceConfig {
            instance_url: Some("https://acme.my.salesforce.com/".into()),
            access_token: Some("00Dtoken".into()),
            ..Default::default()
        };
        let connection = SalesforceAuthenticator::new(config)
            .unwrap()
            .authenticate()
            .await
            .unwrap();
        assert_eq!(connection.instance_url(), "https://acme.my.salesforce.com");
    }

    #[tokio::test]
    async fn test_password_flow_logs_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("password=hunter2TOKEN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "00Dfresh",
                "instance_url": server.uri(),
                "id": format!("{}/id/00Dx/005x", server.uri()),
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/id/00Dx/005x"))
            .and(header("authorization", "Bearer 00Dfresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "username": "integration@example.com"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connection = SalesforceAuthenticator::new(password_config(&server))
            .unwrap()
            .authenticate()
            .await
            .unwrap();
        assert_eq!(connection.instance_url(), server.uri());
    }

    #[tokio::test]
    async fn test_rejected_login_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "authentication failure"
            })))
            .mount(&server)
            .await;

        let err = SalesforceAuthenticator::new(password_config(&server))
            .unwrap()
            .authenticate()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Authentication(ref m) if m.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_password_flow_requires_client_credentials() {
        let server = MockServer::start().await;
        let config = SalesforceConfig {
            client_secret: None,
            ..password_config(&server)
        };

        let err = SalesforceAuthenticator::new(config)
            .unwrap()
            .authenticate()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
