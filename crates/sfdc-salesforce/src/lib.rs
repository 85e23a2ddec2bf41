mod auth;
mod client;
mod config;
mod streaming;

pub use auth::SalesforceAuthenticator;
pub use client::{map_batch_state, SalesforceConnection};
pub use config::{SalesforceConfig, DEFAULT_API_VERSION, DEFAULT_LOGIN_URL};
