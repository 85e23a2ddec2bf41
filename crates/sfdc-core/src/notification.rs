use crate::Result;
use async_trait::async_trait;
use std::env;

/// Trait for sending notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send error notification when a run ends in failure
    async fn send_error_notification(&self, run_name: &str, error_details: &str) -> Result<()>;
}

/// Email notifier using SMTP
pub struct EmailNotifier {
    smtp_host: String,
    smtp_port: u16,
    smtp_username: String,
    smtp_password: String,
    from_email: String,
    to_emails: Vec<String>,
}

impl EmailNotifier {
    /// Create email notifier from environment variables
    ///
    /// Required environment variables:
    /// - SMTP_HOST, SMTP_PORT
    /// - SMTP_USERNAME, SMTP_PASSWORD
    /// - SMTP_FROM_EMAIL
    /// - SMTP_TO_EMAILS: Comma-separated list of recipient emails
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            env::var(name).map_err(|_| crate::Error::Configuration(format!("{} not set", name)))
        };

        let smtp_port = var("SMTP_PORT")?.parse::<u16>().map_err(|_| {
            crate::Error::Configuration("SMTP_PORT must be a valid port number".to_string())
        })?;

        let to_emails = parse_recipients(&var("SMTP_TO_EMAILS")?);
        if to_emails.is_empty() {
            return Err(crate::Error::Configuration(
                "SMTP_TO_EMAILS must contain at least one email".to_string(),
            ));
        }

        Ok(Self {
            smtp_host: var("SMTP_HOST")?,
            smtp_port,
            smtp_username: var("SMTP_USERNAME")?,
            smtp_password: var("SMTP_PASSWORD")?,
            from_email: var("SMTP_FROM_EMAIL")?,
            to_emails,
        })
    }

    /// Create email notifier with explicit configuration
    pub fn new(
        smtp_host: String,
        smtp_port: u16,
        smtp_username: String,
        smtp_password: String,
        from_email: String,
        to_emails: Vec<String>,
    ) -> Self {
        Self {
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            from_email,
            to_emails,
        }
    }
}

fn parse_recipients(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn failure_body(run_name: &str, error_details: &str) -> String {
    format!(
        r#"
Salesforce Data Connector Failure
=================================

Run: {}
Status: FAILED

Error Details:
{}

Timestamp: {}

Action Required:
- Check Salesforce credentials and session validity
- Check checkpoint store and plugin connectivity
- Restart the connector after fixing the issue; change events resume
  from the last saved checkpoint

This is an automated notification from the Salesforce Data Connector.
"#,
        run_name,
        error_details,
        chrono::Utc::now().to_rfc3339()
    )
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_error_notification(&self, run_name: &str, error_details: &str) -> Result<()> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let subject = format!("[Salesforce Connector] Run '{}' failed", run_name);
        let body = failure_body(run_name, error_details);

        let creds = Credentials::new(self.smtp_username.clone(), self.smtp_password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.smtp_host)
            .map_err(|e| {
                crate::Error::Connection(format!("Failed to create SMTP transport: {}", e))
            })?
            .port(self.smtp_port)
            .credentials(creds)
            .build();

        for to_email in &self.to_emails {
            let email = Message::builder()
                .from(self.from_email.parse().map_err(|e| {
                    crate::Error::Configuration(format!("Invalid from email: {}", e))
                })?)
                .to(to_email.parse().map_err(|e| {
                    crate::Error::Configuration(format!("Invalid to email '{}': {}", to_email, e))
                })?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())
                .map_err(|e| {
                    crate::Error::Configuration(format!("Failed to build email: {}", e))
                })?;

            mailer.send(email).await.map_err(|e| {
                crate::Error::Connection(format!("Failed to send email to {}: {}", to_email, e))
            })?;

            tracing::info!("Failure notification email sent to {}", to_email);
        }

        Ok(())
    }
}

/// No-op notifier for when email is not configured
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn send_error_notification(&self, run_name: &str, error_details: &str) -> Result<()> {
        tracing::warn!(
            "Email notification not configured. Run '{}' error: {}",
            run_name,
            error_details
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipients_parsed() {
        assert_eq!(
            parse_recipients("ops@example.com, ,dev@example.com"),
            vec!["ops@example.com", "dev@example.com"]
        );
    }

    #[test]
    fn test_body_mentions_run_and_error() {
        let body = failure_body("run 42", "Authentication error: session expired");
        assert!(body.contains("run 42"));
        assert!(body.contains("session expired"));
    }
}
