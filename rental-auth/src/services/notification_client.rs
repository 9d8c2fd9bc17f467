//! Outbound security notifications.
//!
//! Sends go through the notification-service over HTTP. Callers never wait on
//! them: [`NotificationDispatcher`] spawns each send and only logs failures.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use crate::config::NotificationServiceConfig;

#[async_trait]
pub trait SecurityNotifier: Send + Sync {
    async fn send_verification_email(
        &self,
        to_email: &str,
        verification_token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_security_notification(
        &self,
        to_email: &str,
        subject: &str,
        message: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_password_changed_notification(&self, to_email: &str)
        -> Result<(), anyhow::Error>;
}

#[derive(Serialize)]
struct EmailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    body_text: &'a str,
    body_html: &'a str,
    source: &'static str,
}

/// HTTP client for the notification-service.
#[derive(Clone)]
pub struct NotificationClient {
    http: reqwest::Client,
    endpoint: String,
}

impl NotificationClient {
    pub fn new(config: &NotificationServiceConfig) -> Result<Self, anyhow::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        tracing::info!(endpoint = %config.url, "Notification client configured");
        Ok(Self {
            http,
            endpoint: format!("{}/notifications/email", config.url.trim_end_matches('/')),
        })
    }

    #[instrument(skip(self, body_text, body_html), fields(to = %to, subject = %subject))]
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        body_text: &str,
        body_html: &str,
    ) -> Result<(), anyhow::Error> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&EmailRequest {
                to,
                subject,
                body_text,
                body_html,
                source: "rental-auth",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("notification service responded with {}", status);
        }
        tracing::info!("Email queued via notification service");
        Ok(())
    }
}

fn action_email(heading: &str, intro: &str, link: &str, label: &str, expiry: &str) -> (String, String) {
    let html = format!(
        r###"<html>
            <body style="font-family: Arial, sans-serif;">
                <h2>{heading}</h2>
                <p>{intro}</p>
                <p><a href="{link}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">{label}</a></p>
                <p style="color: #666; font-size: 12px;">This link will expire in {expiry}. If you didn't request this, please ignore this email.</p>
            </body>
        </html>"###
    );
    let text = format!(
        "{heading}\n\n{intro}\n\n{link}\n\nThis link will expire in {expiry}. If you didn't request this, please ignore this email."
    );
    (text, html)
}

#[async_trait]
impl SecurityNotifier for NotificationClient {
    async fn send_verification_email(
        &self,
        to_email: &str,
        verification_token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error> {
        let link = format!("{}/auth/verify-email/{}", base_url, verification_token);
        let (text, html) = action_email(
            "Welcome! Please verify your email",
            "Thank you for registering. Please open the link below to verify your email address:",
            &link,
            "Verify Email",
            "24 hours",
        );
        self.send_email(to_email, "Verify Your Email Address", &text, &html)
            .await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_token: &str,
        base_url: &str,
    ) -> Result<(), anyhow::Error> {
        let link = format!("{}/auth/reset-password/{}", base_url, reset_token);
        let (text, html) = action_email(
            "Password Reset Request",
            "We received a request to reset your password. Open the link below to set a new password:",
            &link,
            "Reset Password",
            "1 hour",
        );
        self.send_email(to_email, "Reset Your Password", &text, &html)
            .await
    }

    async fn send_security_notification(
        &self,
        to_email: &str,
        subject: &str,
        message: &str,
    ) -> Result<(), anyhow::Error> {
        let html = format!(
            r#"<html><body style="font-family: Arial, sans-serif;"><h2>{subject}</h2><p>{message}</p></body></html>"#
        );
        self.send_email(to_email, subject, message, &html).await
    }

    async fn send_password_changed_notification(
        &self,
        to_email: &str,
    ) -> Result<(), anyhow::Error> {
        self.send_security_notification(
            to_email,
            "Your password was changed",
            "The password for your account was just changed and all other sessions were signed out. \
             If this wasn't you, reset your password immediately.",
        )
        .await
    }
}

/// Notifier that drops everything, for deployments without a notification service.
#[derive(Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl SecurityNotifier for NoopNotifier {
    async fn send_verification_email(&self, to: &str, _: &str, _: &str) -> Result<(), anyhow::Error> {
        tracing::debug!(to, "Notifications disabled; verification email dropped");
        Ok(())
    }

    async fn send_password_reset_email(&self, to: &str, _: &str, _: &str) -> Result<(), anyhow::Error> {
        tracing::debug!(to, "Notifications disabled; reset email dropped");
        Ok(())
    }

    async fn send_security_notification(&self, to: &str, _: &str, _: &str) -> Result<(), anyhow::Error> {
        tracing::debug!(to, "Notifications disabled; security notification dropped");
        Ok(())
    }

    async fn send_password_changed_notification(&self, to: &str) -> Result<(), anyhow::Error> {
        tracing::debug!(to, "Notifications disabled; password change notice dropped");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotification {
    Verification { to: String, token: String },
    PasswordReset { to: String, token: String },
    Security { to: String, subject: String },
    PasswordChanged { to: String },
}

/// Keeps every send in memory so tests can pick tokens out of "emails".
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    fn push(&self, n: SentNotification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(n);
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_verification_token(&self, email: &str) -> Option<String> {
        self.sent().into_iter().rev().find_map(|n| match n {
            SentNotification::Verification { to, token } if to == email => Some(token),
            _ => None,
        })
    }

    pub fn last_reset_token(&self, email: &str) -> Option<String> {
        self.sent().into_iter().rev().find_map(|n| match n {
            SentNotification::PasswordReset { to, token } if to == email => Some(token),
            _ => None,
        })
    }
}

#[async_trait]
impl SecurityNotifier for RecordingNotifier {
    async fn send_verification_email(&self, to: &str, token: &str, _: &str) -> Result<(), anyhow::Error> {
        self.push(SentNotification::Verification {
            to: to.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset_email(&self, to: &str, token: &str, _: &str) -> Result<(), anyhow::Error> {
        self.push(SentNotification::PasswordReset {
            to: to.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }

    async fn send_security_notification(&self, to: &str, subject: &str, _: &str) -> Result<(), anyhow::Error> {
        self.push(SentNotification::Security {
            to: to.to_string(),
            subject: subject.to_string(),
        });
        Ok(())
    }

    async fn send_password_changed_notification(&self, to: &str) -> Result<(), anyhow::Error> {
        self.push(SentNotification::PasswordChanged { to: to.to_string() });
        Ok(())
    }
}

/// Outbound notification kinds the engine fires.
#[derive(Debug, Clone)]
pub enum Notification {
    Verification { to: String, token: String },
    PasswordReset { to: String, token: String },
    Security { to: String, subject: String, message: String },
    PasswordChanged { to: String },
}

/// Fire-and-forget wrapper: each send runs on its own task and a failure is
/// only logged.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn SecurityNotifier>,
    base_url: String,
    tasks: TaskTracker,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn SecurityNotifier>, base_url: impl Into<String>) -> Self {
        Self {
            notifier,
            base_url: base_url.into(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn dispatch(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        let base_url = self.base_url.clone();
        self.tasks.spawn(async move {
            let (kind, result) = match &notification {
                Notification::Verification { to, token } => (
                    "verification",
                    notifier.send_verification_email(to, token, &base_url).await,
                ),
                Notification::PasswordReset { to, token } => (
                    "password_reset",
                    notifier.send_password_reset_email(to, token, &base_url).await,
                ),
                Notification::Security { to, subject, message } => (
                    "security",
                    notifier.send_security_notification(to, subject, message).await,
                ),
                Notification::PasswordChanged { to } => (
                    "password_changed",
                    notifier.send_password_changed_notification(to).await,
                ),
            };
            if let Err(e) = result {
                tracing::warn!(kind, error = %e, "Failed to send notification");
            }
        });
    }

    /// Wait for in-flight sends. Used at shutdown and in tests.
    pub async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
