use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Outbound transactional email. The flows only ever need one message shape:
/// a 6-digit code addressed to a recipient.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_code(&self, to: &str, name: &str, code: &str) -> anyhow::Result<()>;
}

/// Sends through an HTTP transactional-email API (Resend-style JSON POST).
pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send_code(&self, to: &str, name: &str, code: &str) -> anyhow::Result<()> {
        let greeting = if name.is_empty() { "there" } else { name };
        let body = json!({
            "from": self.from,
            "to": [to],
            "subject": "Your verification code",
            "text": format!(
                "Hi {greeting},\n\nYour verification code is {code}. \
                 It expires shortly, so use it soon.\n"
            ),
        });
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("email api request")?;
        if !resp.status().is_success() {
            anyhow::bail!("email api returned {}", resp.status());
        }
        info!(to = %to, "verification code dispatched");
        Ok(())
    }
}

/// Dev fallback when no email API is configured: the code only goes to the
/// logs.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_code(&self, to: &str, _name: &str, code: &str) -> anyhow::Result<()> {
        info!(to = %to, code = %code, "email api not configured, logging code instead");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every dispatch; can be flipped to fail to exercise the
    /// partial-success path (account persisted, user unreachable).
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingMailer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let mailer = Self::default();
            mailer.fail.store(true, std::sync::atomic::Ordering::SeqCst);
            mailer
        }

        pub fn last_code_for(&self, to: &str) -> Option<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(rcpt, _)| rcpt == to)
                .map(|(_, code)| code.clone())
        }
    }

    #[async_trait]
    impl EmailSender for RecordingMailer {
        async fn send_code(&self, to: &str, _name: &str, code: &str) -> anyhow::Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                anyhow::bail!("smtp relay unavailable");
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), code.to_string()));
            Ok(())
        }
    }
}
