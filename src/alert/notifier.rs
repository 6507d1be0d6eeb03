use std::time::Duration;

use anyhow::{anyhow, Context, Result};

pub const LINE_NOTIFY_URL: &str = "https://notify-api.line.me/api/notify";

/// One-shot push notification transport.
pub trait Notifier: Send {
    /// Send `message`. Any non-200 response is an error; callers log it.
    fn notify(&self, message: &str) -> Result<()>;
}

/// LINE Notify style endpoint: form-encoded `message`, bearer token auth.
pub struct LineNotifier {
    agent: ureq::Agent,
    url: String,
    token: String,
}

impl LineNotifier {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let token = token.into();
        url::Url::parse(&url).with_context(|| format!("invalid notify url {}", url))?;
        if token.trim().is_empty() {
            return Err(anyhow!("notify token must not be empty"));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { agent, url, token })
    }
}

impl Notifier for LineNotifier {
    fn notify(&self, message: &str) -> Result<()> {
        let response = self
            .agent
            .post(&self.url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .send_form(&[("message", message)]);
        match response {
            Ok(resp) if resp.status() == 200 => Ok(()),
            Ok(resp) => Err(anyhow!("notify endpoint returned status {}", resp.status())),
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("notify endpoint returned status {}", code))
            }
            Err(err) => Err(anyhow::Error::new(err).context("send notification")),
        }
    }
}
