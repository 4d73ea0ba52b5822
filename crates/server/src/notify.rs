//! Notification egress — best-effort webhook fired when a new unassigned
//! chat appears, so an external paging/alerting collaborator can nudge
//! idle admins. Not required for correctness: failures are logged and
//! dropped, never retried.

use reqwest::Client;
use tracing::{debug, warn};

use deskline_protocol::ChatSummary;

pub struct Notifier {
    url: String,
    client: Client,
}

impl Notifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: Client::new(),
        }
    }

    /// Fire the new-chat hook in the background. The caller never waits.
    pub fn chat_created(&self, chat: &ChatSummary) {
        let url = self.url.clone();
        let client = self.client.clone();
        let chat = chat.clone();

        tokio::spawn(async move {
            let result = client.post(&url).json(&chat).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(
                        component = "notify",
                        event = "notify.sent",
                        chat_id = %chat.id,
                        "New-chat notification delivered"
                    );
                }
                Ok(resp) => {
                    warn!(
                        component = "notify",
                        event = "notify.rejected",
                        chat_id = %chat.id,
                        status = %resp.status(),
                        "New-chat notification rejected"
                    );
                }
                Err(e) => {
                    warn!(
                        component = "notify",
                        event = "notify.failed",
                        chat_id = %chat.id,
                        error = %e,
                        "New-chat notification failed"
                    );
                }
            }
        });
    }
}
