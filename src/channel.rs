//! Logical channel addressing.

use serde::{Deserialize, Serialize};

/// A logical addressable real-time endpoint, e.g. `"notifications"` or
/// `"chat:42"`.
///
/// The `url_template` may contain a `{channel}` placeholder that is
/// substituted at dial time, so one template serves every chat thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Stable identifier for the session's lifetime.
    pub channel_id: String,
    /// Transport URL or URL template.
    pub url_template: String,
}

impl ChannelSpec {
    pub fn new(channel_id: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            url_template: url_template.into(),
        }
    }

    /// The concrete dial URL for this channel.
    pub fn resolve_url(&self) -> String {
        self.url_template.replace("{channel}", &self.channel_id)
    }
}
