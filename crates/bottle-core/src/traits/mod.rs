//! Trait seams between the mailbox core and its outside collaborators.

use async_trait::async_trait;

use crate::error::Result;

/// Outbound mail transport: `send(from, to, subject, body)`.
///
/// Implementations may block on the network; callers bound the call with a
/// timeout.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &str;

    async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()>;
}
