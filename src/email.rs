use axum::async_trait;
use tracing::info;

/// Outbound email delivery. Consumed as an external collaborator: failures
/// are logged by callers and never fail the parent operation.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_welcome(&self, to: &str, full_name: &str) -> anyhow::Result<()>;
    async fn send_password_reset(&self, to: &str, reset_token: &str) -> anyhow::Result<()>;
}

/// Logs outgoing mail instead of delivering it. Used until a real relay is
/// configured for the deployment.
#[derive(Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_welcome(&self, to: &str, full_name: &str) -> anyhow::Result<()> {
        info!(to = %to, full_name = %full_name, "welcome email queued");
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, _reset_token: &str) -> anyhow::Result<()> {
        // Token deliberately not logged.
        info!(to = %to, "password reset email queued");
        Ok(())
    }
}
