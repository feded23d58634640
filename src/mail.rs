use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpPurpose {
    Activation,
    PasswordReset,
}

impl OtpPurpose {
    pub fn subject(&self) -> &'static str {
        match self {
            OtpPurpose::Activation => "Welcome to PcHub! Confirm your Email",
            OtpPurpose::PasswordReset => "Reset Your Password",
        }
    }
}

/// Delivers one-time codes to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_otp(
        &self,
        to_email: &str,
        to_name: &str,
        otp: &str,
        purpose: OtpPurpose,
    ) -> anyhow::Result<()>;
}

/// Local dev notifier that logs instead of sending mail.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_otp(
        &self,
        to_email: &str,
        to_name: &str,
        otp: &str,
        purpose: OtpPurpose,
    ) -> anyhow::Result<()> {
        info!(to_email, to_name, subject = purpose.subject(), "otp mail send stub");
        debug!(to_email, otp, "otp mail body");
        Ok(())
    }
}
