//! SMTP transmitter using lettre.

use async_trait::async_trait;
use lettre::{
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        PoolConfig,
    },
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use tracing::{error, info};

use super::{Transmit, TransmitError};
use crate::config::SmtpConfig;
use crate::pipeline::RenderedMessage;

/// SMTP relay client. TLS is mandatory: STARTTLS is required unless implicit
/// TLS is configured.
pub struct SmtpTransmitter {
    config: SmtpConfig,
}

impl SmtpTransmitter {
    /// Create a transmitter, checking that a transport can be built from the
    /// configuration.
    pub fn from_config(config: &SmtpConfig) -> Result<Self, TransmitError> {
        let transmitter = Self {
            config: config.clone(),
        };
        transmitter.transport()?;
        Ok(transmitter)
    }

    /// Build a transport whose pool holds a single connection, so one batch is
    /// one SMTP session.
    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransmitError> {
        let builder = if self.config.implicit_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
        }
        .map_err(|e| TransmitError::Config(e.to_string()))?;

        Ok(builder
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.user.clone(),
                self.config.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain])
            .timeout(Some(self.config.timeout))
            .pool_config(PoolConfig::new().min_idle(0).max_size(1))
            .build())
    }
}

#[async_trait]
impl Transmit for SmtpTransmitter {
    async fn transmit(&self, messages: &[RenderedMessage]) -> Result<(), TransmitError> {
        let transport = self.transport()?;

        for (index, message) in messages.iter().enumerate() {
            if let Err(e) = transport
                .send_raw(&message.envelope, &message.formatted)
                .await
            {
                error!(
                    host = %self.config.host,
                    index = index,
                    batch_len = messages.len(),
                    permanent = e.is_permanent(),
                    transient = e.is_transient(),
                    error = %e,
                    "smtp_send_failed"
                );
                return Err(TransmitError::Relay(e));
            }
        }

        info!(
            host = %self.config.host,
            messages = messages.len(),
            "smtp_batch_sent"
        );

        Ok(())
    }
}
