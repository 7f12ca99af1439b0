use async_trait::async_trait;
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use std::fmt;
use tracing::{trace, trace_span, Instrument};
use url::Url;

/// Sends text messages from the device. Whether the device is allowed to
/// do so is settled before this is ever called.
#[async_trait]
pub trait Messenger: fmt::Debug + Send + Sync {
    async fn send(&self, destination: &str, body: &str) -> Result<(), SendError>;
}

/// A gateway that accepts `to` and `message` as a form post.
#[derive(Debug, Clone)]
pub struct SmsGateway {
    client: reqwest::Client,
    url: Url,
}

impl SmsGateway {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Messenger for SmsGateway {
    async fn send(&self, destination: &str, body: &str) -> Result<(), SendError> {
        let Self { client, url } = self;
        let s = trace_span!("send_sms");

        #[derive(Debug, Serialize)]
        struct SendParams<'a> {
            to: &'a str,
            message: &'a str,
        }

        async {
            trace!("Sending message");

            client
                .post(url.clone())
                .form(&SendParams {
                    to: destination,
                    message: body,
                })
                .send()
                .await
                .context(UnableToSendSnafu)?
                .error_for_status()
                .context(GatewayRejectedSnafu)?;

            Ok(())
        }
        .instrument(s)
        .await
    }
}

#[derive(Debug, Snafu)]
pub enum SendError {
    #[snafu(display("Unable to reach the SMS gateway"))]
    UnableToSend { source: reqwest::Error },

    #[snafu(display("The SMS gateway refused the message"))]
    GatewayRejected { source: reqwest::Error },
}

#[cfg(test)]
pub use outbox::Outbox;
