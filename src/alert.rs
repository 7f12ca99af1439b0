use crate::{domain::Alert, pushover};
use async_trait::async_trait;
use snafu::{ResultExt, Snafu};
use std::fmt;
use tracing::info;

/// Where relayed notifications are shown to the local user. Each alert
/// arrives with its own id and must not replace an earlier one.
#[async_trait]
pub trait Alerter: fmt::Debug + Send + Sync {
    async fn show(&self, alert: &Alert) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct Console;

#[async_trait]
impl Alerter for Console {
    async fn show(&self, alert: &Alert) -> Result<()> {
        let Alert {
            id,
            title,
            body,
            source,
        } = alert;

        info!(id = id.0, %source, "Showing alert");
        println!("[{}] {}\n    {}", id.0, title, body);

        Ok(())
    }
}

#[async_trait]
impl Alerter for pushover::Client {
    async fn show(&self, alert: &Alert) -> Result<()> {
        self.notify(alert).await.context(UnableToPushSnafu)
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unable to push the alert"))]
    UnableToPush { source: pushover::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
pub use recorder::Recorder;
