use crate::domain::Endpoint;
use async_trait::async_trait;
use futures::stream::BoxStream;
use snafu::Snafu;
use std::fmt;

pub use firebase::Firebase;

mod firebase;
#[cfg(test)]
mod memory;
mod sse;

#[cfg(test)]
pub use memory::Memory;

/// Each item is the whole value of the watched key, `None` when absent.
pub type Delivery = Result<Option<serde_json::Value>>;

pub type Deliveries = BoxStream<'static, Delivery>;

/// A shared key-value store with live subscriptions.
///
/// Subscribing yields the current value first and then one item per
/// committed write, in commit order. Writes replace the value outright.
#[async_trait]
pub trait Store: fmt::Debug + Send + Sync {
    async fn overwrite(&self, endpoint: &Endpoint, key: &str, value: serde_json::Value)
        -> Result<()>;

    async fn subscribe(&self, endpoint: &Endpoint, key: &str) -> Result<Deliveries>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to write to {}", url))]
    UnableToWrite { source: reqwest::Error, url: String },

    #[snafu(display("The database refused the write to {}", url))]
    WriteRejected { source: reqwest::Error, url: String },

    #[snafu(display("Unable to subscribe to {}", url))]
    UnableToSubscribe { source: reqwest::Error, url: String },

    #[snafu(display("The database refused the subscription to {}", url))]
    SubscriptionRejected { source: reqwest::Error, url: String },

    #[snafu(display("The event stream failed"))]
    StreamFailed { source: reqwest::Error },

    #[snafu(display("The event stream ended"))]
    StreamEnded,

    #[snafu(display("The database cancelled the subscription: {}", reason))]
    SubscriptionCancelled { reason: String },

    #[snafu(display("The database revoked the subscription's credentials"))]
    AuthRevoked,

    #[snafu(display("The database sent an unreadable {} event", event))]
    InvalidEvent {
        source: serde_json::Error,
        event: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
