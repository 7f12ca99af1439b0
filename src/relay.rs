use crate::{
    domain::{Endpoint, EndpointError, RelayRecord, RECORD_KEY},
    store::{self, Store},
};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::{trace, trace_span, Instrument};

/// Writes relayed records to the shared slot.
#[derive(Debug, Clone)]
pub struct RelayClient {
    store: Arc<dyn Store>,
}

impl RelayClient {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Replaces whatever the slot held. Nothing is written when the
    /// endpoint is empty.
    pub async fn publish(&self, endpoint: &str, record: &RelayRecord) -> Result<()> {
        let Self { store } = self;
        let s = trace_span!("publish", app = %record.app_name);

        async {
            let endpoint = Endpoint::parse(endpoint).context(UnusableEndpointSnafu)?;
            let value = serde_json::to_value(record).context(UnableToEncodeSnafu)?;

            store
                .overwrite(&endpoint, RECORD_KEY, value)
                .await
                .context(UnableToPublishSnafu)?;

            trace!("Published record");
            Ok(())
        }
        .instrument(s)
        .await
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Cannot relay the notification"))]
    UnusableEndpoint { source: EndpointError },

    UnableToEncode { source: serde_json::Error },

    #[snafu(display("Unable to relay the notification"))]
    UnableToPublish { source: store::Error },
}

impl Error {
    pub fn is_missing_endpoint(&self) -> bool {
        matches!(self, Self::UnusableEndpoint { source } if source.is_missing())
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;
