use crate::{
    domain::{Endpoint, EndpointError, RelayRecord, RECORD_KEY},
    store::{self, Store},
};
use futures::{future::RemoteHandle, FutureExt, StreamExt};
use snafu::{ResultExt, Snafu};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time;
use tracing::{error, info, trace, trace_span, warn, Instrument};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum GateState {
    AwaitingFirst,
    Live,
}

/// Drops the first delivery of a subscription. That delivery is
/// whatever the slot already held, not something that just happened.
#[derive(Debug)]
pub struct SuppressionGate {
    state: GateState,
}

impl SuppressionGate {
    pub fn new() -> Self {
        Self {
            state: GateState::AwaitingFirst,
        }
    }

    pub fn admit<T>(&mut self, delivery: T) -> Option<T> {
        match self.state {
            GateState::AwaitingFirst => {
                self.state = GateState::Live;
                None
            }
            GateState::Live => Some(delivery),
        }
    }
}

impl Default for SuppressionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Dropping it stops further callbacks, including
/// one for a delivery that is already in flight.
#[derive(Debug)]
pub struct Subscription {
    active: Arc<AtomicBool>,
    _work: RemoteHandle<()>,
}

impl Subscription {
    /// False once the session has ended, whether it was dropped or the
    /// store stopped delivering.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct RelayListener {
    store: Arc<dyn Store>,
}

impl RelayListener {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Calls `on_change` for every complete record written after the
    /// subscription starts. The store is contacted from the session
    /// task, so this returns before the stream is open.
    pub fn subscribe<F, Fut>(&self, endpoint: &str, on_change: F) -> Result<Subscription>
    where
        F: FnMut(RelayRecord) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let endpoint = Endpoint::parse(endpoint).context(UnusableEndpointSnafu)?;

        let active = Arc::new(AtomicBool::new(true));
        let s = trace_span!("listen", endpoint = %endpoint);

        let (work, handle) = listen(self.store.clone(), endpoint, active.clone(), on_change)
            .instrument(s)
            .remote_handle();
        tokio::spawn(work);

        Ok(Subscription {
            active,
            _work: handle,
        })
    }
}

async fn listen<F, Fut>(
    store: Arc<dyn Store>,
    endpoint: Endpoint,
    active: Arc<AtomicBool>,
    on_change: F,
) where
    F: FnMut(RelayRecord) -> Fut,
    Fut: Future<Output = ()>,
{
    if let Err(e) = session(&*store, &endpoint, &active, on_change).await {
        error!("Subscription failed: {}", e);
    }

    active.store(false, Ordering::SeqCst);
}

async fn session<F, Fut>(
    store: &dyn Store,
    endpoint: &Endpoint,
    active: &AtomicBool,
    mut on_change: F,
) -> Result<()>
where
    F: FnMut(RelayRecord) -> Fut,
    Fut: Future<Output = ()>,
{
    let deliveries = store
        .subscribe(endpoint, RECORD_KEY)
        .await
        .context(SubscriptionFailedSnafu)?;

    info!("Receiver active and listening");

    let mut deliveries = deliveries.fuse();
    let mut heartbeat =
        time::interval_at(time::Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL);
    let mut gate = SuppressionGate::new();

    loop {
        let delivery = tokio::select! {
            delivery = deliveries.next() => delivery,
            _ = heartbeat.tick() => {
                info!("Receiver active and listening");
                continue;
            }
        };

        let value = match delivery {
            Some(delivery) => delivery.context(SubscriptionFailedSnafu)?,
            None => {
                warn!("Subscription ended");
                return Ok(());
            }
        };

        let value = match gate.admit(value) {
            Some(value) => value,
            None => {
                trace!("Suppressed the initial snapshot");
                continue;
            }
        };

        if !active.load(Ordering::SeqCst) {
            trace!("Dropping a delivery for a cancelled subscription");
            return Ok(());
        }

        match RelayRecord::decode(value) {
            Some(record) => on_change(record).await,
            None => trace!("Skipping an incomplete record"),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Cannot listen for notifications"))]
    UnusableEndpoint { source: EndpointError },

    #[snafu(display("Unable to listen for notifications: {}", source))]
    SubscriptionFailed { source: store::Error },
}

impl Error {
    pub fn is_missing_endpoint(&self) -> bool {
        matches!(self, Self::UnusableEndpoint { source } if source.is_missing())
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;
