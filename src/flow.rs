use crate::{
    alert::{self, Alerter},
    domain::{Alert, AlertId, CapturedNotification, RelayRecord, RingingCall, Role, Timestamp},
    filter::{self, RelayDecision},
    mode::{self, ModeHandle},
    relay::{self, RelayClient},
    sms::Messenger,
};
use snafu::{ResultExt, Snafu};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{info, trace, warn};

pub const CALL_ALERT_APP: &str = "Phone (Auto-Replied)";
pub const CALL_ALERT_TITLE: &str = "Incoming Call";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Relayed,
    Rejected,
    NotSender,
}

/// Captured notification → filter → shared slot.
#[derive(Debug, Clone)]
pub struct NotifyFlow {
    mode: ModeHandle,
    relay: RelayClient,
}

impl NotifyFlow {
    pub fn new(mode: ModeHandle, relay: RelayClient) -> Self {
        Self { mode, relay }
    }

    pub async fn notify(&mut self, notification: CapturedNotification) -> Result<Outcome> {
        let Self { mode, relay } = self;

        let mode = mode.mode().await.context(ModeUnavailableSnafu)?;
        if mode.role != Role::Sender {
            return Ok(Outcome::NotSender);
        }

        let event = match filter::classify(&notification) {
            RelayDecision::Accept(event) => event,
            RelayDecision::Reject => {
                trace!("Ignoring notification from {}", notification.source_app);
                return Ok(Outcome::Rejected);
            }
        };

        info!("Relaying notification from {}", event.source_app);

        let record = RelayRecord::from(event);
        relay
            .publish(&mode.endpoint, &record)
            .await
            .context(UnableToRelaySnafu)?;

        Ok(Outcome::Relayed)
    }
}

/// Ringing call → auto-reply text → call alert in the shared slot.
#[derive(Debug, Clone)]
pub struct CallFlow {
    mode: ModeHandle,
    relay: RelayClient,
    messenger: Option<Arc<dyn Messenger>>,
    auto_reply: Arc<str>,
}

impl CallFlow {
    pub fn new(
        mode: ModeHandle,
        relay: RelayClient,
        messenger: Option<Arc<dyn Messenger>>,
        auto_reply: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            mode,
            relay,
            messenger,
            auto_reply: auto_reply.into(),
        }
    }

    pub async fn ringing(&mut self, call: RingingCall) -> Result<Outcome> {
        let Self {
            mode,
            relay,
            messenger,
            auto_reply,
        } = self;

        let mode = mode.mode().await.context(ModeUnavailableSnafu)?;
        if mode.role != Role::Sender {
            return Ok(Outcome::NotSender);
        }

        let number = call.phone_number;
        info!("Incoming call from {}", number);

        let replied = match messenger {
            Some(messenger) => match messenger.send(&number, &**auto_reply).await {
                Ok(()) => {
                    info!("Auto-reply sent to {}", number);
                    Some(true)
                }
                Err(e) => {
                    warn!("Auto-reply to {} failed: {}", number, e);
                    Some(false)
                }
            },
            None => None,
        };

        // Remote alerting is optional for calls
        if mode.endpoint.trim().is_empty() {
            return Ok(Outcome::Rejected);
        }

        let text = match replied {
            Some(true) => format!("Call from {}. Auto-reply SMS sent.", number),
            Some(false) => format!("Call from {}. Auto-reply SMS failed.", number),
            None => format!("Call from {}.", number),
        };

        let record = RelayRecord {
            app_name: CALL_ALERT_APP.into(),
            title: CALL_ALERT_TITLE.into(),
            text,
            timestamp: Timestamp::now(),
        };
        relay
            .publish(&mode.endpoint, &record)
            .await
            .context(UnableToRelaySnafu)?;

        Ok(Outcome::Relayed)
    }
}

/// Relayed record → local alert.
#[derive(Debug, Clone)]
pub struct ForwardFlow {
    alerter: Arc<dyn Alerter>,
    next_id: Arc<AtomicU64>,
}

impl ForwardFlow {
    pub fn new(alerter: Arc<dyn Alerter>) -> Self {
        Self {
            alerter,
            next_id: Arc::new(AtomicU64::new(Timestamp::now().0)),
        }
    }

    pub async fn forward(&self, record: RelayRecord) -> Result<()> {
        let Self { alerter, next_id } = self;

        let RelayRecord {
            app_name,
            title,
            text,
            ..
        } = record;

        let alert = Alert {
            id: AlertId(next_id.fetch_add(1, Ordering::SeqCst)),
            title: format!("Forwarded: {}", title),
            body: text,
            source: app_name,
        };

        alerter.show(&alert).await.context(UnableToShowSnafu)
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    UnableToRelay { source: relay::Error },

    UnableToShow { source: alert::Error },

    ModeUnavailable { source: mode::Error },
}

impl Error {
    pub fn is_missing_endpoint(&self) -> bool {
        matches!(self, Self::UnableToRelay { source } if source.is_missing_endpoint())
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        alert::Recorder,
        domain::{DeviceMode, Endpoint, RECORD_KEY},
        listener::RelayListener,
        mode::{ModeController, ModeFile},
        sms::Outbox,
        store::{Memory, Store},
    };
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time;

    const ENDPOINT: &str = "https://x";

    struct Harness {
        store: Memory,
        alerts: Recorder,
        mode: ModeHandle,
        relay: RelayClient,
        _dir: tempfile::TempDir,
    }

    async fn harness(mode: DeviceMode) -> Harness {
        harness_with(Memory::default(), mode).await
    }

    async fn harness_with(store: Memory, mode: DeviceMode) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let file = ModeFile::new(dir.path().join("mode.json"));
        file.save(&mode).unwrap();

        let alerts = Recorder::default();
        let shared: Arc<dyn Store> = Arc::new(store.clone());

        let controller = ModeController::new(
            file,
            RelayListener::new(shared.clone()),
            ForwardFlow::new(Arc::new(alerts.clone())),
        )
        .unwrap();
        let (mut mode, _task) = mode::spawn(controller);
        mode.boot().await.unwrap();
        if mode.is_listening().await.unwrap() {
            store.wait_for_subscribers(1).await;
        }

        Harness {
            store,
            alerts,
            mode,
            relay: RelayClient::new(shared),
            _dir: dir,
        }
    }

    fn sender() -> DeviceMode {
        DeviceMode {
            role: Role::Sender,
            endpoint: ENDPOINT.into(),
        }
    }

    fn receiver() -> DeviceMode {
        DeviceMode {
            role: Role::Receiver,
            endpoint: ENDPOINT.into(),
        }
    }

    fn captured(source_app: &str, title: &str, body: &str) -> CapturedNotification {
        CapturedNotification {
            source_app: source_app.into(),
            title: Some(title.into()),
            body: Some(body.into()),
            posted_at: Some(Timestamp(1_700_000_000_000)),
        }
    }

    #[tokio::test]
    async fn dialer_notification_is_relayed() {
        let h = harness(sender()).await;
        let mut flow = NotifyFlow::new(h.mode.clone(), h.relay.clone());

        let outcome = flow
            .notify(captured("com.android.dialer", "Incoming Call", "+15550100"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Relayed);
        assert_eq!(
            h.store.value(ENDPOINT, RECORD_KEY),
            Some(json!({
                "appName": "com.android.dialer",
                "title": "Incoming Call",
                "text": "+15550100",
                "timestamp": 1_700_000_000_000u64,
            })),
        );
    }

    #[tokio::test]
    async fn other_apps_are_never_published() {
        let h = harness(sender()).await;
        let mut flow = NotifyFlow::new(h.mode.clone(), h.relay.clone());

        let outcome = flow
            .notify(captured("com.instagram.android", "x", "y"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(h.store.writes(ENDPOINT, RECORD_KEY), 0);
    }

    #[tokio::test]
    async fn receivers_do_not_relay() {
        let h = harness(receiver()).await;
        let mut flow = NotifyFlow::new(h.mode.clone(), h.relay.clone());

        let outcome = flow
            .notify(captured("com.android.dialer", "Incoming Call", "+15550100"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NotSender);
        assert_eq!(h.store.writes(ENDPOINT, RECORD_KEY), 0);
    }

    #[tokio::test]
    async fn sender_without_endpoint_reports_it() {
        let h = harness(DeviceMode {
            role: Role::Sender,
            endpoint: String::new(),
        })
        .await;
        let mut flow = NotifyFlow::new(h.mode.clone(), h.relay.clone());

        let e = flow
            .notify(captured("com.android.dialer", "Incoming Call", "+15550100"))
            .await
            .unwrap_err();

        assert!(e.is_missing_endpoint());
    }

    #[tokio::test]
    async fn receiver_shows_only_new_records() {
        let endpoint = Endpoint::parse(ENDPOINT).unwrap();
        let store = Memory::default();
        store
            .overwrite(&endpoint, RECORD_KEY, json!({ "title": "X", "text": "Y" }))
            .await
            .unwrap();

        let h = harness_with(store, receiver()).await;
        let mut alerts = h.alerts.watch();

        h.store
            .overwrite(&endpoint, RECORD_KEY, json!({ "title": "Z", "text": "W", "appName": "sms" }))
            .await
            .unwrap();

        let alert = time::timeout(Duration::from_secs(5), alerts.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.title, "Forwarded: Z");
        assert_eq!(alert.body, "W");
        assert_eq!(alert.source, "sms");
        assert_eq!(h.alerts.shown().len(), 1);
    }

    #[tokio::test]
    async fn alerts_get_distinct_ids() {
        let alerts = Recorder::default();
        let flow = ForwardFlow::new(Arc::new(alerts.clone()));

        for title in &["a", "b"] {
            flow.forward(RelayRecord {
                app_name: "sms".into(),
                title: (*title).into(),
                text: "t".into(),
                timestamp: Timestamp(0),
            })
            .await
            .unwrap();
        }

        let shown = alerts.shown();
        assert_eq!(shown.len(), 2);
        assert_ne!(shown[0].id, shown[1].id);
    }

    #[tokio::test]
    async fn ringing_call_is_answered_and_relayed() {
        let h = harness(sender()).await;
        let outbox = Outbox::default();
        let mut flow = CallFlow::new(
            h.mode.clone(),
            h.relay.clone(),
            Some(Arc::new(outbox.clone())),
            "Busy right now",
        );

        let outcome = flow
            .ringing(RingingCall {
                phone_number: "+15550100".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Relayed);
        assert_eq!(
            outbox.sent(),
            [("+15550100".to_owned(), "Busy right now".to_owned())],
        );

        let record = RelayRecord::decode(h.store.value(ENDPOINT, RECORD_KEY)).unwrap();
        assert_eq!(record.app_name, CALL_ALERT_APP);
        assert_eq!(record.title, CALL_ALERT_TITLE);
        assert_eq!(record.text, "Call from +15550100. Auto-reply SMS sent.");
    }

    #[tokio::test]
    async fn call_without_endpoint_still_auto_replies() {
        let h = harness(DeviceMode {
            role: Role::Sender,
            endpoint: String::new(),
        })
        .await;
        let outbox = Outbox::default();
        let mut flow = CallFlow::new(
            h.mode.clone(),
            h.relay.clone(),
            Some(Arc::new(outbox.clone())),
            "Busy right now",
        );

        let outcome = flow
            .ringing(RingingCall {
                phone_number: "+15550100".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Rejected);
        assert_eq!(outbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn call_on_a_receiver_is_ignored() {
        let h = harness(receiver()).await;
        let outbox = Outbox::default();
        let mut flow = CallFlow::new(
            h.mode.clone(),
            h.relay.clone(),
            Some(Arc::new(outbox.clone())),
            "Busy right now",
        );

        let outcome = flow
            .ringing(RingingCall {
                phone_number: "+15550100".into(),
            })
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NotSender);
        assert!(outbox.sent().is_empty());
    }
}
