use super::{
    sse, AuthRevokedSnafu, Deliveries, Delivery, Error, InvalidEventSnafu, Result, Store,
    StreamEndedSnafu, SubscriptionCancelledSnafu, SubscriptionRejectedSnafu,
    UnableToSubscribeSnafu, UnableToWriteSnafu, WriteRejectedSnafu,
};
use crate::domain::Endpoint;
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::ResultExt;
use std::{collections::VecDeque, time::Duration};
use tracing::{trace, trace_span, Instrument};

const WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// The Realtime Database REST API: `PUT` replaces a node, and a `GET`
/// asking for `text/event-stream` streams every change to it.
#[derive(Debug, Clone)]
pub struct Firebase {
    client: reqwest::Client,
}

impl Firebase {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Store for Firebase {
    async fn overwrite(&self, endpoint: &Endpoint, key: &str, value: Value) -> Result<()> {
        let Self { client } = self;
        let url = endpoint.node_url(key);
        let s = trace_span!("overwrite", key);

        async {
            trace!("Writing value");

            client
                .put(url.clone())
                .timeout(WRITE_TIMEOUT)
                .json(&value)
                .send()
                .await
                .context(UnableToWriteSnafu { url: url.as_str() })?
                .error_for_status()
                .context(WriteRejectedSnafu { url: url.as_str() })?;

            Ok(())
        }
        .instrument(s)
        .await
    }

    async fn subscribe(&self, endpoint: &Endpoint, key: &str) -> Result<Deliveries> {
        let Self { client } = self;
        let url = endpoint.node_url(key);
        let s = trace_span!("subscribe", key);

        async {
            trace!("Opening event stream");

            let resp = client
                .get(url.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .context(UnableToSubscribeSnafu { url: url.as_str() })?
                .error_for_status()
                .context(SubscriptionRejectedSnafu { url: url.as_str() })?;

            Ok(deliveries(resp.bytes_stream().boxed()).boxed())
        }
        .instrument(s)
        .await
    }
}

/// Turns the raw event stream into whole values of the node. The
/// stream stops after the first error; the database never resumes a
/// cancelled subscription.
fn deliveries<S, C>(body: S) -> impl Stream<Item = Delivery>
where
    S: Stream<Item = reqwest::Result<C>> + Unpin + Send + 'static,
    C: AsRef<[u8]> + Send + 'static,
{
    struct State<S> {
        body: S,
        parser: sse::Parser,
        pending: VecDeque<sse::Event>,
        node: Option<Value>,
        done: bool,
    }

    let state = State {
        body,
        parser: sse::Parser::default(),
        pending: VecDeque::new(),
        node: None,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            if let Some(event) = state.pending.pop_front() {
                match apply(&mut state.node, &event) {
                    Ok(true) => return Some((Ok(state.node.clone()), state)),
                    Ok(false) => continue,
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                }
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.parser.push(chunk.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(source)) => {
                    state.done = true;
                    return Some((Err(Error::StreamFailed { source }), state));
                }
                None => {
                    state.done = true;
                    return Some((StreamEndedSnafu.fail(), state));
                }
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Change {
    path: String,
    data: Value,
}

/// Applies one event to the locally mirrored node. Returns whether the
/// node was touched.
fn apply(node: &mut Option<Value>, event: &sse::Event) -> Result<bool> {
    let name = event.name.as_str();

    match name {
        "put" | "patch" => {
            let change: Change =
                serde_json::from_str(&event.data).context(InvalidEventSnafu { event: name })?;

            if name == "put" {
                put(node, &change.path, change.data);
            } else {
                patch(node, &change.path, change.data);
            }
            Ok(true)
        }
        "keep-alive" => Ok(false),
        "cancel" => SubscriptionCancelledSnafu {
            reason: event.data.as_str(),
        }
        .fail(),
        "auth_revoked" => AuthRevokedSnafu.fail(),
        other => {
            trace!("Ignoring {} event", other);
            Ok(false)
        }
    }
}

fn put(node: &mut Option<Value>, path: &str, data: Value) {
    let segments: Vec<_> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (last, parents) = match segments.split_last() {
        Some(s) => s,
        None => {
            *node = Some(data).filter(|v| !v.is_null());
            return;
        }
    };

    let mut here = node.get_or_insert_with(|| Value::Object(Map::new()));
    for segment in parents {
        here = as_object(here)
            .entry(*segment)
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let here = as_object(here);
    if data.is_null() {
        here.remove(*last);
    } else {
        here.insert((*last).to_owned(), data);
    }

    if matches!(node, Some(Value::Object(m)) if m.is_empty()) {
        *node = None;
    }
}

fn patch(node: &mut Option<Value>, path: &str, data: Value) {
    if let Value::Object(children) = data {
        for (k, v) in children {
            put(node, &format!("{}/{}", path.trim_end_matches('/'), k), v);
        }
    }
}

fn as_object(v: &mut Value) -> &mut Map<String, Value> {
    if !v.is_object() {
        *v = Value::Object(Map::new());
    }
    match v {
        Value::Object(m) => m,
        _ => unreachable!("replaced with an object above"),
    }
}
