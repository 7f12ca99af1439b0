use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt, Snafu};
use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};
use url::Url;

/// The single key every sender overwrites and every receiver watches.
pub const RECORD_KEY: &str = "latest_notification";

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Self(millis)
    }
}

/// A notification as the host environment hands it over. Nothing about
/// it has been checked yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CapturedNotification {
    pub source_app: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub posted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RingingCall {
    pub phone_number: String,
}

/// A notification that passed the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub source_app: String,
    pub title: String,
    pub body: String,
    pub timestamp: Timestamp,
}

impl From<NotificationEvent> for RelayRecord {
    fn from(other: NotificationEvent) -> Self {
        let NotificationEvent {
            source_app,
            title,
            body,
            timestamp,
        } = other;

        Self {
            app_name: source_app,
            title,
            text: body,
            timestamp,
        }
    }
}

/// The value stored under [`RECORD_KEY`]. Each write replaces the
/// previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    pub app_name: String,
    pub title: String,
    pub text: String,
    pub timestamp: Timestamp,
}

impl RelayRecord {
    /// Anything missing a title or text is skipped, not an error; the
    /// store may hold an absent value or a partially written one. The
    /// other fields fall back to defaults when they have an odd shape.
    pub fn decode(value: Option<serde_json::Value>) -> Option<Self> {
        use serde_json::Value;

        let value = value?;
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_owned);

        let timestamp = match value.get("timestamp") {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };

        Some(Self {
            app_name: field("appName").unwrap_or_default(),
            title: field("title")?,
            text: field("text")?,
            timestamp: Timestamp(timestamp.unwrap_or_default()),
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// What a device is doing and which database it talks to. The endpoint
/// is kept as the user typed it; it is only validated when used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMode {
    pub role: Role,
    #[serde(default)]
    pub endpoint: String,
}

impl Default for DeviceMode {
    fn default() -> Self {
        Self {
            role: Role::Receiver,
            endpoint: String::new(),
        }
    }
}

/// A validated base URL of the shared database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    pub fn parse(endpoint: &str) -> Result<Self, EndpointError> {
        let endpoint = endpoint.trim();
        ensure!(!endpoint.is_empty(), MissingEndpointSnafu);

        let url = Url::parse(endpoint).context(InvalidEndpointSnafu { endpoint })?;
        ensure!(
            matches!(url.scheme(), "http" | "https") && !url.cannot_be_a_base(),
            UnsupportedEndpointSnafu { endpoint }
        );

        Ok(Self(url))
    }

    /// The REST location of `key`, keeping any query string (such as an
    /// access token) that came with the endpoint.
    pub fn node_url(&self, key: &str) -> Url {
        let mut url = self.0.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&format!("{}.json", key));
        }
        url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Snafu)]
pub enum EndpointError {
    #[snafu(display("No database URL has been saved"))]
    MissingEndpoint,

    #[snafu(display("The database URL {} is invalid", endpoint))]
    InvalidEndpoint {
        source: url::ParseError,
        endpoint: String,
    },

    #[snafu(display("The database URL {} must be an http or https URL", endpoint))]
    UnsupportedEndpoint { endpoint: String },
}

impl EndpointError {
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::MissingEndpoint)
    }
}

/// Something to show the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: AlertId,
    pub title: String,
    pub body: String,
    pub source: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AlertId(pub u64);
