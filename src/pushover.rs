use crate::domain::Alert;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::env;
use tracing::{trace, trace_span, Instrument};
use url::Url;

const NOTIFY_URL: &str = "https://api.pushover.net/1/messages.json";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey(pub String);

#[derive(Debug, Clone)]
pub struct Config {
    token: String,
    user: UserKey,
    notify_url: Url,
}

impl Config {
    /// Pushover is optional; unless both variables are set, alerts are
    /// shown on the console instead.
    pub fn from_environment() -> Result<Option<Self>> {
        let (token, user) = match (env::var("PUSHOVER_API_TOKEN"), env::var("PUSHOVER_USER_KEY")) {
            (Ok(token), Ok(user)) => (token, user),
            (Err(_), Err(_)) => return Ok(None),
            (Ok(_), Err(_)) => return UnknownUserKeySnafu.fail(),
            (Err(_), Ok(_)) => return UnknownApiTokenSnafu.fail(),
        };

        Self::new(token, UserKey(user), NOTIFY_URL).map(Some)
    }

    fn new(token: String, user: UserKey, notify_url: &str) -> Result<Self> {
        let notify_url = Url::parse(notify_url).context(UnableToConfigureNotifyUrlSnafu)?;

        Ok(Self {
            token,
            user,
            notify_url,
        })
    }

    pub fn into_client(self, client: reqwest::Client) -> Client {
        Client {
            client,
            config: self,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    client: reqwest::Client,
    config: Config,
}

impl Client {
    pub async fn notify(&self, alert: &Alert) -> Result<()> {
        let Self { client, config } = self;
        let s = trace_span!("notify", id = alert.id.0);

        #[derive(Debug, Serialize)]
        struct NotifyParams<'a> {
            token: &'a str,
            user: &'a UserKey,
            title: &'a str,
            message: &'a str,
            priority: i8,
        }

        async {
            trace!("Pushing alert");

            // Pushover has no field for the source on its own
            let message = format!("{}\n\nFrom {}", alert.body, alert.source);
            let params = NotifyParams {
                token: &config.token,
                user: &config.user,
                title: &alert.title,
                message: &message,
                priority: 1,
            };

            client
                .post(config.notify_url.clone())
                .query(&params)
                .send()
                .await
                .context(UnableToSendNotificationSnafu)?
                .error_for_status()
                .context(NotificationRejectedSnafu)?;

            Ok(())
        }
        .instrument(s)
        .await
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("PUSHOVER_API_TOKEN must be set when PUSHOVER_USER_KEY is"))]
    UnknownApiToken,

    #[snafu(display("PUSHOVER_USER_KEY must be set when PUSHOVER_API_TOKEN is"))]
    UnknownUserKey,

    UnableToConfigureNotifyUrl { source: url::ParseError },

    UnableToSendNotification { source: reqwest::Error },

    NotificationRejected { source: reqwest::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::domain::AlertId;
    use wiremock::{
        matchers::{method, path, query_param, query_param_is_missing},
        Mock, MockServer, ResponseTemplate,
    };

    #[tokio::test]
    async fn pushes_the_alert_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/1/messages.json"))
            .and(query_param("user", "u-key"))
            .and(query_param("title", "Forwarded: Mum"))
            .and(query_param("message", "Call me\n\nFrom com.android.mms"))
            .and(query_param_is_missing("url_title"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notify_url = format!("{}/1/messages.json", server.uri());
        let config = Config::new("token".into(), UserKey("u-key".into()), &notify_url).unwrap();
        let client = config.into_client(reqwest::Client::new());

        let alert = Alert {
            id: AlertId(1),
            title: "Forwarded: Mum".into(),
            body: "Call me".into(),
            source: "com.android.mms".into(),
        };
        client.notify(&alert).await.unwrap();
    }
}
