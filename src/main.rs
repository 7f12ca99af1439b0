#![deny(rust_2018_idioms)]

use snafu::{ResultExt, Snafu};
use std::{sync::Arc, time::Duration};
use tracing::info;

pub use config::Config;

mod alert;
mod config;
mod domain;
mod filter;
mod flow;
mod listener;
mod mode;
mod pushover;
mod relay;
mod sms;
mod store;
mod web_ui;

// Event streams stay open, so only connecting is bounded here
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() {
    if let Err(e) = core() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[tokio::main]
async fn core() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_environment().context(UnableToConfigureSnafu)?;
    let pushover_config =
        pushover::Config::from_environment().context(UnableToConfigurePushoverSnafu)?;

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context(UnableToBuildHttpClientSnafu)?;
    let store: Arc<dyn store::Store> = Arc::new(store::Firebase::new(client.clone()));

    let alerter: Arc<dyn alert::Alerter> = match pushover_config {
        Some(pushover_config) => Arc::new(pushover_config.into_client(client.clone())),
        None => {
            info!("Pushover is not configured, showing alerts on the console");
            Arc::new(alert::Console)
        }
    };

    let messenger = config.sms_gateway.clone().map(|url| {
        Arc::new(sms::SmsGateway::new(client.clone(), url)) as Arc<dyn sms::Messenger>
    });
    if messenger.is_none() {
        info!("SMS_GATEWAY_URL is not set, calls will not be answered");
    }

    let mode_file = mode::ModeFile::new(config.mode_file.clone());
    let listener = listener::RelayListener::new(store.clone());
    let forward_flow = flow::ForwardFlow::new(alerter);

    let controller =
        mode::ModeController::new(mode_file, listener, forward_flow).context(UnableToLoadModeSnafu)?;
    let (mut mode, mode_task) = mode::spawn(controller);
    match mode.boot().await {
        Ok(()) => {}
        // Already reported; the user can retry from the web UI
        Err(mode::Error::UnableToListen { .. }) => {}
        Err(e) => return Err(e).context(UnableToBootSnafu),
    }

    let relay = relay::RelayClient::new(store);
    let notify_flow = flow::NotifyFlow::new(mode.clone(), relay.clone());
    let call_flow = flow::CallFlow::new(
        mode.clone(),
        relay,
        messenger,
        config.auto_reply.as_str(),
    );

    let web_ui = tokio::spawn(web_ui::serve(
        config.listen_address,
        mode,
        notify_flow,
        call_flow,
    ));

    tokio::select! {
        web_ui = web_ui => {
            web_ui.context(WebUiFailedSnafu)
        }
        mode_task = mode_task => {
            mode_task.context(ModeControllerFailedSnafu)?;
            ModeControllerExitedSnafu.fail()
        }
    }
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Unable to configure application"))]
    UnableToConfigure { source: config::Error },

    #[snafu(display("Unable to configure Pushover integration"))]
    UnableToConfigurePushover { source: pushover::Error },

    #[snafu(display("Unable to build the HTTP client"))]
    UnableToBuildHttpClient { source: reqwest::Error },

    #[snafu(display("Unable to load the saved mode"))]
    UnableToLoadMode { source: mode::Error },

    #[snafu(display("Unable to boot the mode controller"))]
    UnableToBoot { source: mode::Error },

    #[snafu(display("The web UI failed"))]
    WebUiFailed { source: tokio::task::JoinError },

    #[snafu(display("The mode controller exited and never should"))]
    ModeControllerExited,

    #[snafu(display("The mode controller failed and never should"))]
    ModeControllerFailed { source: tokio::task::JoinError },
}

type Result<T, E = Error> = std::result::Result<T, E>;
