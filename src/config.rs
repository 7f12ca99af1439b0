use snafu::{ResultExt, Snafu};
use std::{
    env,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};
use url::Url;

const DEFAULT_MODE_FILE: &str = "notify-sync-mode.json";
const DEFAULT_AUTO_REPLY: &str =
    "I am currently unavailable on calls. Please send me a message on WhatsApp.";

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: SocketAddr,
    pub mode_file: PathBuf,
    pub auto_reply: String,
    pub sms_gateway: Option<Url>,
}

impl Config {
    pub fn from_environment() -> Result<Self> {
        Self::from_vars(|name| env::var(name))
    }

    fn from_vars(var: impl Fn(&str) -> Result<String, env::VarError>) -> Result<Self> {
        let address = var("WEB_LISTEN_ADDRESS").context(UnknownWebListenAddressSnafu)?;
        let port = var("WEB_LISTEN_PORT").or_else(|_| var("PORT"));
        let port = port.context(UnknownWebListenPortSnafu)?;

        let address: IpAddr = address
            .parse()
            .context(InvalidWebListenAddressSnafu { address })?;
        let port = port.parse().context(InvalidWebListenPortSnafu { port })?;
        let listen_address = (address, port).into();

        let mode_file = var("MODE_FILE").unwrap_or_else(|_| DEFAULT_MODE_FILE.into());
        let auto_reply = var("AUTO_REPLY_MESSAGE").unwrap_or_else(|_| DEFAULT_AUTO_REPLY.into());

        let sms_gateway = match var("SMS_GATEWAY_URL") {
            Ok(uri) => Some(Url::parse(&uri).context(InvalidSmsGatewayUrlSnafu { uri })?),
            Err(_) => None,
        };

        Ok(Self {
            listen_address,
            mode_file: mode_file.into(),
            auto_reply,
            sms_gateway,
        })
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("WEB_LISTEN_ADDRESS must be set"))]
    UnknownWebListenAddress { source: env::VarError },

    #[snafu(display("WEB_LISTEN_ADDRESS is invalid"))]
    InvalidWebListenAddress {
        source: std::net::AddrParseError,
        address: String,
    },

    #[snafu(display("WEB_LISTEN_PORT must be set"))]
    UnknownWebListenPort { source: env::VarError },

    #[snafu(display("WEB_LISTEN_PORT is invalid"))]
    InvalidWebListenPort {
        source: std::num::ParseIntError,
        port: String,
    },

    #[snafu(display("SMS_GATEWAY_URL is invalid"))]
    InvalidSmsGatewayUrl {
        source: url::ParseError,
        uri: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;
