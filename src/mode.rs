use crate::{
    domain::{DeviceMode, Endpoint, EndpointError, Role},
    flow::ForwardFlow,
    listener::{self, RelayListener, Subscription},
};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, StreamExt,
};
use snafu::{ResultExt, Snafu};
use std::{fs, io, path::PathBuf};
use tracing::{error, info, trace, warn};

/// The device's role, kept on local disk between runs.
#[derive(Debug, Clone)]
pub struct ModeFile {
    path: PathBuf,
}

impl ModeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<DeviceMode>> {
        let Self { path } = self;

        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .context(UnableToDecodeModeSnafu { path }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(UnableToReadModeSnafu { path }),
        }
    }

    pub fn save(&self, mode: &DeviceMode) -> Result<()> {
        let Self { path } = self;

        let bytes = serde_json::to_vec_pretty(mode).context(UnableToEncodeModeSnafu)?;

        let partial = path.with_extension("partial");
        fs::write(&partial, bytes).context(UnableToWriteModeSnafu { path: &partial })?;
        fs::rename(&partial, path).context(UnableToWriteModeSnafu { path })?;

        Ok(())
    }
}

/// Owns the device's role. Only one of sending and listening is ever
/// active, and only while the role says so.
#[derive(Debug)]
pub struct ModeController {
    mode: DeviceMode,
    file: ModeFile,
    listener: RelayListener,
    forward: ForwardFlow,
    session: Option<Subscription>,
}

// Not part of actor API
impl ModeController {
    pub fn new(file: ModeFile, listener: RelayListener, forward: ForwardFlow) -> Result<Self> {
        let mode = file.load()?.unwrap_or_default();

        Ok(Self {
            mode,
            file,
            listener,
            forward,
            session: None,
        })
    }

    fn transition(&mut self, mode: DeviceMode) -> Result<()> {
        let DeviceMode { role, endpoint } = &mode;

        if *role == Role::Receiver || !endpoint.trim().is_empty() {
            Endpoint::parse(endpoint).context(UnusableEndpointSnafu)?;
        }

        self.file.save(&mode)?;
        info!("Switching to {}", role);

        // The old session must be gone before a new one starts
        self.session = None;
        self.mode = mode;

        match self.mode.role {
            Role::Sender => Ok(()),
            Role::Receiver => self.listen(),
        }
    }

    fn listen(&mut self) -> Result<()> {
        let Self {
            mode,
            listener,
            forward,
            session,
            ..
        } = self;

        let forward = forward.clone();
        let subscribed = listener
            .subscribe(&mode.endpoint, move |record| {
                let forward = forward.clone();
                async move {
                    if let Err(e) = forward.forward(record).await {
                        error!("Unable to show a relayed notification: {}", e);
                    }
                }
            });

        match subscribed {
            Ok(s) => {
                *session = Some(s);
                Ok(())
            }
            Err(e) => {
                error!("Unable to start the receiver: {}", e);
                Err(e).context(UnableToListenSnafu)
            }
        }
    }
}

// Actor API
impl ModeController {
    fn boot(&mut self) -> Result<()> {
        let role = self.mode.role;
        let configured = !self.mode.endpoint.trim().is_empty();
        info!("Starting as {}", role);

        match role {
            Role::Sender => Ok(()),
            Role::Receiver if !configured => {
                warn!("Cannot start the receiver: no database URL has been saved");
                Ok(())
            }
            Role::Receiver => self.listen(),
        }
    }

    fn mode(&self) -> DeviceMode {
        self.mode.clone()
    }

    fn is_listening(&self) -> bool {
        self.session.as_ref().map_or(false, Subscription::is_active)
    }

    /// `None` keeps the saved endpoint.
    fn set_role(&mut self, role: Role, endpoint: Option<String>) -> Result<()> {
        let endpoint = endpoint.unwrap_or_else(|| self.mode.endpoint.clone());
        self.transition(DeviceMode { role, endpoint })
    }

    fn set_endpoint(&mut self, endpoint: String) -> Result<()> {
        let role = self.mode.role;
        self.transition(DeviceMode { role, endpoint })
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Cannot use the database URL"))]
    UnusableEndpoint { source: EndpointError },

    #[snafu(display("Unable to start listening"))]
    UnableToListen { source: listener::Error },

    #[snafu(display("Unable to read the saved mode from {}", path.display()))]
    UnableToReadMode { source: io::Error, path: PathBuf },

    #[snafu(display("The saved mode in {} is unreadable", path.display()))]
    UnableToDecodeMode {
        source: serde_json::Error,
        path: PathBuf,
    },

    UnableToEncodeMode { source: serde_json::Error },

    #[snafu(display("Unable to save the mode to {}", path.display()))]
    UnableToWriteMode { source: io::Error, path: PathBuf },

    #[snafu(display("The mode controller is no longer running"))]
    ActorGone { source: oneshot::Canceled },
}

impl Error {
    pub fn is_missing_endpoint(&self) -> bool {
        matches!(self, Self::UnusableEndpoint { source } if source.is_missing())
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub fn spawn(this: ModeController) -> (ModeHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(10);
    let child = tokio::spawn(mode_task(this, rx));
    (ModeHandle(tx), child)
}

#[derive(Debug, Clone)]
pub struct ModeHandle(mpsc::Sender<ModeCommand>);

impl ModeHandle {
    pub async fn boot(&mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        // Ignore send errors. If this send fails, so does the
        // rx.await below. There's no reason to check for the
        // same failure twice.
        let _ = self.0.send(ModeCommand::Boot(tx)).await;
        rx.await.context(ActorGoneSnafu)?
    }

    pub async fn mode(&mut self) -> Result<DeviceMode> {
        let (tx, rx) = oneshot::channel();

        let _ = self.0.send(ModeCommand::Mode(tx)).await;
        rx.await.context(ActorGoneSnafu)
    }

    pub async fn is_listening(&mut self) -> Result<bool> {
        let (tx, rx) = oneshot::channel();

        let _ = self.0.send(ModeCommand::IsListening(tx)).await;
        rx.await.context(ActorGoneSnafu)
    }

    pub async fn set_role(&mut self, role: Role, endpoint: Option<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        let _ = self.0.send(ModeCommand::SetRole(tx, role, endpoint)).await;
        rx.await.context(ActorGoneSnafu)?
    }

    pub async fn set_endpoint(&mut self, endpoint: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        let _ = self.0.send(ModeCommand::SetEndpoint(tx, endpoint)).await;
        rx.await.context(ActorGoneSnafu)?
    }
}

#[derive(Debug)]
enum ModeCommand {
    Boot(oneshot::Sender<Result<()>>),

    Mode(oneshot::Sender<DeviceMode>),

    IsListening(oneshot::Sender<bool>),

    SetRole(oneshot::Sender<Result<()>>, Role, Option<String>),

    SetEndpoint(oneshot::Sender<Result<()>>, String),
}

async fn mode_task(mut this: ModeController, mut rx: mpsc::Receiver<ModeCommand>) {
    while let Some(cmd) = rx.next().await {
        // If we couldn't respond, that's OK
        match cmd {
            ModeCommand::Boot(r) => {
                let _ = r.send(this.boot());
            }

            ModeCommand::Mode(r) => {
                let _ = r.send(this.mode());
            }

            ModeCommand::IsListening(r) => {
                let _ = r.send(this.is_listening());
            }

            ModeCommand::SetRole(r, role, endpoint) => {
                let _ = r.send(this.set_role(role, endpoint));
            }

            ModeCommand::SetEndpoint(r, endpoint) => {
                let _ = r.send(this.set_endpoint(endpoint));
            }
        }
    }

    trace!("Every mode handle is gone, stopping");
}
