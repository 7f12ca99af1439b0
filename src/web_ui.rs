use crate::{
    flow::{CallFlow, NotifyFlow},
    mode::{self, ModeHandle},
};
use parking_lot::Mutex;
use snafu::Snafu;
use std::{convert::Infallible, mem, net::SocketAddr, sync::Arc};
use tracing::{error, info};
use warp::{
    http::{header, StatusCode},
    reply, Filter, Rejection, Reply,
};

pub(crate) async fn serve(
    listen_address: SocketAddr,
    mode: ModeHandle,
    notify: NotifyFlow,
    call: CallFlow,
) {
    let routes = routes(mode, notify, call);

    info!("Starting web server at {}", listen_address);
    warp::serve(routes).run(listen_address).await
}

fn routes(
    mode: ModeHandle,
    notify: NotifyFlow,
    call: CallFlow,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let control = control::routes(mode, Flash::default());
    let events = events::routes(notify, call);

    control.or(events).recover(report_invalid)
}

/// A message shown on the next page load only.
// This is not appropriate for multiple concurrent users
#[derive(Debug, Clone, Default)]
struct Flash(Arc<Mutex<Option<String>>>);

impl Flash {
    fn set(&self, message: impl Into<String>) {
        *self.0.lock() = Some(message.into());
    }

    fn take(&self) -> Option<String> {
        mem::take(&mut *self.0.lock())
    }
}

fn redirect_to(location: impl AsRef<str>) -> impl Reply {
    let r = reply::reply();
    let r = reply::with_header(r, header::LOCATION, location.as_ref());
    let r = reply::with_status(r, StatusCode::SEE_OTHER);

    r
}

async fn report_invalid(r: Rejection) -> Result<impl Reply, Infallible> {
    let internal = || {
        Ok(warp::reply::with_status(
            String::from("An internal error occurred"),
            StatusCode::INTERNAL_SERVER_ERROR,
        ))
    };

    if let Some(e) = r.find::<Error>() {
        use Error::*;
        match e {
            MissingEndpoint | InvalidEndpoint { .. } => Ok(warp::reply::with_status(
                e.to_string(),
                StatusCode::BAD_REQUEST,
            )),
            SavedButNotListening { .. } => {
                error!("Listening failed after saving the mode: {:?}", e);
                Ok(warp::reply::with_status(
                    e.to_string(),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ))
            }
            UnableToReadMode { .. } | UnableToChangeMode { .. } => {
                error!("Unhandled web UI error: {}", e);
                internal()
            }
        }
    } else if let Some(e) = r.find::<warp::body::BodyDeserializeError>() {
        Ok(warp::reply::with_status(
            e.to_string(),
            StatusCode::BAD_REQUEST,
        ))
    } else if r.is_not_found() {
        Ok(warp::reply::with_status(
            String::from("Not found"),
            StatusCode::NOT_FOUND,
        ))
    } else if r.find::<warp::reject::MethodNotAllowed>().is_some() {
        Ok(warp::reply::with_status(
            String::from("Method not allowed"),
            StatusCode::METHOD_NOT_ALLOWED,
        ))
    } else {
        error!("Unhandled web UI error: {:?}", r);
        internal()
    }
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("Please save a database URL first!"))]
    MissingEndpoint,

    #[snafu(display("That database URL cannot be used"))]
    InvalidEndpoint { source: mode::Error },

    #[snafu(display("The mode was saved, but listening could not start"))]
    SavedButNotListening { source: mode::Error },

    UnableToReadMode { source: mode::Error },

    UnableToChangeMode { source: mode::Error },
}

impl warp::reject::Reject for Error {}

fn change_refused(source: mode::Error) -> Error {
    if source.is_missing_endpoint() {
        Error::MissingEndpoint
    } else if matches!(source, mode::Error::UnusableEndpoint { .. }) {
        Error::InvalidEndpoint { source }
    } else if matches!(source, mode::Error::UnableToListen { .. }) {
        Error::SavedButNotListening { source }
    } else {
        Error::UnableToChangeMode { source }
    }
}

mod control {
    use super::{change_refused, html, redirect_to, Flash, UnableToReadModeSnafu};
    use crate::{domain::Role, mode::ModeHandle};
    use serde::Deserialize;
    use snafu::ResultExt;
    use warp::{filters::BoxedFilter, Filter, Rejection};

    pub(super) fn routes(mode: ModeHandle, flash: Flash) -> BoxedFilter<(impl warp::Reply,)> {
        root(mode.clone(), flash.clone())
            .or(show_mode(mode.clone()))
            .or(set_role(mode.clone(), flash.clone()))
            .or(set_endpoint(mode, flash))
            .boxed()
    }

    fn root(mode: ModeHandle, flash: Flash) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path::end()
            .and(warp::get())
            .and_then(move || {
                let mut mode = mode.clone();
                let flash = flash.clone();
                async move {
                    let current = mode.mode().await.context(UnableToReadModeSnafu)?;
                    let listening = mode.is_listening().await.context(UnableToReadModeSnafu)?;
                    let message = flash.take();

                    let page = html::root(&current, listening, message.as_deref());
                    Ok::<_, Rejection>(warp::reply::html(page.into_string()))
                }
            })
            .boxed()
    }

    fn show_mode(mode: ModeHandle) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path!("mode")
            .and(warp::get())
            .and_then(move || {
                let mut mode = mode.clone();
                async move {
                    let current = mode.mode().await.context(UnableToReadModeSnafu)?;
                    Ok::<_, Rejection>(warp::reply::json(&current))
                }
            })
            .boxed()
    }

    #[derive(Debug, Deserialize)]
    struct RoleParams {
        role: Role,
        endpoint: Option<String>,
    }

    fn set_role(mode: ModeHandle, flash: Flash) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path!("mode")
            .and(warp::post())
            .and(warp::body::form())
            .and_then(move |params: RoleParams| {
                let mut mode = mode.clone();
                let flash = flash.clone();
                async move {
                    let RoleParams { role, endpoint } = params;

                    mode.set_role(role, endpoint)
                        .await
                        .map_err(change_refused)?;
                    flash.set(format!("Switched to {} mode", role));

                    Ok::<_, Rejection>(redirect_to("/"))
                }
            })
            .boxed()
    }

    #[derive(Debug, Deserialize)]
    struct EndpointParams {
        endpoint: String,
    }

    fn set_endpoint(mode: ModeHandle, flash: Flash) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path!("endpoint")
            .and(warp::post())
            .and(warp::body::form())
            .and_then(move |params: EndpointParams| {
                let mut mode = mode.clone();
                let flash = flash.clone();
                async move {
                    mode.set_endpoint(params.endpoint)
                        .await
                        .map_err(change_refused)?;
                    flash.set("Database URL saved!");

                    Ok::<_, Rejection>(redirect_to("/"))
                }
            })
            .boxed()
    }
}

mod events {
    use crate::{
        domain::{CapturedNotification, RingingCall},
        flow::{CallFlow, NotifyFlow},
    };
    use tracing::{trace_span, warn, Instrument};
    use warp::{filters::BoxedFilter, http::StatusCode, Filter};

    pub(super) fn routes(notify: NotifyFlow, call: CallFlow) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path!("events" / ..)
            .and(warp::post())
            .and(notification(notify).or(ringing(call)))
            .boxed()
    }

    fn notification(flow: NotifyFlow) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path!("notification")
            .and(warp::body::json())
            .map(move |captured: CapturedNotification| {
                let mut flow = flow.clone();
                let s = trace_span!("notification", source_app = %captured.source_app);

                tokio::spawn(
                    async move {
                        if let Err(e) = flow.notify(captured).await {
                            if e.is_missing_endpoint() {
                                warn!("No database URL saved, dropping notification");
                            } else {
                                warn!("Unable to relay notification: {}", e);
                            }
                        }
                    }
                    .instrument(s),
                );

                StatusCode::ACCEPTED
            })
            .boxed()
    }

    fn ringing(flow: CallFlow) -> BoxedFilter<(impl warp::Reply,)> {
        warp::path!("call")
            .and(warp::body::json())
            .map(move |call: RingingCall| {
                let mut flow = flow.clone();
                let s = trace_span!("call");

                tokio::spawn(
                    async move {
                        if let Err(e) = flow.ringing(call).await {
                            warn!("Unable to relay call alert: {}", e);
                        }
                    }
                    .instrument(s),
                );

                StatusCode::ACCEPTED
            })
            .boxed()
    }
}

mod html {
    use crate::domain::{DeviceMode, Role};
    use maud::{html, Markup};

    pub fn root(mode: &DeviceMode, listening: bool, flash: Option<&str>) -> Markup {
        let other = match mode.role {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        };

        page(|| {
            html! {
                @if let Some(flash) = flash {
                    p.flash { (flash) }
                }

                p { "This device is a " strong { (mode.role) } "." }

                @if mode.role == Role::Receiver {
                    @if listening {
                        p { "Active and listening for notifications." }
                    } @else if mode.endpoint.trim().is_empty() {
                        p { "Not listening yet." }
                    } @else {
                        p { "Not listening. Check the database URL and save it again." }
                    }
                }

                form method="post" action="/endpoint" {
                    label for="endpoint" { "Database URL " }
                    input #endpoint type="text" name="endpoint" value=(mode.endpoint);
                    button type="submit" { "Save URL" }
                }

                form method="post" action="/mode" {
                    input type="hidden" name="role" value=(other);
                    button type="submit" { "Switch to " (other) " mode" }
                }
            }
        })
    }

    fn page(body: impl FnOnce() -> Markup) -> Markup {
        html! {
            (maud::DOCTYPE)
                html {
                    head {
                        title { "Notify Sync" }
                    }
                    body {
                        (body())
                    }
                }
        }
    }
}
