use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::Receiver;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::protocol::Message as WsMessage;
use tungstenite::protocol::WebSocketConfig;

use crate::config::{HubSettings, Settings};
use crate::connection::Session;
use crate::hub::Hub;
use crate::router::Router;
use crate::transport::message::{Frame, coalesce, split_frames};

const USER_ID_HEADER: &str = "x-user-id";

/// Identity and route captured during the WebSocket handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Handshake {
    pub path: String,
    pub user_id: Option<String>,
}

/// Read the connection's path and user. The `user_id` query parameter wins
/// over the `X-User-ID` header.
pub fn identify(req: &Request) -> Handshake {
    let from_query = req.uri().query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "user_id")
            .map(|(_, value)| value.into_owned())
    });
    let from_header = || {
        req.headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    Handshake {
        path: req.uri().path().to_string(),
        user_id: from_query.or_else(from_header).filter(|id| !id.is_empty()),
    }
}

/// Topics a connection joins on arrival, by endpoint path.
pub fn auto_subscriptions(path: &str, user: &str) -> Vec<String> {
    match path.trim_end_matches('/') {
        "/chat" => vec!["chat:general".to_string(), format!("chat:user:{user}")],
        "/presence" => vec!["presence:online".to_string(), format!("typing:user:{user}")],
        _ => Vec::new(),
    }
}

/// Bind the configured address and serve until the hub shuts down.
/// Failing to bind is the only error.
pub async fn start_websocket_server(
    settings: &Settings,
    hub: Arc<Hub>,
    router: Router,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("WebSocket server listening on ws://{}", addr);

    serve(listener, hub, router, settings.hub.clone()).await;
    Ok(())
}

/// Accept connections on `listener` until the hub's shutdown token fires.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>, router: Router, settings: HubSettings) {
    let shutdown = hub.shutdown_token();
    let settings = Arc::new(settings);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            },
        };

        let hub = hub.clone();
        let router = router.clone();
        let settings = settings.clone();
        tokio::spawn(async move {
            handle_connection(stream, peer, hub, router, settings).await;
        });
    }
    info!("WebSocket server stopped accepting connections");
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    router: Router,
    settings: Arc<HubSettings>,
) {
    let mut handshake = Handshake::default();
    let ws_stream = match accept_hdr_async_with_config(
        stream,
        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            handshake = identify(req);
            Ok(response)
        },
        Some(ws_config(&settings)),
    )
    .await
    {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer, "WebSocket handshake error: {e}");
            return;
        }
    };

    let (id, outbound) = match hub.register(handshake.user_id.clone()) {
        Ok(registered) => registered,
        Err(e) => {
            info!(peer = %peer, "connection refused: {e}");
            let (mut sink, _) = ws_stream.split();
            let _ = sink.send(WsMessage::Close(None)).await;
            return;
        }
    };
    let mut session = Session::new(id.clone(), handshake.user_id);
    for topic in auto_subscriptions(&handshake.path, session.user_label()) {
        hub.subscribe(&id, &topic);
    }
    debug!(client_id = %id, peer = %peer, path = %handshake.path, "connection established");

    // cancelled by hub shutdown, or by the write path when the socket fails
    let connection = hub.shutdown_token().child_token();
    let (sink, stream) = ws_stream.split();

    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        settings.clone(),
        id.clone(),
        connection.clone(),
    ));
    read_loop(stream, &router, &mut session, &settings, &connection).await;

    // closes the outbound queue; the write path drains it and sends Close
    hub.unregister(&id);
    if timeout(settings.write_wait(), writer).await.is_err() {
        warn!(client_id = %id, "write path did not finish in time");
    }
    debug!(client_id = %id, "connection closed");
}

/// Protocol limits for accepted sockets. Oversized messages fail the read
/// before they are buffered in full.
fn ws_config(settings: &HubSettings) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(settings.max_message_size))
        .max_frame_size(Some(settings.max_message_size))
}

async fn read_loop<S>(
    mut stream: S,
    router: &Router,
    session: &mut Session,
    settings: &HubSettings,
    connection: &CancellationToken,
) where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = connection.cancelled() => break,
            next = timeout(settings.pong_wait(), stream.next()) => next,
        };
        let message = match next {
            Err(_) => {
                info!(client_id = %session.id, "no traffic from peer, closing connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(tungstenite::Error::Capacity(e)))) => {
                warn!(
                    client_id = %session.id,
                    limit = settings.max_message_size,
                    "frame exceeds size limit, closing connection: {e}"
                );
                break;
            }
            Ok(Some(Err(e))) => {
                debug!(client_id = %session.id, "read error: {e}");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            WsMessage::Text(text) => {
                for frame in split_frames(text.as_str()) {
                    router.route_text(session, frame).await;
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) => debug!(client_id = %session.id, "binary frame ignored"),
            // ping and pong only prove the peer is alive
            _ => {}
        }
    }
}

async fn write_loop<S>(
    mut sink: S,
    mut outbound: Receiver<Frame>,
    settings: Arc<HubSettings>,
    client_id: String,
    connection: CancellationToken,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    // pings go out on a fixed period whatever else is written, so a peer
    // that only listens still has something to answer
    let period = settings.ping_period();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let max_batch = settings.max_coalesce.max(1);

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let mut batch = vec![frame];
                    while batch.len() < max_batch {
                        match outbound.try_recv() {
                            Ok(frame) => batch.push(frame),
                            Err(_) => break,
                        }
                    }
                    WsMessage::Text(coalesce(&batch).into())
                }
                None => {
                    let _ = timeout(settings.write_wait(), sink.send(WsMessage::Close(None))).await;
                    break;
                }
            },
            _ = heartbeat.tick() => WsMessage::Ping(Default::default()),
        };

        match timeout(settings.write_wait(), sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client_id = %client_id, "write error: {e}");
                break;
            }
            Err(_) => {
                warn!(client_id = %client_id, "write timed out");
                break;
            }
        }
    }
    connection.cancel();
}
