//! Per-connection WebSocket sessions
//!
//! A connection is routed during the upgrade handshake and then runs as a
//! producer session (feeding the ingest adapter), a viewer session (drained
//! from the registry through a [`ChannelViewer`]) or a robot's control link.
//! Viewer and control sessions end when their [`ChannelViewer`] is evicted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use super::config::ServerConfig;
use super::route::Route;
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::ingest::InboundMessage;
use crate::payload::{ChannelKey, RobotId};
use crate::registry::{ChannelViewer, OutboundFrame, Viewer};

/// How long a closing viewer's writer may take to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

type Writer = JoinHandle<std::result::Result<(), WsError>>;

/// Upgrade a TCP connection and run the session its path selects
pub(super) async fn handle(
    session_id: u64,
    socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    hub: Arc<Hub>,
) -> Result<()> {
    let mut route = None;
    let callback = |request: &Request, response: Response| {
        let path = request.uri().path();
        match Route::parse(path) {
            Some(resolved) => {
                route = Some(resolved);
                Ok(response)
            }
            None => {
                tracing::warn!(session_id = session_id, peer = %peer_addr, path = path, "Unknown path");
                let mut rejection = ErrorResponse::new(Some(format!("no endpoint at {path}")));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        }
    };

    let ws = tokio::time::timeout(config.handshake_timeout, accept_hdr_async(socket, callback))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "websocket handshake timed out"))??;

    let Some(route) = route else {
        return Ok(());
    };

    match route {
        Route::Ingest(key) => run_producer(session_id, ws, key, hub).await,
        Route::View(key) => run_viewer(session_id, ws, key, config.viewer_buffer, hub).await,
        Route::Control(robot) => run_control(session_id, ws, robot, config.viewer_buffer, hub).await,
    }
}

/// Feed every message of a producer connection into the ingest adapter
///
/// Malformed messages are dropped (the adapter logs and counts them); the
/// connection stays open until the producer closes it.
async fn run_producer(
    session_id: u64,
    mut ws: WebSocketStream<TcpStream>,
    key: ChannelKey,
    hub: Arc<Hub>,
) -> Result<()> {
    tracing::info!(session_id = session_id, channel = %key, "Producer connected");

    let ingest = Arc::clone(hub.ingest());
    let mut messages: u64 = 0;

    let result = loop {
        let inbound = match ws.next().await {
            Some(Ok(Message::Text(text))) => InboundMessage::Text(text),
            Some(Ok(Message::Binary(data))) => InboundMessage::Binary(Bytes::from(data)),
            Some(Ok(Message::Close(_))) | None => break Ok(()),
            // Pings are answered by tungstenite itself
            Some(Ok(_)) => continue,
            Some(Err(e)) => break Err(Error::from(e)),
        };

        messages += 1;
        // Errors are already logged by the adapter
        let _ = ingest.ingest(&key, inbound).await;
    };

    tracing::info!(
        session_id = session_id,
        channel = %key,
        messages = messages,
        "Producer disconnected"
    );
    result
}

/// Stream a channel to a viewer connection
///
/// The viewer is seeded with the channel's latest value, then receives every
/// broadcast. Anything the viewer sends is ignored. A viewer the registry
/// evicts after a failed delivery is disconnected.
async fn run_viewer(
    session_id: u64,
    ws: WebSocketStream<TcpStream>,
    key: ChannelKey,
    buffer: usize,
    hub: Arc<Hub>,
) -> Result<()> {
    let (sink, mut stream) = ws.split();
    let (viewer, frames) = ChannelViewer::new(buffer);
    let viewer = Arc::new(viewer);
    let handle: Arc<dyn Viewer> = viewer.clone();
    let viewer_id = handle.id();
    let mut writer = spawn_writer(sink, frames);

    let registry = Arc::clone(hub.registry());
    if let Err(e) = registry.subscribe_seeded(&key, &handle).await {
        tracing::debug!(session_id = session_id, viewer = %viewer_id, error = %e, "Viewer dropped before first frame");
        writer.abort();
        return Ok(());
    }

    tracing::info!(session_id = session_id, channel = %key, viewer = %viewer_id, "Viewer connected");

    let (result, writer_done) = hold_open(session_id, &mut stream, &mut writer, &viewer).await;

    registry.unsubscribe(&key, viewer_id).await;
    drop(handle);
    drop(viewer);
    close_writer(writer, writer_done).await;

    tracing::info!(session_id = session_id, channel = %key, viewer = %viewer_id, "Viewer disconnected");
    result
}

/// Hold a robot's control link open so commands can be pushed down it
///
/// A newer connection for the same robot replaces this one and closes it.
/// Messages from the robot are only heartbeats.
async fn run_control(
    session_id: u64,
    ws: WebSocketStream<TcpStream>,
    robot: RobotId,
    buffer: usize,
    hub: Arc<Hub>,
) -> Result<()> {
    let (sink, mut stream) = ws.split();
    let (link, frames) = ChannelViewer::new(buffer);
    let link = Arc::new(link);
    let handle: Arc<dyn Viewer> = link.clone();
    let link_id = handle.id();
    let mut writer = spawn_writer(sink, frames);

    let controls = Arc::clone(hub.control());
    controls.register(&robot, &handle).await;
    tracing::info!(session_id = session_id, robot = %robot, link = %link_id, "Control link connected");

    let (result, writer_done) = hold_open(session_id, &mut stream, &mut writer, &link).await;

    controls.unregister(&robot, link_id).await;
    drop(handle);
    drop(link);
    close_writer(writer, writer_done).await;

    tracing::info!(session_id = session_id, robot = %robot, link = %link_id, "Control link disconnected");
    result
}

/// Forward queued frames to the socket until the queue closes
fn spawn_writer(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
) -> Writer {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let message = match frame {
                OutboundFrame::Text(text) => Message::Text(text.to_string()),
                OutboundFrame::Binary(data) => Message::Binary(data.to_vec()),
            };
            sink.send(message).await?;
        }
        sink.close().await?;
        Ok::<(), WsError>(())
    })
}

/// Wait until the peer leaves, the writer stops or `viewer` is evicted
///
/// Returns the session result and whether the writer already finished.
async fn hold_open(
    session_id: u64,
    stream: &mut SplitStream<WebSocketStream<TcpStream>>,
    writer: &mut Writer,
    viewer: &ChannelViewer,
) -> (Result<()>, bool) {
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => return (Ok(()), false),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return (Err(Error::from(e)), false),
            },
            written = &mut *writer => {
                let result = match written {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(Error::from(e)),
                    Err(e) => Err(Error::from(io::Error::new(io::ErrorKind::Other, e))),
                };
                return (result, true);
            }
            _ = viewer.evicted() => {
                tracing::info!(session_id = session_id, viewer = %viewer.id(), "Evicted, closing connection");
                return (Ok(()), false);
            }
        }
    }
}

/// Let the writer flush and close the socket once every sender is gone
async fn close_writer(mut writer: Writer, writer_done: bool) {
    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}
