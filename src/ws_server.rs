// WebSocket server for draft room clients.
//
// Each accepted connection must open with a `join` (or `create_room`)
// message binding it to a draft room and a participant identity. After the
// handshake the connection is registered with the room's hub, a writer task
// drains its hub outbox into the socket, and the read side becomes a
// command loop (`start_draft`, `make_pick`). Command failures are answered
// with an `error` frame on the offending connection only.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{info, warn};

use crate::draft::pick::UserId;
use crate::hub::ConnectionId;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::room::{Room, RoomRegistry};

/// Bind the server socket on `127.0.0.1:{port}`.
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(format!("127.0.0.1:{port}")).await?;
    Ok(listener)
}

/// Accept loop. Each connection is served on its own task; the loop itself
/// runs until the listener fails or the task is aborted.
pub async fn run(listener: TcpListener, registry: Arc<RoomRegistry>) -> anyhow::Result<()> {
    let local_addr = listener.local_addr()?;
    info!("WebSocket server listening on {local_addr}");

    loop {
        let (stream, addr) = listener.accept().await?;
        let addr_str = addr.to_string();
        info!("Accepted TCP connection from {addr_str}");

        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry, &addr_str).await {
                warn!("connection {addr_str} ended with error: {e}");
            }
        });
    }
}

/// Serve a single client connection end to end. Generic over the transport
/// so tests can drive it with in-memory streams.
pub async fn handle_connection<S>(
    stream: S,
    registry: Arc<RoomRegistry>,
    addr: &str,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    // The first text frame must bind the connection to a room and a user.
    let Some((room, user_id)) = await_join(&mut read, &mut write, &registry, addr).await else {
        return Ok(());
    };

    let registration = room.hub().register(user_id);
    let connection_id = registration.connection_id;
    let mut outbox = registration.outbox;

    let writer = tokio::spawn(async move {
        while let Some(text) = outbox.recv().await {
            if write.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    client_loop(&mut read, room.as_ref(), connection_id, addr).await;

    // Dropping the hub entry closes the outbox, which ends the writer task.
    room.hub().unregister(connection_id);
    let _ = writer.await;
    Ok(())
}

/// Wait for the opening `join` / `create_room` frame. Returns the bound
/// room and user, or `None` when the connection should simply be closed
/// (bad opening message, unknown room, client went away).
async fn await_join<S>(
    read: &mut (impl Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    write: &mut SplitSink<WebSocketStream<S>, Message>,
    registry: &Arc<RoomRegistry>,
    addr: &str,
) -> Option<(Arc<Room>, UserId)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(ClientMessage::Join { draft_id, user_id }) => {
                        let Some(room) = registry.get(draft_id) else {
                            send_error(write, "no draft room for this draft").await;
                            return None;
                        };
                        return Some((room, user_id));
                    }
                    Ok(ClientMessage::CreateRoom {
                        draft_id,
                        user_id,
                        available_players,
                    }) => match registry.create(draft_id, available_players) {
                        Ok(room) => {
                            spawn_storage_tasks(&room, registry);
                            return Some((room, user_id));
                        }
                        Err(e) => {
                            send_error(write, &e.to_string()).await;
                            return None;
                        }
                    },
                    Ok(_) => {
                        send_error(write, "join required before other messages").await;
                        return None;
                    }
                    Err(e) => {
                        warn!("unparseable opening message from {addr}: {e}");
                        send_error(write, "invalid message").await;
                        return None;
                    }
                }
            }
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                warn!("WebSocket error from {addr} before join: {e}");
                return None;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
    None
}

/// Process commands from a joined connection until it closes or errors.
/// Generic over the stream type so it can be tested with in-memory streams
/// without opening TCP ports.
pub async fn client_loop<St>(stream: &mut St, room: &Room, connection_id: ConnectionId, addr: &str)
where
    St: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                handle_command(text.as_str(), room, connection_id, addr).await;
            }
            Ok(Message::Close(_)) => {
                info!("client {addr} sent close frame");
                break;
            }
            Err(e) => {
                warn!("WebSocket error from {addr}: {e}");
                break;
            }
            _ => {
                // Ignore Binary, Ping, Pong, Frame variants.
            }
        }
    }
}

async fn handle_command(text: &str, room: &Room, connection_id: ConnectionId, addr: &str) {
    let command = match serde_json::from_str::<ClientMessage>(text) {
        Ok(command) => command,
        Err(e) => {
            warn!("unparseable message from {addr}: {e}");
            reply_error(room, connection_id, "invalid message");
            return;
        }
    };

    match command {
        ClientMessage::Join { .. } | ClientMessage::CreateRoom { .. } => {
            reply_error(room, connection_id, "already joined");
        }
        ClientMessage::StartDraft {
            pick_order,
            total_rounds,
            timer_duration,
            available_players,
        } => {
            let players = if available_players.is_empty() {
                room.player_pool().to_vec()
            } else {
                available_players
            };
            let result = room
                .state()
                .start(
                    pick_order,
                    total_rounds,
                    Duration::from_secs(timer_duration),
                    players,
                )
                .await;
            if let Err(e) = result {
                reply_error(room, connection_id, &e.to_string());
            }
        }
        ClientMessage::MakePick { user_id, player_id } => {
            // The declared userID is trusted: the admin console picks on
            // behalf of the participant on the clock.
            if let Err(e) = room.state().make_pick(user_id, player_id).await {
                reply_error(room, connection_id, &e.to_string());
            }
        }
    }
}

fn reply_error(room: &Room, connection_id: ConnectionId, message: &str) {
    let msg = ServerMessage::Error {
        message: message.to_string(),
    };
    match serde_json::to_string(&msg) {
        Ok(text) => room.hub().send_to(connection_id, &text),
        Err(e) => warn!("failed to encode error reply: {e}"),
    }
}

async fn send_error<S>(write: &mut SplitSink<WebSocketStream<S>, Message>, message: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = ServerMessage::Error {
        message: message.to_string(),
    };
    if let Ok(text) = serde_json::to_string(&msg) {
        let _ = write.send(Message::Text(text.into())).await;
    }
    let _ = write.close().await;
}

/// Stand-ins for the storage collaborator: log each finalized pick as it
/// arrives, and retire the room from the registry once the draft completes.
fn spawn_storage_tasks(room: &Arc<Room>, registry: &Arc<RoomRegistry>) {
    let draft_id = room.draft_id();

    if let Some(mut picks) = room.take_pick_results() {
        tokio::spawn(async move {
            while let Some(pick) = picks.recv().await {
                info!(
                    draft_id = pick.draft_id,
                    user_id = pick.user_id,
                    player_id = pick.player_id,
                    pick_number = pick.pick_number,
                    round = pick.round,
                    auto_draft = pick.auto_draft,
                    "pick finalized"
                );
            }
        });
    }

    if let Some(completed) = room.take_completed() {
        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            if completed.await.is_ok() {
                registry.remove(draft_id);
            }
        });
    }
}
