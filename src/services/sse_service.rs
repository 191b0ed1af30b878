use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        game::GameView,
        sse::{Handshake, ServerEvent},
    },
    state::{game::GameCode, hub::GameUpdate},
};

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Convert a game subscription into an SSE response, starting with a
/// `handshake` carrying the current game, and ending once the game is removed
/// or the client disconnects.
pub fn to_sse_stream(
    code: GameCode,
    game: GameView,
    mut receiver: broadcast::Receiver<GameUpdate>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let handshake = ServerEvent::json(
            Some("handshake".to_string()),
            &Handshake {
                code: code.clone(),
                game,
            },
        );
        match handshake {
            Ok(payload) => {
                if tx.send(Ok(to_event(payload))).await.is_err() {
                    return;
                }
            }
            Err(err) => warn!(code = %code, error = %err, "failed to encode SSE handshake"),
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(update) => {
                            let removed = matches!(update, GameUpdate::Removed);
                            match ServerEvent::from_update(&code, update) {
                                Ok(payload) => {
                                    if tx.send(Ok(to_event(payload))).await.is_err() {
                                        break;
                                    }
                                }
                                Err(err) => warn!(code = %code, error = %err, "failed to encode SSE event"),
                            }
                            if removed {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(code = %code, skipped, "SSE subscriber lagging; skipped updates");
                            continue;
                        }
                    }
                }
            }
        }

        info!(code = %code, "game SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
