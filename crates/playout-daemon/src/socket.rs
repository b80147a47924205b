//! Control-surface bridge: length-prefixed JSON frames over TCP.
//!
//! Clients get a `Hello` with the current snapshot on connect, then a
//! `State` frame whenever the snapshot changes and `Log`/`Error` frames for
//! warnings and errors.  Every `Command` frame is forwarded to the core.

use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use playout_proto::protocol::{Broadcast, Message, PROTOCOL_VERSION};
use playout_proto::state::StateManager;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// Largest frame body a client may announce.
pub const MAX_FRAME_LEN: usize = 1 << 20;

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind control socket {}: {}", addr, e);
                return;
            }
        };

        info!("Control surface listening at {}", addr);
        serve(listener, state_manager, event_tx, broadcast_tx).await;
    })
}

/// Accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) {
    let mut client_id = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                info!("Control client {} connected from {}", id, peer);

                let sm = state_manager.clone();
                let evt_tx = event_tx.clone();
                let bcast_rx = broadcast_tx.subscribe();
                tokio::spawn(async move {
                    handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                    info!("Control client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    if let Ok(encoded) = encode_hello(&state_manager).await {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            let Some(len) = announced_len(&read_buf) else {
                                break;
                            };
                            if len > MAX_FRAME_LEN {
                                warn!(
                                    "Control client {} announced a {} byte frame, closing",
                                    client_id, len
                                );
                                return;
                            }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("Control client {} sent {:?}", client_id, cmd);

                                    if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                                        warn!("DaemonEvent channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => {
                                    // Partial frame: wait for more bytes.
                                    if read_buf.len() >= 4 + len {
                                        warn!("Control client {} sent a malformed frame", client_id);
                                        return;
                                    }
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from control client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(BroadcastMessage::StateUpdated) => {
                        if let Ok(encoded) = encode_state(&state_manager).await {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(BroadcastMessage::Log { error, message }) => {
                        let broadcast = if error {
                            Broadcast::Error { message }
                        } else {
                            Broadcast::Log { message }
                        };
                        if let Ok(encoded) = Message::Broadcast(broadcast).encode() {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Control client {} missed {} broadcast messages", client_id, n);
                        if let Ok(encoded) = encode_state(&state_manager).await {
                            let _ = write_half.write_all(&encoded).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}

/// Body length from the frame header, once the header is in.
fn announced_len(buf: &[u8]) -> Option<usize> {
    let header: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(header) as usize)
}

async fn encode_hello(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    let rev = state.rev;
    Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        rev,
        state,
    })
    .encode()
}

async fn encode_state(state_manager: &StateManager) -> anyhow::Result<Vec<u8>> {
    let state = state_manager.get_state().await;
    Message::Broadcast(Broadcast::State { data: state }).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use playout_proto::protocol::{Command, Gesture};

    async fn read_frame(stream: &mut TcpStream) -> Message {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&body);
        Message::decode(&frame).unwrap().0
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_the_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state_manager = Arc::new(StateManager::new(
            std::env::temp_dir().join("playout-socket-oversized.json"),
        ));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        tokio::spawn(serve(listener, state_manager, event_tx, broadcast_tx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        read_frame(&mut client).await;

        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        // Closed by the daemon without waiting for the body.
        let mut rest = Vec::new();
        assert!(matches!(client.read_to_end(&mut rest).await, Ok(0) | Err(_)));
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_announced_len() {
        assert_eq!(announced_len(&[0, 0]), None);
        assert_eq!(announced_len(&[0, 0, 1, 0, 7]), Some(256));
    }

    #[tokio::test]
    async fn test_hello_then_commands_reach_core() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state_manager = Arc::new(StateManager::new(
            std::env::temp_dir().join("playout-socket-test.json"),
        ));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (broadcast_tx, _) = broadcast::channel(8);
        tokio::spawn(serve(listener, state_manager, event_tx, broadcast_tx.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        match read_frame(&mut client).await {
            Message::Broadcast(Broadcast::Hello {
                protocol_version, ..
            }) => assert_eq!(protocol_version, PROTOCOL_VERSION),
            other => panic!("expected hello, got {:?}", other),
        }

        let frame = Message::Command(Command::Gesture {
            gesture: Gesture::Up,
        })
        .encode()
        .unwrap();
        client.write_all(&frame).await.unwrap();
        match event_rx.recv().await {
            Some(DaemonEvent::ClientCommand(Command::Gesture { gesture })) => {
                assert_eq!(gesture, Gesture::Up)
            }
            other => panic!("unexpected {:?}", other),
        }

        broadcast_tx
            .send(BroadcastMessage::Log {
                error: true,
                message: "boom".into(),
            })
            .unwrap();
        match read_frame(&mut client).await {
            Message::Broadcast(Broadcast::Error { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
