//! WebSocket transport.
//!
//! Wraps one socket behind three tasks: a writer draining an outbound
//! channel, a reader pushing decoded frames onto the inbound channel, and
//! a keepalive that writes `"\r\n"` every 90 seconds. The reader invokes
//! the error hook at most once and closes the inbound channel on exit, so
//! downstream code learns about transport death through channel closure.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use ch_wire::Frame;

use crate::error::ClientError;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);
const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Called once if the reader dies on an error (not on clean close).
pub type ErrorHook = Box<dyn FnOnce(ClientError) + Send>;

pub(crate) enum Outbound {
    Text(String),
    Pong(Vec<u8>),
}

/// One connected WebSocket.
///
/// `connect` performs the handshake; `sustain` consumes the socket halves
/// and returns the inbound frame channel. `close` cancels all three tasks
/// and closes the socket.
pub struct Transport {
    out_tx: mpsc::Sender<Outbound>,
    halves: Option<(SplitSink<WsStream, Message>, SplitStream<WsStream>)>,
    out_rx: Option<mpsc::Receiver<Outbound>>,
    cancel: CancellationToken,
}

impl Transport {
    /// Open the socket. The fixed Origin header is required by the chat
    /// servers; connections without it are dropped during the handshake.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Origin", HeaderValue::from_static("http://st.chatango.com"));
        let (ws, _response) = connect_async(request).await?;
        debug!(url, "transport connected");

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        Ok(Transport {
            out_tx,
            halves: Some(ws.split()),
            out_rx: Some(out_rx),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawn the reader, writer and keepalive tasks. Returns the inbound
    /// frame channel; it closes when the reader exits for any reason.
    ///
    /// The transport's own lifetime is a child of `session_cancel`: either
    /// cancelling the session or calling [`Transport::close`] tears it
    /// down.
    pub fn sustain(
        &mut self,
        session_cancel: &CancellationToken,
        on_error: ErrorHook,
    ) -> Result<mpsc::Receiver<Frame>, ClientError> {
        let (write, read) = self.halves.take().ok_or(ClientError::AlreadyConnected)?;
        let out_rx = self.out_rx.take().ok_or(ClientError::AlreadyConnected)?;
        self.cancel = session_cancel.child_token();

        let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
        tokio::spawn(writer_task(write, out_rx, self.cancel.clone()));
        tokio::spawn(reader_task(
            read,
            in_tx,
            self.out_tx.clone(),
            self.cancel.clone(),
            on_error,
        ));
        tokio::spawn(keepalive_task(self.out_tx.clone(), self.cancel.clone()));
        Ok(in_rx)
    }

    /// Queue one already-encoded frame for the writer.
    pub async fn send(&self, text: String) -> Result<(), ClientError> {
        self.out_tx
            .send(Outbound::Text(text))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// A cheap handle for sending without holding a lock on the transport.
    pub(crate) fn sender(&self) -> mpsc::Sender<Outbound> {
        self.out_tx.clone()
    }

    pub(crate) async fn send_via(
        tx: &mpsc::Sender<Outbound>,
        text: String,
    ) -> Result<(), ClientError> {
        tx.send(Outbound::Text(text))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    /// Tear the connection down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

async fn writer_task(
    mut write: SplitSink<WsStream, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            cmd = out_rx.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(error) = write.send(Message::Text(text.into())).await {
                        warn!(%error, "websocket write failed");
                        break;
                    }
                }
                Some(Outbound::Pong(data)) => {
                    let _ = write.send(Message::Pong(data.into())).await;
                }
                None => break,
            }
        }
    }
}

async fn reader_task(
    mut read: SplitStream<WsStream>,
    in_tx: mpsc::Sender<Frame>,
    out_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    on_error: ErrorHook,
) {
    let error = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            msg = read.next() => match msg {
                None => break None,
                Some(Err(e)) => break Some(ClientError::from(e)),
                Some(Ok(Message::Text(text))) => {
                    if in_tx.send(Frame::decode(&text)).await.is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = out_tx.send(Outbound::Pong(data.to_vec())).await;
                }
                Some(Ok(Message::Close(_))) => break None,
                Some(Ok(_)) => {}
            }
        }
    };
    if let Some(error) = error {
        warn!(%error, "websocket read failed");
        on_error(error);
    }
    // in_tx drops here; the closed channel is the disconnect signal.
}

async fn keepalive_task(out_tx: mpsc::Sender<Outbound>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                if out_tx.send(Outbound::Text("\r\n".to_owned())).await.is_err() {
                    break;
                }
            }
        }
    }
}
