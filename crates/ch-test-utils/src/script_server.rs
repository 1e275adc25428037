//! A scripted mock Chatango endpoint.
//!
//! Binds to port 0 (random) and runs one step script per accepted
//! connection, so every test spins up its own isolated server and
//! reconnect tests give each connection attempt its own script.
//!
//! # Protocol behavior
//!
//! - `Expect(head)` reads client frames, skipping keepalives and frames
//!   with other heads, until one with the wanted head arrives.
//! - `Send(text)` writes a raw frame; include the terminator.
//! - `Close` drops the connection; a connection whose script ends without
//!   `Close` stays open and silently discards further client frames.
//! - Connections beyond the scripted count are closed immediately.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;

use ch_wire::Frame;

/// One step of a connection script.
pub enum Step {
    /// Read client frames until one with this head arrives.
    Expect(&'static str),
    /// Like [`Step::Expect`], also asserting on the frame's args.
    ExpectWhere(&'static str, fn(&[String]) -> bool),
    /// Write raw text to the client (terminator included).
    Send(String),
    /// Pause the script.
    Idle(Duration),
    /// Drop the connection.
    Close,
}

impl Step {
    pub fn send(text: impl Into<String>) -> Step {
        Step::Send(text.into())
    }
}

/// The scripted server.
pub struct ScriptServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    _task: tokio::task::JoinHandle<()>,
}

impl ScriptServer {
    /// Start with one script per expected connection.
    pub async fn start(scripts: Vec<Vec<Step>>) -> std::io::Result<ScriptServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        let task = tokio::spawn(async move {
            let mut scripts = scripts.into_iter();
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                match scripts.next() {
                    Some(script) => {
                        tokio::spawn(async move {
                            if let Err(e) = run_script(stream, script).await {
                                // Client drops mid-script are normal in
                                // shutdown paths.
                                debug!(error = %e, "script connection ended");
                            }
                        });
                    }
                    None => drop(stream),
                }
            }
        });

        Ok(ScriptServer {
            addr,
            connections,
            _task: task,
        })
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// How many connections have been accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn run_script(
    stream: TcpStream,
    script: Vec<Step>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut ws: WebSocketStream<TcpStream> = tokio_tungstenite::accept_async(stream).await?;
    for step in script {
        match step {
            Step::Expect(head) => {
                expect_frame(&mut ws, head, None).await?;
            }
            Step::ExpectWhere(head, predicate) => {
                expect_frame(&mut ws, head, Some(predicate)).await?;
            }
            Step::Send(text) => {
                ws.send(Message::Text(text.into())).await?;
            }
            Step::Idle(duration) => tokio::time::sleep(duration).await,
            Step::Close => {
                let _ = ws.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
    // Script done; hold the connection open and discard the rest.
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Ping(data)) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    Ok(())
}

async fn expect_frame(
    ws: &mut WebSocketStream<TcpStream>,
    head: &str,
    predicate: Option<fn(&[String]) -> bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    loop {
        let Some(msg) = ws.next().await else {
            return Err(format!("connection closed while expecting {head:?}").into());
        };
        match msg? {
            Message::Text(text) => {
                let frame = Frame::decode(&text);
                if frame.is_pong() || frame.head != head {
                    continue;
                }
                if let Some(pred) = predicate {
                    assert!(
                        pred(&frame.args),
                        "frame {head:?} failed the script's argument assertion: {:?}",
                        frame.args
                    );
                }
                return Ok(());
            }
            Message::Ping(data) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Message::Close(_) => {
                return Err(format!("connection closed while expecting {head:?}").into());
            }
            _ => {}
        }
    }
}

/// The standard `v`/`bauth`/`ok` handshake for a logged-in session.
pub fn group_auth_prelude(session_id: &str, login_name: &str) -> Vec<Step> {
    vec![
        Step::Expect("v"),
        Step::send("v:15:15\x00"),
        Step::Expect("bauth"),
        Step::send(format!(
            "ok:roomowner:{session_id}:M:{login_name}:1700000000:1.2.3.4::0\x00"
        )),
    ]
}

/// `inited` with an empty backfill: the client's history request is
/// answered with `nomore`.
pub fn quiet_history_tail() -> Vec<Step> {
    vec![
        Step::send("inited\x00"),
        Step::Expect("get_more"),
        Step::send("nomore\x00"),
    ]
}
