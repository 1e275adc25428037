//! The per-session frame multiplexer.
//!
//! One listener task owns the read side of the transport. Unsolicited
//! frames are dispatched to the session's per-head handler, each on its
//! own task. A solicited request temporarily takes the read side over:
//! it hands the listener a release token through an unbuffered rendezvous,
//! reads transport frames directly, and re-injects every frame its
//! predicate does not want onto the local push channel. The listener keeps
//! draining the push channel during the take-over window so no ordering is
//! lost, and resumes reading the transport once the token fires.
//!
//! Invariants:
//! - at most one take-over at a time (the rendezvous has no buffer to
//!   speak of, so callers serialize);
//! - no frame is dropped: unwanted frames go back through the push
//!   channel and are processed after release;
//! - session cancellation aborts the listener and any in-flight solicited
//!   call within one channel operation;
//! - a transport that closes mid-call fails the call with
//!   `ConnectionClosed` while the listener runs the reconnect path.

use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ch_wire::Frame;

use crate::error::ClientError;
use crate::transport::Transport;

/// What a solicited predicate tells the read loop after each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Done,
}

/// Channel plumbing shared by the listener and solicited callers.
pub(crate) struct SessionCore {
    pub label: String,
    pub cancel: CancellationToken,
    transport: StdRwLock<Option<Transport>>,
    /// Read side of the transport. The listener holds the lock only while
    /// polling, so a solicited caller acquiring it is exactly the
    /// "listener no longer reads the transport" state.
    inbound: TokioMutex<mpsc::Receiver<Frame>>,
    /// Keeps the placeholder inbound channel open until the first
    /// transport is installed.
    seed_tx: StdMutex<Option<mpsc::Sender<Frame>>>,
    push_tx: mpsc::UnboundedSender<Frame>,
    push_rx: TokioMutex<mpsc::UnboundedReceiver<Frame>>,
    takeover_tx: mpsc::Sender<CancellationToken>,
    takeover_rx: TokioMutex<mpsc::Receiver<CancellationToken>>,
}

impl SessionCore {
    pub fn new(label: String) -> Self {
        let (seed_tx, inbound_rx) = mpsc::channel(1);
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (takeover_tx, takeover_rx) = mpsc::channel(1);
        SessionCore {
            label,
            cancel: CancellationToken::new(),
            transport: StdRwLock::new(None),
            inbound: TokioMutex::new(inbound_rx),
            seed_tx: StdMutex::new(Some(seed_tx)),
            push_tx,
            push_rx: TokioMutex::new(push_rx),
            takeover_tx,
            takeover_rx: TokioMutex::new(takeover_rx),
        }
    }

    /// Swap in a (newly sustained) transport and its inbound channel.
    pub async fn install_transport(&self, transport: Transport, inbound: mpsc::Receiver<Frame>) {
        if let Some(old) = self.transport.write().unwrap().replace(transport) {
            old.close();
        }
        *self.inbound.lock().await = inbound;
        self.seed_tx.lock().unwrap().take();
    }

    /// Close and drop the current transport, if any.
    pub fn drop_transport(&self) {
        if let Some(t) = self.transport.write().unwrap().take() {
            t.close();
        }
    }

    /// Encode and write one frame.
    pub async fn send(&self, frame: &Frame) -> Result<(), ClientError> {
        let tx = self
            .transport
            .read()
            .unwrap()
            .as_ref()
            .map(Transport::sender)
            .ok_or(ClientError::NotConnected)?;
        Transport::send_via(&tx, frame.encode()).await
    }

    /// Re-inject a frame for the dispatch pump.
    pub fn push(&self, frame: Frame) {
        let _ = self.push_tx.send(frame);
    }

    /// Read the next non-pong frame directly from the transport. Only for
    /// code paths that already own the read side (authentication, and the
    /// listener's own recovery).
    pub async fn await_frame(&self, timeout: Duration) -> Result<Frame, ClientError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.inbound.lock().await;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ClientError::ConnectionClosed),
                () = tokio::time::sleep_until(deadline) => return Err(ClientError::Timeout),
                frame = rx.recv() => match frame {
                    None => return Err(ClientError::ConnectionClosed),
                    Some(f) if f.is_pong() => {}
                    Some(f) => return Ok(f),
                }
            }
        }
    }

    /// Run one solicited request: install a take-over, write `req`, then
    /// feed every transport frame to `on_frame` until it reports `Done`,
    /// fails, or the timeout lapses. The predicate re-injects frames it
    /// does not want via [`SessionCore::push`].
    pub async fn sync_send<F>(
        &self,
        req: Frame,
        timeout: Duration,
        mut on_frame: F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(Frame, &SessionCore) -> Result<Step, ClientError> + Send,
    {
        let release = CancellationToken::new();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ClientError::ConnectionClosed),
            sent = self.takeover_tx.send(release.clone()) => {
                if sent.is_err() {
                    return Err(ClientError::ConnectionClosed);
                }
            }
            () = tokio::time::sleep(timeout) => return Err(ClientError::Timeout),
        }
        let result = self.solicit(req, timeout, &mut on_frame).await;
        release.cancel();
        result
    }

    async fn solicit<F>(
        &self,
        req: Frame,
        timeout: Duration,
        on_frame: &mut F,
    ) -> Result<(), ClientError>
    where
        F: FnMut(Frame, &SessionCore) -> Result<Step, ClientError> + Send,
    {
        self.send(&req).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        let mut rx = self.inbound.lock().await;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(ClientError::ConnectionClosed),
                () = tokio::time::sleep_until(deadline) => return Err(ClientError::Timeout),
                frame = rx.recv() => match frame {
                    None => return Err(ClientError::ConnectionClosed),
                    Some(f) if f.is_pong() => {}
                    Some(f) => match on_frame(f, self)? {
                        Step::Done => return Ok(()),
                        Step::Continue => {}
                    },
                }
            }
        }
    }
}

/// What a session does with pumped frames, and how it recovers when the
/// transport dies underneath the listener.
#[async_trait]
pub(crate) trait FrameHandler: Send + Sync + 'static {
    async fn handle_frame(self: Arc<Self>, frame: Frame);
    /// Returns `true` when a new transport was installed and listening
    /// should continue; `false` ends the session.
    async fn recover(self: Arc<Self>) -> bool;
}

/// The listener task. Runs until cancellation or unrecoverable transport
/// loss; dispatches each frame on its own task.
pub(crate) async fn run_listener<H: FrameHandler>(core: Arc<SessionCore>, handler: Arc<H>) {
    let mut push_rx = core.push_rx.lock().await;
    let mut takeover_rx = core.takeover_rx.lock().await;
    loop {
        tokio::select! {
            biased;
            () = core.cancel.cancelled() => break,
            Some(release) = takeover_rx.recv() => {
                // Inner loop: the solicited caller reads the transport;
                // keep draining re-injected frames so ordering holds.
                loop {
                    tokio::select! {
                        biased;
                        () = core.cancel.cancelled() => return,
                        () = release.cancelled() => break,
                        Some(frame) = push_rx.recv() => dispatch(&handler, frame),
                    }
                }
            }
            Some(frame) = push_rx.recv() => dispatch(&handler, frame),
            frame = async { core.inbound.lock().await.recv().await } => match frame {
                Some(f) if f.is_pong() => {}
                Some(f) => dispatch(&handler, f),
                None => {
                    debug!(session = %core.label, "transport closed, entering recovery");
                    if !handler.clone().recover().await {
                        break;
                    }
                }
            }
        }
    }
    debug!(session = %core.label, "listener stopped");
}

fn dispatch<H: FrameHandler>(handler: &Arc<H>, frame: Frame) {
    let handler = handler.clone();
    tokio::spawn(handler.handle_frame(frame));
}
