//! Socket tasks: one accept loop, one reader and one writer per connection.
//!
//! These tasks never touch world state. The reader strips telnet noise,
//! frames lines, and appends them to the session's inbound queue; the
//! writer drains the outbound channel. EOF, a read error, or a failed
//! write flips the shared `closed` flag, which the tick loop treats as an
//! implicit quit.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use emberio::line::{Frame, LineFramer};
use emberio::telnet::IacFilter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::session::{NewSession, SessionId, SessionRegistry};

const MAX_LINE_LEN: usize = 1024;
/// Lines a session may have waiting; beyond this the peer is flooding.
const MAX_QUEUED_LINES: usize = 64;

pub async fn accept_loop(listener: TcpListener, registry: SessionRegistry) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(x) => x,
            Err(e) => {
                debug!(err = %e, "accept failed");
                continue;
            }
        };
        info!(peer = %peer, "connection");
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = conn_task(stream, registry).await {
                debug!(peer = %peer, err = %e, "connection ended with error");
            }
        });
    }
}

async fn conn_task(stream: TcpStream, registry: SessionRegistry) -> std::io::Result<()> {
    stream.set_nodelay(true).ok();
    let (mut rd, mut wr) = stream.into_split();

    let sid = SessionId::random();
    let inbound = Arc::new(Mutex::new(VecDeque::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    {
        let mut reg = registry.lock().unwrap_or_else(|e| e.into_inner());
        reg.push(NewSession {
            id: sid,
            inbound: inbound.clone(),
            closed: closed.clone(),
            tx: Some(tx.clone()),
        });
    }

    let closed_w = closed.clone();
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if wr.write_all(&chunk).await.is_err() {
                closed_w.store(true, Ordering::Relaxed);
                break;
            }
        }
        // Sender dropped: the session was cleaned up; let the socket close.
    });

    let mut iac = IacFilter::new();
    let mut framer = LineFramer::new(MAX_LINE_LEN);
    let mut buf = [0u8; 2048];
    let mut data = Vec::new();
    let mut replies = Vec::new();

    loop {
        let n = match rd.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                closed.store(true, Ordering::Relaxed);
                return Err(e);
            }
        };

        data.clear();
        replies.clear();
        iac.filter(&buf[..n], &mut data, &mut replies);
        if !replies.is_empty() {
            let _ = tx.send(Bytes::from(replies.clone()));
        }

        framer.push(&data);
        while let Some((kind, line)) = framer.pop() {
            match kind {
                Frame::Line => {
                    let text = String::from_utf8_lossy(&line).into_owned();
                    let mut q = inbound.lock().unwrap_or_else(|e| e.into_inner());
                    if q.len() >= MAX_QUEUED_LINES {
                        // Drop the flood; the tick loop will catch up.
                        continue;
                    }
                    q.push_back(text);
                }
                Frame::Overlong => {
                    let _ = tx.send(Bytes::from_static(b"line too long.\r\n"));
                }
            }
        }
    }

    closed.store(true, Ordering::Relaxed);
    Ok(())
}
