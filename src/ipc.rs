//! Status GUI IPC (spec §6 IPC protocol, `--show-status`).
//!
//! The running agent and a separate status-GUI process talk over a small
//! line-delimited JSON protocol on a loopback TCP socket
//! (`127.0.0.1:19847`): each line is one `Envelope`, tagged by `type`, of
//! `statusMessage`/`detailMessage`/`percentProgress`/`displayLog`/`quit`.
//! Every connected reader gets every envelope published after it connects,
//! in order; a reader that falls behind or disconnects never blocks the
//! publisher (`tokio::sync::broadcast`'s lagging-receiver semantics already
//! give us "loss-tolerant", not "every reader keeps up or the agent
//! stalls"). A freshly connected reader also gets the most recently
//! published envelope replayed immediately, so a `--show-status` snapshot
//! doesn't have to wait for the next phase transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Fixed loopback port the status GUI connects to (spec §6).
pub const STATUS_PORT: u16 = 19847;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Fetching,
    Probing,
    Installing,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMessage {
    pub updated_at: DateTime<Utc>,
    pub phase: Phase,
    pub current_item: Option<String>,
    pub items_done: usize,
    pub items_total: usize,
    pub pid: u32,
}

/// One line of the wire protocol (spec §6: `{type, data?, percent?,
/// error?}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Envelope {
    StatusMessage { data: StatusMessage },
    DetailMessage { data: String },
    PercentProgress { percent: f64 },
    DisplayLog { data: String },
    Quit {},
}

impl Envelope {
    fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).expect("Envelope always serializes");
        line.push('\n');
        line
    }
}

/// Publishes `Envelope`s to every connected status-GUI reader. Binding the
/// listener can fail (another process already holds the port); when it
/// does, `publish` calls still succeed, they just have no subscribers —
/// a status GUI is observability, not a run dependency.
pub struct StatusPublisher {
    tx: broadcast::Sender<String>,
    last: Arc<Mutex<Option<String>>>,
}

impl StatusPublisher {
    /// Binds the loopback listener and starts accepting status-GUI
    /// connections in the background.
    pub async fn bind() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        let last: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        match TcpListener::bind((Ipv4Addr::LOCALHOST, STATUS_PORT)).await {
            Ok(listener) => {
                let tx = tx.clone();
                let last = last.clone();
                tokio::spawn(accept_loop(listener, tx, last));
            }
            Err(e) => {
                tracing::warn!(error = %e, "status GUI listener unavailable, continuing without one");
            }
        }

        StatusPublisher { tx, last }
    }

    /// Test/no-listener constructor: fans out to subscribers in-process
    /// without ever binding a socket.
    #[cfg(test)]
    fn detached() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        StatusPublisher {
            tx,
            last: Arc::new(Mutex::new(None)),
        }
    }

    fn send(&self, envelope: &Envelope) {
        let line = envelope.to_line();
        *self.last.lock().unwrap() = Some(line.clone());
        let _ = self.tx.send(line);
    }

    pub fn publish(&self, status: &StatusMessage) {
        self.send(&Envelope::StatusMessage { data: status.clone() });
    }

    pub fn detail(&self, message: impl Into<String>) {
        self.send(&Envelope::DetailMessage { data: message.into() });
    }

    pub fn percent(&self, percent: f64) {
        self.send(&Envelope::PercentProgress { percent });
    }

    pub fn display_log(&self, line: impl Into<String>) {
        self.send(&Envelope::DisplayLog { data: line.into() });
    }

    /// Tells every connected status GUI the run is over (spec §6 `quit`).
    pub fn quit(&self) {
        self.send(&Envelope::Quit {});
    }

    #[cfg(test)]
    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

async fn accept_loop(listener: TcpListener, tx: broadcast::Sender<String>, last: Arc<Mutex<Option<String>>>) {
    loop {
        let Ok((mut socket, _)) = listener.accept().await else {
            continue;
        };
        let mut rx = tx.subscribe();
        let snapshot = last.lock().unwrap().clone();
        tokio::spawn(async move {
            if let Some(line) = snapshot {
                if socket.write_all(line.as_bytes()).await.is_err() {
                    return;
                }
            }
            while let Ok(line) = rx.recv().await {
                if socket.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
    }
}

/// `--show-status`: connects to a running agent's status listener, prints
/// the most recently published envelope, and exits. Synchronous/std-only
/// since this runs before `main` has any reason to start the async runtime.
pub fn show_status() -> i32 {
    use std::io::{BufRead, BufReader};
    use std::net::TcpStream;
    use std::time::Duration;

    let addr = (Ipv4Addr::LOCALHOST, STATUS_PORT);
    let stream = match TcpStream::connect_timeout(&addr.into(), Duration::from_millis(500)) {
        Ok(stream) => stream,
        Err(_) => {
            eprintln!("no status has been published yet");
            return 1;
        }
    };
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) | Err(_) => {
            eprintln!("no status has been published yet");
            1
        }
        Ok(_) => match serde_json::from_str::<Envelope>(line.trim()) {
            Ok(envelope) => {
                println!("{}", serde_json::to_string_pretty(&envelope).unwrap());
                0
            }
            Err(e) => {
                eprintln!("received malformed status line: {e}");
                1
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_subscribers() {
        let publisher = StatusPublisher::detached();
        let mut rx = publisher.subscribe();

        publisher.publish(&StatusMessage {
            updated_at: Utc::now(),
            phase: Phase::Installing,
            current_item: Some("Firefox".to_string()),
            items_done: 2,
            items_total: 5,
            pid: std::process::id(),
        });

        let line = rx.recv().await.unwrap();
        let envelope: Envelope = serde_json::from_str(line.trim()).unwrap();
        match envelope {
            Envelope::StatusMessage { data } => {
                assert_eq!(data.phase, Phase::Installing);
                assert_eq!(data.items_done, 2);
            }
            other => panic!("expected StatusMessage, got {other:?}"),
        }
    }

    #[test]
    fn envelope_tags_match_wire_protocol_names() {
        let cases = [
            (
                Envelope::StatusMessage {
                    data: StatusMessage {
                        updated_at: Utc::now(),
                        phase: Phase::Starting,
                        current_item: None,
                        items_done: 0,
                        items_total: 0,
                        pid: 1,
                    },
                },
                "statusMessage",
            ),
            (Envelope::DetailMessage { data: "x".to_string() }, "detailMessage"),
            (Envelope::PercentProgress { percent: 50.0 }, "percentProgress"),
            (Envelope::DisplayLog { data: "line".to_string() }, "displayLog"),
            (Envelope::Quit {}, "quit"),
        ];
        for (envelope, expected_type) in cases {
            let json: serde_json::Value = serde_json::from_str(&envelope.to_line()).unwrap();
            assert_eq!(json["type"], expected_type);
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_retained_snapshot_on_connect() {
        let publisher = StatusPublisher::detached();
        publisher.publish(&StatusMessage {
            updated_at: Utc::now(),
            phase: Phase::Probing,
            current_item: None,
            items_done: 0,
            items_total: 3,
            pid: std::process::id(),
        });
        let retained = publisher.last.lock().unwrap().clone();
        assert!(retained.is_some());
    }
}
