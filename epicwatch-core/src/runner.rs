//! Async driver for a [`DashboardSession`]
//!
//! [`SessionRunner::run`] owns the session and performs all IO: it fetches
//! full state, opens the event stream, feeds decoded messages through the
//! session and sleeps out reconnect delays. Callers control it through a
//! cloneable [`SessionHandle`] and observe it through a `watch` channel of
//! [`DashboardView`] snapshots.

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};

use crate::client::DashboardClient;
use crate::config::Config;
use crate::error::Result;
use crate::session::{DashboardSession, DashboardView, SessionStats};
use crate::sse::SseDecoder;

/// Requests a [`SessionHandle`] can make of the running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// (Re)open the stream now, superseding any pending reconnect
    Connect,
    /// Refetch the full project state
    Resync,
    /// Stop the session; no reconnect fires afterwards
    Shutdown,
}

/// Control and observation handle for a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<DashboardView>,
}

impl SessionHandle {
    pub fn connect(&self) -> bool {
        self.send(SessionCommand::Connect)
    }

    pub fn resync(&self) -> bool {
        self.send(SessionCommand::Resync)
    }

    pub fn shutdown(&self) -> bool {
        self.send(SessionCommand::Shutdown)
    }

    /// Receiver notified whenever the view changes
    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    /// Latest published view
    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Returns false once the runner has exited.
    fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

/// Why one stream attempt ended
#[derive(Debug)]
enum StreamEnd {
    Clean,
    Failed(String),
    Restart,
    Shutdown,
}

pub struct SessionRunner {
    session: DashboardSession,
    client: DashboardClient,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    view_tx: watch::Sender<DashboardView>,
}

impl SessionRunner {
    /// Build a runner and the handle that controls it
    pub fn new(config: &Config) -> Result<(Self, SessionHandle)> {
        let client = DashboardClient::new(&config.server)?;
        let session = DashboardSession::new(config);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(session.view());

        let runner = Self {
            session,
            client,
            commands: command_rx,
            view_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            view: view_rx,
        };
        Ok((runner, handle))
    }

    /// Drive the session until shutdown or until every handle is dropped.
    pub async fn run(mut self) -> SessionStats {
        tracing::info!(
            events_url = %self.client.events_url(),
            state_url = %self.client.state_url(),
            "Starting dashboard session"
        );
        self.resync().await;

        'session: loop {
            self.session.begin_connect();
            self.publish();

            match self.stream_once().await {
                StreamEnd::Restart => continue,
                StreamEnd::Shutdown => break,
                StreamEnd::Clean => {
                    self.session.on_clean_close();
                    self.publish();

                    // Terminal until someone asks for a new connection
                    loop {
                        match self.commands.recv().await {
                            Some(SessionCommand::Connect) => continue 'session,
                            Some(SessionCommand::Resync) => self.resync().await,
                            Some(SessionCommand::Shutdown) | None => break 'session,
                        }
                    }
                }
                StreamEnd::Failed(reason) => {
                    let scheduled = self.session.on_transport_error(&reason);
                    self.publish();

                    let sleep = tokio::time::sleep(scheduled.delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            biased;
                            command = self.commands.recv() => match command {
                                Some(SessionCommand::Connect) => continue 'session,
                                Some(SessionCommand::Resync) => self.resync().await,
                                Some(SessionCommand::Shutdown) | None => break 'session,
                            },
                            _ = &mut sleep => continue 'session,
                        }
                    }
                }
            }
        }

        self.session.shutdown();
        self.publish();
        self.session.stats()
    }

    async fn stream_once(&mut self) -> StreamEnd {
        let client = self.client.clone();
        let open = client.open_stream();
        tokio::pin!(open);

        let response = loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Connect) => return StreamEnd::Restart,
                    Some(SessionCommand::Resync) => self.resync().await,
                    Some(SessionCommand::Shutdown) | None => return StreamEnd::Shutdown,
                },
                result = &mut open => break result,
            }
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => return StreamEnd::Failed(e.to_string()),
        };

        let outcome = self.session.on_open();
        self.publish();
        if outcome.resync {
            self.resync().await;
        }

        let mut decoder = SseDecoder::new();
        let body = response.bytes_stream();
        tokio::pin!(body);

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Connect) => return StreamEnd::Restart,
                    Some(SessionCommand::Resync) => self.resync().await,
                    Some(SessionCommand::Shutdown) | None => return StreamEnd::Shutdown,
                },
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        let messages = decoder.push(&bytes);
                        if messages.is_empty() {
                            continue;
                        }
                        for message in &messages {
                            self.session.handle_message(message);
                        }
                        self.publish();
                    }
                    Some(Err(e)) => return StreamEnd::Failed(format!("stream read failed: {}", e)),
                    None => {
                        if decoder.has_partial() {
                            tracing::debug!("Stream ended with an undispatched partial message");
                        }
                        return StreamEnd::Clean;
                    }
                },
            }
        }
    }

    async fn resync(&mut self) {
        match self.client.fetch_state().await {
            Ok(tree) => self.session.replace_tree(tree),
            Err(e) => self.session.record_resync_failure(&e),
        }
        self.publish();
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.session.view());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn unreachable_config() -> Config {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = Config::default();
        config.server.base_url = format!("http://127.0.0.1:{}", port);
        config.server.connect_timeout_secs = 1;
        config.server.request_timeout_secs = 1;
        config
    }

    #[tokio::test]
    async fn test_shutdown_stops_runner_while_server_unreachable() {
        crate::logging::init_test();
        let (runner, handle) = SessionRunner::new(&unreachable_config()).unwrap();
        let task = tokio::spawn(runner.run());

        assert!(handle.shutdown());
        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner did not stop")
            .unwrap();

        assert_eq!(stats.resync_failures, 1);
        assert!(handle.view().reconnect.is_none());
        assert!(!handle.connect());
    }

    #[tokio::test]
    async fn test_dropping_every_handle_ends_runner() {
        crate::logging::init_test();
        let (runner, handle) = SessionRunner::new(&unreachable_config()).unwrap();
        let view = handle.subscribe();
        drop(handle);

        let task = tokio::spawn(runner.run());
        let stats = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner did not stop")
            .unwrap();

        // The closed command channel wins over opening the stream
        assert_eq!(stats.transport_errors, 0);
        assert!(view.borrow().reconnect.is_none());
    }
}
