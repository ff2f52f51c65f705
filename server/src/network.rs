//! Server network layer: TCP multiplexing, the tick loop and the admin channel

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, SessionError};
use crate::players::{PlayerRegistry, PlayerSummary, RemovalReason};
use crate::session::Session;
use log::{debug, info, warn};
use shared::{FrameBuffer, Identity};
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::Poll;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Bytes read from a socket per `try_read` call.
const READ_CHUNK: usize = 4096;
/// Reads per connection per tick, so one chatty peer cannot stall the loop.
const MAX_READS_PER_TICK: usize = 16;
/// Connections with more unsent bytes than this get no new output.
const OUTBOX_HIGH_WATER: usize = 64 * 1024;
/// How long a closed connection may take to drain its last bytes.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A player's TCP stream with its unsent output and partial input.
#[derive(Debug)]
pub struct TcpConnection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    outbox: Vec<u8>,
    inbound: FrameBuffer,
}

/// Result of draining a readable socket.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub frames: Vec<String>,
    /// The peer closed its end; frames read before that are still valid.
    pub closed: bool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream: Some(stream),
            peer,
            outbox: Vec::new(),
            inbound: FrameBuffer::new(),
        }
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    /// Reads everything currently available without blocking.
    pub fn read_frames(&mut self) -> io::Result<ReadOutcome> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        let mut buffer = [0u8; READ_CHUNK];
        let mut closed = false;
        for _ in 0..MAX_READS_PER_TICK {
            match stream.try_read(&mut buffer) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(len) => self.inbound.push(&buffer[..len]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(ReadOutcome {
            frames: self.inbound.drain_frames(),
            closed,
        })
    }

    /// Writes as much of the outbox as the socket takes right now.
    fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        while !self.outbox.is_empty() {
            match stream.try_write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(len) => {
                    self.outbox.drain(..len);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.stream.is_none() {
            return Err(io::ErrorKind::NotConnected.into());
        }
        self.outbox.extend_from_slice(frame);
        self.flush()
    }

    /// Hands the stream and whatever is still unsent to a background task
    /// that writes it out and shuts the socket down.
    ///
    /// A freshly accepted stream is not known to be writable yet, so the
    /// goodbye frame usually cannot go out synchronously.
    fn close(&mut self) {
        if let Err(e) = self.flush() {
            debug!("Dropping {} unsent bytes to {}: {}", self.outbox.len(), self.peer, e);
            self.outbox.clear();
        }
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let outbox = std::mem::take(&mut self.outbox);
        let peer = self.peer;

        let Ok(runtime) = Handle::try_current() else {
            debug!("Closed connection to {} with {} bytes unsent", peer, outbox.len());
            return;
        };
        runtime.spawn(async move {
            let goodbye = async {
                stream.write_all(&outbox).await?;
                stream.shutdown().await
            };
            match timeout(CLOSE_GRACE, goodbye).await {
                Ok(Ok(())) => debug!("Closed connection to {}", peer),
                Ok(Err(e)) => debug!("Closing connection to {} failed: {}", peer, e),
                Err(_) => debug!("Gave up flushing {} after {:?}", peer, CLOSE_GRACE),
            }
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Offline,
    Initializing,
    Connected,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ServerState::Offline => "OFFLINE",
            ServerState::Initializing => "INITIALIZING",
            ServerState::Connected => "CONNECTED",
        };
        f.write_str(state)
    }
}

/// Requests funneled into the tick loop
#[derive(Debug)]
pub enum AdminCommand {
    Kick {
        identity: Identity,
        reply: oneshot::Sender<bool>,
    },
    ListPlayers {
        reply: oneshot::Sender<Vec<PlayerSummary>>,
    },
    Stop,
}

/// Cloneable remote control for a [`Server`].
///
/// Requests are handled at the start of the next tick, so they only get an
/// answer while the server loop is running.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<AdminCommand>,
    state: watch::Receiver<ServerState>,
}

impl ServerHandle {
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Waits until the server reaches `target`; false if the server is gone.
    pub async fn wait_for(&self, target: ServerState) -> bool {
        let mut state = self.state.clone();
        let reached = state.wait_for(|current| *current == target).await.is_ok();
        reached
    }

    /// Removes a player; false if nobody holds that identity.
    pub async fn kick(&self, identity: Identity) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .commands
            .send(AdminCommand::Kick { identity, reply })
            .is_err()
        {
            return false;
        }
        response.await.unwrap_or(false)
    }

    pub async fn list_players(&self) -> Vec<PlayerSummary> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(AdminCommand::ListPlayers { reply }).is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    pub fn stop(&self) {
        if self.commands.send(AdminCommand::Stop).is_err() {
            debug!("Stop requested after the server was dropped");
        }
    }
}

/// Connections that became ready during one poll.
#[derive(Debug, Default)]
struct Readiness {
    accepted: Option<(TcpStream, SocketAddr)>,
    readable: Vec<Identity>,
    writable: Vec<Identity>,
}

impl Readiness {
    fn is_empty(&self) -> bool {
        self.accepted.is_none() && self.readable.is_empty() && self.writable.is_empty()
    }
}

/// Main server owning the listener, the session and the tick loop
pub struct Server {
    config: ServerConfig,
    session: Session<TcpConnection>,
    listener: Option<TcpListener>,
    state: watch::Sender<ServerState>,
    commands_tx: mpsc::UnboundedSender<AdminCommand>,
    commands_rx: mpsc::UnboundedReceiver<AdminCommand>,
    tick: u64,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ServerState::Offline);

        Server {
            session: Session::new(config.max_players),
            config,
            listener: None,
            state,
            commands_tx,
            commands_rx,
            tick: 0,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            commands: self.commands_tx.clone(),
            state: self.state.subscribe(),
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ServerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Server state {} -> {}", previous, state);
        }
    }

    pub fn session(&self) -> &Session<TcpConnection> {
        &self.session
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Binds the listening socket. Calling it on a running server returns
    /// the address it already listens on.
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }

        self.set_state(ServerState::Initializing);
        let address = self.config.address();
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(source) => {
                self.set_state(ServerState::Offline);
                return Err(ServerError::Bind { address, source });
            }
        };

        let local = listener.local_addr()?;
        info!("Server listening on {}", local);
        self.listener = Some(listener);
        self.set_state(ServerState::Connected);
        Ok(local)
    }

    /// Starts the server if needed and ticks until it is stopped.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.start().await?;

        let mut tick_interval = interval(self.config.tick_duration());
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started at {} ticks/s", self.config.tick_rate);
        while self.state() == ServerState::Connected {
            tick_interval.tick().await;
            self.tick().await;
        }

        info!("Server loop finished after {} ticks", self.tick);
        Ok(())
    }

    /// One pass of the loop: admin requests, lasers, input, accept, output.
    pub async fn tick(&mut self) {
        self.drain_commands();
        if self.state() != ServerState::Connected {
            return;
        }
        self.tick += 1;

        self.session.advance_lasers();

        let readiness = poll_readiness(
            self.listener.as_ref(),
            self.session.players(),
            self.config.poll_wait,
        )
        .await;

        let mut dead = Vec::new();
        for identity in &readiness.readable {
            if !self.read_from(*identity) {
                dead.push(*identity);
            }
        }

        if let Some((stream, peer)) = readiness.accepted {
            self.accept(stream, peer);
        }

        self.session.sweep_lasers();

        let players = self.session.players();
        let writable: Vec<Identity> = readiness
            .writable
            .into_iter()
            .filter(|identity| !dead.contains(identity))
            .filter(|identity| {
                players
                    .get(*identity)
                    .map_or(false, |player| player.connection().outbox_len() <= OUTBOX_HIGH_WATER)
            })
            .collect();

        for (identity, e) in self.session.flush_outbound(&writable) {
            debug!("Write to player {} failed: {}", identity, e);
            dead.push(identity);
        }

        for identity in dead {
            self.session.disconnect(identity, RemovalReason::ConnectionLost);
        }

        let report_every = u64::from(self.config.tick_rate.max(1)) * 10;
        if self.tick % report_every == 0 {
            debug!(
                "Tick {}: {} players, {} lasers",
                self.tick,
                self.session.players().len(),
                self.session.lasers().len()
            );
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                AdminCommand::Kick { identity, reply } => {
                    let kicked = self.session.kick(identity);
                    if !kicked {
                        warn!("Kick requested for unknown player {}", identity);
                    }
                    let _ = reply.send(kicked);
                }
                AdminCommand::ListPlayers { reply } => {
                    let _ = reply.send(self.session.list_players());
                }
                AdminCommand::Stop => {
                    self.stop();
                }
            }
        }
    }

    /// Reads and dispatches a player's input; false once the peer is gone.
    fn read_from(&mut self, identity: Identity) -> bool {
        let Some(connection) = self.session.connection_mut(identity) else {
            return true;
        };

        let outcome = match connection.read_frames() {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Read from player {} failed: {}", identity, e);
                return false;
            }
        };

        for frame in &outcome.frames {
            match self.session.handle_frame(identity, frame) {
                Ok(()) => {}
                Err(e @ SessionError::Malformed { .. }) => {
                    warn!("Discarding frame from player {}: {}", identity, e)
                }
                Err(e) => debug!("Ignoring frame from player {}: {}", identity, e),
            }
        }

        if outcome.closed {
            debug!("Player {} hung up", identity);
        }
        !outcome.closed
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle for {}: {}", peer, e);
        }

        match self.session.connect(TcpConnection::new(stream, peer)) {
            Ok(identity) => info!("Accepted {} as player {}", peer, identity),
            Err(e) => warn!("Rejected connection from {}: {}", peer, e),
        }
    }

    /// Disconnects everyone and releases the listener; returns how many
    /// players were connected. Safe to call more than once.
    pub fn stop(&mut self) -> usize {
        if self.state() == ServerState::Offline {
            return 0;
        }

        let removed = self.session.shutdown();
        self.listener = None;
        self.set_state(ServerState::Offline);
        info!("Server stopped, {} players disconnected", removed);
        removed
    }
}

/// Waits up to `wait` for the listener or any player socket to become ready.
async fn poll_readiness(
    listener: Option<&TcpListener>,
    players: &PlayerRegistry<TcpConnection>,
    wait: Duration,
) -> Readiness {
    let ready = poll_fn(|cx| {
        let mut readiness = Readiness::default();

        if let Some(listener) = listener {
            match listener.poll_accept(cx) {
                Poll::Ready(Ok(accepted)) => readiness.accepted = Some(accepted),
                Poll::Ready(Err(e)) => warn!("Accept failed: {}", e),
                Poll::Pending => {}
            }
        }

        for player in players.iter() {
            let Some(stream) = player.connection().stream() else {
                continue;
            };
            if stream.poll_read_ready(cx).is_ready() {
                readiness.readable.push(player.identity());
            }
            if stream.poll_write_ready(cx).is_ready() {
                readiness.writable.push(player.identity());
            }
        }

        if readiness.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(readiness)
        }
    });

    timeout(wait, ready).await.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> ServerConfig {
        ServerConfig {
            port: 0,
            tick_rate: 100,
            poll_wait: Duration::from_millis(2),
            ..ServerConfig::default()
        }
    }

    fn id(value: u8) -> Identity {
        Identity::new(value).unwrap()
    }

    struct TestClient {
        stream: TcpStream,
        buffer: FrameBuffer,
        seen: Vec<String>,
        closed: bool,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            Self {
                stream: TcpStream::connect(addr).await.unwrap(),
                buffer: FrameBuffer::new(),
                seen: Vec::new(),
                closed: false,
            }
        }

        async fn send(&mut self, frames: &[&str]) {
            self.stream
                .write_all(frames.concat().as_bytes())
                .await
                .unwrap();
        }

        /// Collects whatever the server already wrote.
        async fn poll(&mut self) {
            let mut buf = [0u8; 4096];
            while !self.closed {
                match timeout(Duration::from_millis(10), self.stream.read(&mut buf)).await {
                    Ok(Ok(0)) | Ok(Err(_)) => self.closed = true,
                    Ok(Ok(len)) => self.buffer.push(&buf[..len]),
                    Err(_) => break,
                }
            }
            self.seen.extend(self.buffer.drain_frames());
        }

        /// Polls until the server hangs up; false if it never does.
        async fn wait_closed(&mut self) -> bool {
            for _ in 0..100 {
                self.poll().await;
                if self.closed {
                    return true;
                }
            }
            false
        }

        fn has_seen(&self, frame: &str) -> bool {
            self.seen.iter().any(|seen| seen == frame)
        }
    }

    async fn tick_until(server: &mut Server, done: impl Fn(&Server) -> bool) -> bool {
        for _ in 0..200 {
            server.tick().await;
            if done(server) {
                return true;
            }
        }
        false
    }

    async fn receive_until(server: &mut Server, client: &mut TestClient, frame: &str) -> bool {
        for _ in 0..100 {
            server.tick().await;
            client.poll().await;
            if client.has_seen(frame) {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let mut server = Server::new(test_config());
        let handle = server.handle();
        assert_eq!(handle.state(), ServerState::Offline);

        let addr = server.start().await.unwrap();
        assert_eq!(handle.state(), ServerState::Connected);
        assert_eq!(server.local_addr(), Some(addr));
        assert_eq!(server.start().await.unwrap(), addr);

        assert_eq!(server.stop(), 0);
        assert_eq!(handle.state(), ServerState::Offline);
        assert_eq!(server.local_addr(), None);
        assert_eq!(server.stop(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let mut first = Server::new(test_config());
        let addr = first.start().await.unwrap();

        let mut second = Server::new(ServerConfig {
            port: addr.port(),
            ..test_config()
        });
        let result = second.start().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));
        assert_eq!(second.state(), ServerState::Offline);
    }

    #[tokio::test]
    async fn test_bootstrap_over_tcp() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);
        alice
            .send(&["+c255000000", "+nAlice", "+p01000200", "+h100"])
            .await;
        assert!(
            tick_until(&mut server, |s| s
                .session()
                .players()
                .get(id(0))
                .map_or(false, |player| player.status()))
            .await
        );

        let mut bob = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 2).await);
        assert!(receive_until(&mut server, &mut bob, "00h100").await);

        assert!(bob.has_seen("u"));
        assert!(bob.has_seen("00c255000000"));
        // The reassembler trims padding off received names.
        assert!(bob.has_seen("00nAlice"));
        assert!(bob.has_seen("00p01000200"));
    }

    #[tokio::test]
    async fn test_hangup_is_announced() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);
        let bob = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 2).await);

        drop(bob);
        assert!(receive_until(&mut server, &mut alice, "01z").await);
        assert_eq!(server.session().players().len(), 1);
    }

    #[tokio::test]
    async fn test_quit_frame_closes_connection() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);

        alice.send(&["+x"]).await;
        assert!(receive_until(&mut server, &mut alice, "x").await);
        assert!(server.session().players().is_empty());

        alice.poll().await;
        assert!(alice.closed);
    }

    #[tokio::test]
    async fn test_garbage_does_not_disconnect() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        let mut bob = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 2).await);

        alice.send(&["+q123", "+p12", "+h042"]).await;
        assert!(receive_until(&mut server, &mut bob, "00h042").await);
        assert_eq!(server.session().players().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_says_goodbye() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);

        assert_eq!(server.stop(), 1);
        assert!(alice.wait_closed().await);
        assert!(alice.has_seen("x"));
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_kick_in_accepting_tick_says_goodbye() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);

        // No output pass has reached the new stream yet.
        let (reply, response) = oneshot::channel();
        server
            .commands_tx
            .send(AdminCommand::Kick {
                identity: id(0),
                reply,
            })
            .unwrap();
        server.tick().await;
        assert!(response.await.unwrap());
        assert!(server.session().players().is_empty());

        assert!(alice.wait_closed().await);
        assert_eq!(alice.seen, vec!["x"]);
    }

    #[tokio::test]
    async fn test_full_server_says_goodbye() {
        let mut server = Server::new(ServerConfig {
            max_players: 1,
            ..test_config()
        });
        let addr = server.start().await.unwrap();

        let mut alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);

        let mut late = TestClient::connect(addr).await;
        for _ in 0..20 {
            server.tick().await;
        }
        assert!(late.wait_closed().await);
        assert!(late.has_seen("x"));

        alice.poll().await;
        assert!(!alice.closed);
        assert_eq!(server.session().players().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_commands_run_on_tick() {
        let mut server = Server::new(test_config());
        let addr = server.start().await.unwrap();
        let handle = server.handle();

        let _alice = TestClient::connect(addr).await;
        assert!(tick_until(&mut server, |s| s.session().players().len() == 1).await);

        let kicker = handle.clone();
        let kick = tokio::spawn(async move { kicker.kick(Identity::new(0).unwrap()).await });
        assert!(tick_until(&mut server, |s| s.session().players().is_empty()).await);
        assert!(kick.await.unwrap());

        handle.stop();
        server.tick().await;
        assert_eq!(server.state(), ServerState::Offline);
    }
}
