//! Server network layer handling UDP communications and the scoreboard timers

use crate::config::ServerConfig;
use crate::geo::GeoResolver;
use crate::scoreboard::{Admission, DropReason, Scoreboard};
use crate::scores::CountryScore;
use crate::session_manager::SessionManager;
use crate::store::{flush_scores, FlushReport, PersistenceGateway, StoreError};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, MAX_DATAGRAM_SIZE};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from the receiver and storage tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ScoresLoaded(Result<Vec<CountryScore>, StoreError>),
}

/// Messages sent from the main loop to the network sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet },
}

/// Main server coordinating sessions, admission, broadcast and persistence
///
/// The scoreboard is owned by the loop in `run`, which handles one inbound
/// event or timer tick at a time. Store I/O never runs on that loop: loads
/// report back through `ServerMessage::ScoresLoaded` and flushes are only
/// observed for logging.
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    scoreboard: Scoreboard,
    config: ServerConfig,
    store: Arc<dyn PersistenceGateway>,
    geo: Arc<dyn GeoResolver>,
    load_task: Option<JoinHandle<()>>,
    flush_task: Option<JoinHandle<FlushReport>>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    outbound_tx: mpsc::UnboundedSender<OutboundMessage>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl Server {
    pub async fn new(
        config: ServerConfig,
        store: Arc<dyn PersistenceGateway>,
        geo: Arc<dyn GeoResolver>,
    ) -> Result<Self, ServerError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(SessionManager::new(config.max_sessions))),
            scoreboard: Scoreboard::new(&config),
            config,
            store,
            geo,
            load_task: None,
            flush_task: None,
            server_tx,
            server_rx,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut outbound_rx) = self.outbound_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);
        let sessions = Arc::clone(&self.sessions);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet } => {
                        // Encode once, the payload is the same for everyone
                        let data = match encode_packet(&packet) {
                            Ok(data) => data,
                            Err(e) => {
                                error!("Failed to encode broadcast: {}", e);
                                continue;
                            }
                        };

                        let session_addrs = {
                            let sessions_guard = sessions.read().await;
                            sessions_guard.get_session_addrs()
                        };

                        for (session_id, addr) in session_addrs {
                            if let Err(e) = socket.send_to(&data, addr).await {
                                error!("Failed to send to session {}: {}", session_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that drops sessions gone silent
    ///
    /// Removal happens here under the write lock; the loop keeps no
    /// per-session state of its own.
    fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.session_timeout;

        tokio::spawn(async move {
            let period = timeout.clamp(Duration::from_millis(10), Duration::from_secs(1));
            let mut interval = interval(period);

            loop {
                interval.tick().await;
                if server_tx.is_closed() {
                    break;
                }

                let timed_out = {
                    let mut sessions_guard = sessions.write().await;
                    sessions_guard.check_timeouts(timeout)
                };

                if !timed_out.is_empty() {
                    info!("Dropped {} silent sessions", timed_out.len());
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let data = encode_packet(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outbound_tx.send(OutboundMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self
            .outbound_tx
            .send(OutboundMessage::BroadcastPacket { packet })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    fn send_ban_notice(&self, addr: SocketAddr) {
        let seconds = self.config.ban_duration_secs();
        self.send_packet(Packet::Banned { seconds }, addr);
    }

    /// Starts the bulk read that seeds the scoreboard unless one is running
    fn start_load(&mut self) {
        if self
            .load_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            return;
        }

        let store = Arc::clone(&self.store);
        let server_tx = self.server_tx.clone();

        self.load_task = Some(tokio::spawn(async move {
            let result = store.read_all().await;
            if server_tx.send(ServerMessage::ScoresLoaded(result)).is_err() {
                error!("Server loop gone before scores were loaded");
            }
        }));
    }

    /// Dispatches one message from the network or storage tasks
    async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::PacketReceived { packet, addr } => {
                self.handle_packet(packet, addr).await;
            }
            ServerMessage::ScoresLoaded(Ok(records)) => {
                if self.scoreboard.is_loaded() {
                    warn!("Ignoring duplicate score load");
                } else {
                    self.scoreboard.load(records);
                    self.check_scoreboard_fits();
                }
            }
            ServerMessage::ScoresLoaded(Err(e)) => {
                error!(
                    "Failed to load scores: {}; updates are dropped until a load succeeds",
                    e
                );
            }
        }
    }

    /// Processes incoming packets and routes updates through admission
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect => {
                let country = self.geo.resolve(canonical_ip(addr));

                let session_id = {
                    let mut sessions = self.sessions.write().await;
                    // A reconnect from the same endpoint replaces the old session
                    if let Some(existing_id) = sessions.find_session_by_addr(addr) {
                        info!("Replacing session {} from {}", existing_id, addr);
                        sessions.remove_session(&existing_id);
                    }
                    sessions.add_session(addr, country.clone())
                };

                if session_id.is_none() {
                    warn!("Rejecting connection from {}: server full", addr);
                    return;
                }

                if self.scoreboard.is_banned(canonical_ip(addr)) {
                    self.send_ban_notice(addr);
                }

                self.send_packet(Packet::Country { country }, addr);

                if let Some(scores) = self.scoreboard.snapshot() {
                    self.send_packet(Packet::Scoreboard { scores }, addr);
                }
            }

            Packet::Update { score } => {
                let country = {
                    let mut sessions = self.sessions.write().await;
                    let Some(session_id) = sessions.find_session_by_addr(addr) else {
                        debug!("Update from {} without a session", addr);
                        return;
                    };
                    sessions.touch(&session_id);
                    sessions.get(&session_id).map(|session| session.country.clone())
                };
                let Some(country) = country else {
                    return;
                };

                let admission = self
                    .scoreboard
                    .submit_update(canonical_ip(addr), &country, score);

                match admission {
                    Admission::Dropped(DropReason::NotLoaded) => {
                        warn!("Dropping update from {}: scores not loaded", addr);
                    }
                    Admission::Dropped(reason) => {
                        debug!("Dropping update of {} from {}: {:?}", score, addr, reason);
                    }
                    _ => {}
                }

                if admission.notifies_ban() {
                    self.send_ban_notice(addr);
                }
            }

            Packet::Heartbeat => {
                let mut sessions = self.sessions.write().await;
                if let Some(session_id) = sessions.find_session_by_addr(addr) {
                    sessions.touch(&session_id);
                }
            }

            Packet::Disconnect => {
                let mut sessions = self.sessions.write().await;
                if let Some(session_id) = sessions.find_session_by_addr(addr) {
                    sessions.remove_session(&session_id);
                }
            }

            Packet::Country { .. } | Packet::Scoreboard { .. } | Packet::Banned { .. } => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Warns when the loaded scoreboard no longer fits in one datagram
    ///
    /// Broadcasts and connect-time scoreboards fail for as long as this holds.
    fn check_scoreboard_fits(&self) -> bool {
        let Some(scores) = self.scoreboard.snapshot() else {
            return true;
        };
        match encode_packet(&Packet::Scoreboard { scores }) {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "Loaded scoreboard of {} countries cannot be sent: {}",
                    self.scoreboard.scores().len(),
                    e
                );
                false
            }
        }
    }

    /// Broadcasts the current scoreboard to all sessions
    ///
    /// Nothing is sent until the scoreboard has been loaded.
    fn broadcast_scoreboard(&self) {
        let Some(scores) = self.scoreboard.snapshot() else {
            return;
        };
        self.broadcast_packet(Packet::Scoreboard { scores });
    }

    /// Writes the scoreboard back to the store without waiting for it
    ///
    /// While unloaded this retries the initial load instead, since flushing
    /// an unseeded cache would overwrite the stored totals. A cycle is
    /// skipped while the previous flush is still writing.
    fn flush_scoreboard(&mut self) {
        if !self.scoreboard.is_loaded() {
            self.start_load();
            return;
        }

        if self
            .flush_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
        {
            debug!("Previous flush still running, skipping this cycle");
            return;
        }

        let Some(scores) = self.scoreboard.persist_snapshot() else {
            return;
        };

        let store = Arc::clone(&self.store);
        self.flush_task = Some(tokio::spawn(flush_scores(store, scores)));
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), ServerError> {
        // Initialize concurrent tasks
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();
        self.start_load();

        let mut broadcast_interval = interval(self.config.broadcast_interval);
        broadcast_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut flush_interval = interval(self.config.flush_interval);
        flush_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Both fire immediately; the load has only just started
        broadcast_interval.tick().await;
        flush_interval.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Handle network and storage events
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = broadcast_interval.tick() => {
                    self.broadcast_scoreboard();

                    let session_count = self.sessions.read().await.len();
                    debug!(
                        "Broadcast: {} sessions, {} countries, {} tracked addresses",
                        session_count,
                        self.scoreboard.scores().len(),
                        self.scoreboard.bans().len()
                    );
                },

                _ = flush_interval.tick() => {
                    self.flush_scoreboard();
                },
            }
        }

        Ok(())
    }
}

fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ServerError> {
    let data = serialize(packet)?;
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(format!("packet of {} bytes exceeds datagram limit", data.len()).into());
    }
    Ok(data)
}

/// Source IP used for bans and geolocation, with IPv4-mapped IPv6 unwrapped
pub fn canonical_ip(addr: SocketAddr) -> IpAddr {
    match addr.ip() {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr.ip(), IpAddr::V4),
        ip => ip,
    }
}
