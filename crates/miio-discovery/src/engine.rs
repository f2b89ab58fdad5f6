//! The blocking discovery engine.
//!
//! One [`DiscoveryEngine`] runs one session at a time over a socket it
//! opens on entry and drops on exit. The protocol is connectionless and
//! lossy, so the engine never retries an individual packet; it re-sends
//! whole probe rounds until the session deadline and treats every failure
//! below the session level (a dropped probe, a garbled response, a
//! transient receive error) as something the next round will heal.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, info, warn};

use miio_proto::{
    build_handshake, build_info_request, build_probe, parse_response, DeviceId, DeviceRecord,
    DEFAULT_PORT, PACKET_SIZE,
};

// ── Constants ───────────────────────────────────────────────────────────────

/// Pause between probe rounds within a session.
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// How long the socket is drained for responses after each probe round.
const DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Upper bound on a single blocking `recv_from`, so drain loops and
/// deadlines are checked at a reasonable cadence.
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Receive buffer size. Responses are 32 bytes, but some firmware appends
/// an encrypted payload after the header; accept it and let the parser
/// keep what it understands.
const RECV_BUF_SIZE: usize = 1024;

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors that prevent a discovery session from running at all.
///
/// Failures *inside* a running session (send errors, malformed datagrams,
/// receive timeouts) are not represented here: they are logged and
/// tolerated, and the session still produces a result.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be created or configured.
    #[error("failed to set up discovery socket: {0}")]
    Socket(#[source] io::Error),

    /// The UDP socket could not be bound to the requested interface.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

// ── Configuration ───────────────────────────────────────────────────────────

/// Tunables for a discovery session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Local interface to bind. The OS picks the source port.
    pub bind_address: IpAddr,

    /// Destination port probes are sent to.
    pub port: u16,

    /// Overall session deadline for [`DiscoveryEngine::discover`].
    pub timeout: Duration,

    /// Unicast addresses probed in addition to the broadcast address, for
    /// devices behind access points that filter broadcast traffic.
    pub probe_targets: Vec<IpAddr>,

    /// When set, [`DiscoveryEngine::discover`] returns as soon as this
    /// device id responds instead of waiting out the full session.
    pub stop_on: Option<DeviceId>,

    /// Probe rounds attempted by [`DiscoveryEngine::probe_device`] before
    /// giving up.
    pub probe_attempts: u32,

    /// How long [`DiscoveryEngine::probe_device`] waits for a response
    /// after each attempt.
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(10),
            probe_targets: Vec::new(),
            stop_on: None,
            probe_attempts: 3,
            probe_timeout: Duration::from_secs(5),
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

/// Blocking discovery engine.
///
/// The engine holds no socket between calls; each [`discover`] or
/// [`probe_device`] call opens its own, so an engine value can be reused
/// or cloned freely.
///
/// [`discover`]: DiscoveryEngine::discover
/// [`probe_device`]: DiscoveryEngine::probe_device
#[derive(Debug, Clone, Default)]
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
}

impl DiscoveryEngine {
    /// Creates an engine with the given configuration.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// The configuration this engine runs with.
    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Runs one discovery session and returns every device that responded,
    /// keyed by its IP address.
    ///
    /// The session sends probe rounds until the configured timeout
    /// elapses, or until the `stop_on` device responds if one is set. A
    /// device answering several rounds overwrites its own entry, so the
    /// result holds one record per address. An empty map is a successful
    /// session that simply found nothing.
    pub fn discover(&self) -> Result<HashMap<IpAddr, DeviceRecord>, DiscoveryError> {
        let socket = self.open_socket()?;
        let probe = build_probe();
        let deadline = Instant::now() + self.config.timeout;
        let mut devices: HashMap<IpAddr, DeviceRecord> = HashMap::new();
        let mut buf = [0u8; RECV_BUF_SIZE];

        info!(
            "starting discovery session: port {}, timeout {:?}, {} unicast target(s)",
            self.config.port,
            self.config.timeout,
            self.config.probe_targets.len()
        );

        while Instant::now() < deadline {
            self.send_round(&socket, &probe);

            // Drain responses for this round, never past the session deadline.
            let drain_until = deadline.min(Instant::now() + DRAIN_WINDOW);
            while Instant::now() < drain_until {
                match socket.recv_from(&mut buf) {
                    Ok((len, src)) => {
                        let Some(record) = accept_datagram(&buf[..len], src) else {
                            continue;
                        };
                        let matched = self.config.stop_on == Some(record.device_id);
                        devices.insert(record.addr, record);
                        if matched {
                            info!("target device responded, ending session early");
                            return Ok(devices);
                        }
                    }
                    Err(e) if is_timeout_error(&e) => continue,
                    Err(e) => {
                        // Typically an ICMP port-unreachable bounced back
                        // from a probed address that is up but not a device.
                        warn!("discovery receive error: {e}");
                        continue;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(PROBE_INTERVAL.min(deadline - now));
        }

        info!("discovery session finished: {} device(s)", devices.len());
        Ok(devices)
    }

    /// Probes one address directly and returns the first valid response.
    ///
    /// When `device_id` is known, the handshake and info-request packets
    /// are sent so devices that ignore the generic probe still answer;
    /// otherwise the generic probe is used. Each of the configured
    /// `probe_attempts` waits `probe_timeout` for a reply. `Ok(None)`
    /// means the address never produced a valid response.
    pub fn probe_device(
        &self,
        target: IpAddr,
        device_id: Option<DeviceId>,
    ) -> Result<Option<DeviceRecord>, DiscoveryError> {
        let socket = self.open_socket()?;
        let dest = SocketAddr::new(target, self.config.port);
        let mut buf = [0u8; RECV_BUF_SIZE];

        let mut packets: Vec<[u8; PACKET_SIZE]> = Vec::with_capacity(2);
        match device_id {
            Some(id) => {
                packets.push(build_handshake(id));
                packets.push(build_info_request(id));
            }
            None => packets.push(build_probe()),
        }

        for attempt in 1..=self.config.probe_attempts {
            debug!(
                "probing {dest}, attempt {attempt}/{}",
                self.config.probe_attempts
            );
            for packet in &packets {
                if let Err(e) = socket.send_to(packet, dest) {
                    warn!("probe send to {dest} failed: {e}");
                }
            }

            let wait_until = Instant::now() + self.config.probe_timeout;
            while Instant::now() < wait_until {
                match socket.recv_from(&mut buf) {
                    Ok((len, src)) => {
                        if let Some(record) = accept_datagram(&buf[..len], src) {
                            return Ok(Some(record));
                        }
                    }
                    Err(e) if is_timeout_error(&e) => continue,
                    Err(e) => {
                        warn!("probe receive error: {e}");
                        continue;
                    }
                }
            }
        }

        info!(
            "no response from {dest} after {} attempt(s)",
            self.config.probe_attempts
        );
        Ok(None)
    }

    /// Sends one probe round: the broadcast address first, then every
    /// configured unicast target. Send failures are tolerated; a missed
    /// probe is indistinguishable from a dropped one and the next round
    /// covers both.
    fn send_round(&self, socket: &UdpSocket, probe: &[u8]) {
        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), self.config.port);
        if let Err(e) = socket.send_to(probe, broadcast) {
            warn!("broadcast probe failed: {e}");
        }
        for target in &self.config.probe_targets {
            let dest = SocketAddr::new(*target, self.config.port);
            if let Err(e) = socket.send_to(probe, dest) {
                warn!("probe to {dest} failed: {e}");
            }
        }
    }

    /// Opens the session socket: broadcast and address reuse are enabled
    /// before binding, and receives time out after [`RECV_TIMEOUT`] so
    /// the session loops stay responsive to their deadlines.
    fn open_socket(&self) -> Result<UdpSocket, DiscoveryError> {
        let addr = SocketAddr::new(self.config.bind_address, 0);
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(DiscoveryError::Socket)?;
        socket.set_broadcast(true).map_err(DiscoveryError::Socket)?;
        socket
            .set_reuse_address(true)
            .map_err(DiscoveryError::Socket)?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(DiscoveryError::Socket)?;
        socket
            .bind(&addr.into())
            .map_err(|source| DiscoveryError::BindFailed { addr, source })?;
        Ok(socket.into())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Decodes and validates one datagram, returning a record only for real
/// devices. Anything else (foreign traffic, echoes of our own probes,
/// truncated packets) is logged at debug level and dropped.
fn accept_datagram(datagram: &[u8], src: SocketAddr) -> Option<DeviceRecord> {
    let response = match parse_response(datagram, src) {
        Ok(response) => response,
        Err(e) => {
            debug!("ignoring datagram from {src}: {e}");
            return None;
        }
    };
    if let Err(e) = response.validate() {
        debug!("ignoring response from {src}: {e}");
        return None;
    }
    debug!(
        "device {} (type {}) responded from {src}",
        response.device_id, response.device_type
    );
    Some(DeviceRecord::from(response))
}

/// Returns true when an I/O error is an ordinary receive timeout.
///
/// `recv_from` on a socket with a read timeout reports expiry as
/// `WouldBlock` on Unix and `TimedOut` on Windows, so both must be
/// treated as the quiet case.
fn is_timeout_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

// ── Tests ───────────────────────────────────────────────────────────────────
