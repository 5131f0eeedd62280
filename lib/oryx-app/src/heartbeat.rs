//! Heartbeats.
//!
//! A heartbeat is a small JSON document posted periodically to a central endpoint, announcing that this device is
//! alive and which address it can be reached at. Two workers cooperate: discovery periodically works out the local
//! address used to reach the endpoint, and the beat cycle posts heartbeats carrying the last discovered address.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use oryx_config::{Config, HeartbeatConfig, StatConfig};
use oryx_core::runtime::{ConcurrencyWidth, WorkerContainer};
use oryx_error::{generic_error, ErrorContext as _, GenericError};
use reqwest::{Client, Url};
use serde::Serialize;
use tokio::{
    net::{lookup_host, UdpSocket},
    select,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct HeartbeatPayload<'a> {
    device_id: &'a str,
    ip: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    summaries: Option<Summaries<'a>>,
}

#[derive(Serialize)]
struct Summaries<'a> {
    pid: u32,
    uptime_secs: u64,
    workers: usize,
    listen: u16,
    network_device: i64,
    disk_devices: &'a [String],
}

/// Heartbeat state shared by the discovery and beat cycles.
///
/// Settings are captured when the heartbeat is created. Changing them requires a restart.
pub struct Heartbeat {
    config: HeartbeatConfig,
    listen: u16,
    stat: StatConfig,
    width: Arc<ConcurrencyWidth>,
    started: Instant,
    client: Client,
    local_ip: ArcSwapOption<IpAddr>,
}

impl Heartbeat {
    /// Creates a new `Heartbeat` from the given configuration snapshot.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn from_config(config: &Config, width: Arc<ConcurrencyWidth>) -> Result<Self, GenericError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .error_context("Failed to build heartbeat HTTP client.")?;

        Ok(Self {
            config: config.heartbeat.clone(),
            listen: config.listen,
            stat: config.stat.clone(),
            width,
            started: Instant::now(),
            client,
            local_ip: ArcSwapOption::empty(),
        })
    }

    /// Returns `true` if heartbeats are enabled.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the last discovered local address, if any.
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_ip.load().as_deref().copied()
    }

    /// Runs the discovery cycle until cancellation is requested.
    ///
    /// Discovery runs once immediately and then every 30 seconds. Failures are logged and retried on the next cycle.
    pub async fn discovery_cycle(self: Arc<Self>, container: WorkerContainer) -> Result<(), GenericError> {
        let cancel = container.cancel_channel();
        if !self.enabled() {
            debug!("Heartbeat disabled. Discovery idle until shutdown.");
            cancel.cancelled().await;
            return Ok(());
        }

        let mut ticker = interval(DISCOVERY_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Name resolution has no deadline of its own.
            let Some(discovered) = cancel.run_until_cancelled(self.discover()).await else {
                break;
            };
            match discovered {
                Ok(ip) => {
                    let previous = self.local_ip.swap(Some(Arc::new(ip)));
                    if previous.as_deref() != Some(&ip) {
                        info!(%ip, "Discovered local address for heartbeats.");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to discover local address for heartbeats."),
            }
        }

        debug!("Heartbeat discovery stopped.");
        Ok(())
    }

    /// Runs the beat cycle until cancellation is requested.
    ///
    /// A heartbeat is posted every configured interval, once a local address was discovered. Failures are logged and
    /// the next heartbeat is attempted as scheduled.
    pub async fn beat_cycle(self: Arc<Self>, container: WorkerContainer) -> Result<(), GenericError> {
        let cancel = container.cancel_channel();
        if !self.enabled() {
            debug!("Heartbeat disabled. Beat cycle idle until shutdown.");
            cancel.cancelled().await;
            return Ok(());
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match cancel.run_until_cancelled(self.beat()).await {
                None => break,
                Some(Err(e)) => warn!(error = %e, url = %self.config.url, "Failed to send heartbeat."),
                Some(Ok(())) => {}
            }
        }

        debug!("Heartbeat beat cycle stopped.");
        Ok(())
    }

    async fn discover(&self) -> Result<IpAddr, GenericError> {
        let endpoint = endpoint_addr(&self.config.url).await?;
        local_ip_towards(endpoint).await
    }

    async fn beat(&self) -> Result<(), GenericError> {
        let Some(ip) = self.local_ip() else {
            debug!("Local address not discovered yet. Skipping heartbeat.");
            return Ok(());
        };

        let payload = self.payload(ip);
        self.client
            .post(&self.config.url)
            .json(&payload)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .error_context("Heartbeat request failed.")?;

        debug!(%ip, "Heartbeat sent.");
        Ok(())
    }

    fn payload(&self, ip: IpAddr) -> HeartbeatPayload<'_> {
        let summaries = self.config.summaries.then(|| Summaries {
            pid: std::process::id(),
            uptime_secs: self.started.elapsed().as_secs(),
            workers: self.width.current(),
            listen: self.listen,
            network_device: self.stat.network,
            disk_devices: &self.stat.disks,
        });

        HeartbeatPayload {
            device_id: &self.config.device_id,
            ip: ip.to_string(),
            summaries,
        }
    }
}

async fn endpoint_addr(url: &str) -> Result<SocketAddr, GenericError> {
    let url = Url::parse(url).with_error_context(|| format!("Invalid heartbeat URL '{}'.", url))?;
    let host = url
        .host_str()
        .ok_or_else(|| generic_error!("Heartbeat URL '{}' has no host.", url))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| generic_error!("Heartbeat URL '{}' has no port.", url))?;

    // Bracketed IPv6 literals have to be unwrapped before being resolved.
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let addr = lookup_host((host, port))
        .await
        .with_error_context(|| format!("Failed to resolve heartbeat host '{}'.", host))?
        .next()
        .ok_or_else(|| generic_error!("Heartbeat host '{}' resolved to no address.", host));
    addr
}

/// Returns the local address the OS would route packets to `endpoint` from.
///
/// Connecting a UDP socket sends nothing, it only selects a route.
async fn local_ip_towards(endpoint: SocketAddr) -> Result<IpAddr, GenericError> {
    let unspecified = match endpoint {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };

    let socket = UdpSocket::bind((unspecified, 0))
        .await
        .error_context("Failed to bind discovery socket.")?;
    socket
        .connect(endpoint)
        .await
        .with_error_context(|| format!("No route to heartbeat endpoint {}.", endpoint))?;

    Ok(socket.local_addr().error_context("Failed to query discovery socket.")?.ip())
}
