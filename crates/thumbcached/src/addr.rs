//! Advertised address detection.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use anyhow::{bail, Context, Result};

/// IPv4 address of the interface holding the default route.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel which
/// source address it would use.
pub fn detect_ipv4() -> Result<Ipv4Addr> {
    let probe = UdpSocket::bind("0.0.0.0:0").context("failed to bind probe socket")?;
    probe
        .connect("192.0.2.1:9")
        .context("no IPv4 route available")?;
    match probe.local_addr()? {
        SocketAddr::V4(v4) if !v4.ip().is_unspecified() && !v4.ip().is_loopback() => Ok(*v4.ip()),
        other => bail!("no usable IPv4 interface (probe got {})", other.ip()),
    }
}

/// Host peers should use: the configured one, or the detected address.
pub fn advertise_host(configured: &str) -> Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    detect_ipv4().map(|ip| IpAddr::V4(ip).to_string())
}

pub fn node_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}
