//! Best-effort discovery of the host's LAN-facing address, for display in
//! pairing UIs.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Returns the IP address of the interface the OS would route LAN traffic
/// through, or `0.0.0.0` when it cannot be determined.
///
/// Connecting a UDP socket performs the route lookup without sending any
/// packets, so this works offline and never blocks.
pub fn local_lan_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect(("10.254.254.254", 1))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
