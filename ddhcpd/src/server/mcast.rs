//! Multicast coordination socket setup (spec 6.1), grounded on
//! `netsock.c: netsock_open`: bind to the serving interface, join the
//! well-known group, disable multicast loopback.
use std::net::{Ipv6Addr, SocketAddrV6};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;

/// `ff02::1234`, the coordination group every node joins (spec 6.1).
pub const MCAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x1234);
/// Coordination protocol port.
pub const MCAST_PORT: u16 = 1234;

/// Open and join the multicast socket on `interface`, returning a `tokio`
/// socket ready for the event loop's `select!`.
///
/// Disables multicast loopback so a node never observes its own packets at
/// the socket layer (the inbound handler also guards on `node_id`, spec 4.5,
/// as defence in depth against a misconfigured or looped-back link).
pub fn open(interface: &str) -> Result<UdpSocket> {
    let scope_id = interface_index(interface)?;

    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .context("failed to open multicast socket")?;
    socket.set_nonblocking(true)?;
    socket
        .bind_device(Some(interface.as_bytes()))
        .with_context(|| format!("failed to bind multicast socket to {interface}"))?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MCAST_PORT, 0, scope_id);
    socket
        .bind(&SockAddr::from(bind_addr))
        .context("failed to bind multicast socket address")?;
    socket
        .join_multicast_v6(&MCAST_GROUP, scope_id)
        .context("failed to join coordination multicast group")?;
    socket
        .set_multicast_loop_v6(false)
        .context("failed to disable multicast loopback")?;

    UdpSocket::from_std(socket.into()).context("failed to hand multicast socket to tokio")
}

fn interface_index(interface: &str) -> Result<u32> {
    let name = std::ffi::CString::new(interface).context("interface name contains a NUL byte")?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        anyhow::bail!("no such interface: {interface}");
    }
    Ok(index)
}
