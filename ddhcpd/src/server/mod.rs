//! Event loop: one periodic tick plus reactive packet handling, all
//! single-threaded per spec 5 -- the block table has exactly one writer.
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use ddhcp_core::config::cli;
use ddhcp_core::prelude::{BlockState, BlockTable, ClaimEngine, InboundHandler, RenewalReaper};
use ddhcp_core::tracing::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{interval, Duration};

mod control;
mod dhcp;
mod linklocal;
mod mcast;

/// Run the daemon until a fatal I/O error or ctrl-c.
pub async fn run(cli: cli::Config) -> Result<()> {
    let cfg = cli.to_core_config();
    let number_of_blocks = cfg.number_of_blocks();
    info!(node_id = cfg.node_id, number_of_blocks, "starting ddhcp node");

    let mcast_socket =
        mcast::open(&cli.interface).context("failed to open coordination multicast socket")?;
    let client_socket = dhcp_socket(&cli.interface_client).context("failed to open DHCP client socket")?;
    let control_listener =
        control::bind(&cli.control_path).context("failed to bind operator control socket")?;

    if let Ok(mac) = interface_mac(&cli.interface) {
        info!(addr = %linklocal::mac_to_link_local(mac), "node link-local address");
    }

    let mut table = BlockTable::new(number_of_blocks, cfg.block_size, cfg.node_id);
    let mut claim_engine = ClaimEngine::new(
        cfg.node_id,
        cfg.prefix,
        cfg.prefix_len,
        cfg.block_size,
        cfg.tentative_timeout,
        cfg.block_timeout,
    );
    let renewal_reaper =
        RenewalReaper::new(cfg.node_id, cfg.prefix, cfg.prefix_len, cfg.block_size, cfg.block_timeout);
    let inbound_handler = InboundHandler::new(cfg.node_id, cfg.prefix, cfg.prefix_len, cfg.block_size);
    let mut rng = StdRng::from_entropy();

    let mut tick = interval(Duration::from_secs(cli.tick_secs));
    let mut mcast_buf = vec![0u8; 2048];
    let mut dhcp_buf = vec![0u8; 2048];

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let now = now_secs();
                // fixed per-tick order (spec 5): inbound already applied as
                // packets arrive, so here: check_timeouts, claim, renewal.
                let timed_out = table.check_timeouts(now);
                for index in timed_out {
                    debug!(index, "block timed out");
                }
                table.refresh_metrics();

                let owned_or_claiming =
                    table.iter().filter(|b| matches!(b.state, BlockState::Ours | BlockState::Claiming)).count() as i64;
                let wanted = cfg.spare_blocks_needed as i64 - owned_or_claiming;

                if let Some(packet) = claim_engine.tick(&mut table, wanted.max(0), now, &mut rng) {
                    send_mcast(&mcast_socket, &packet).await;
                }

                let free_leases = table.count_free_leases_in_owned() as i64;
                let blocks_needed = cfg.spare_blocks_needed as i64 - free_leases;
                if let Some(packet) = renewal_reaper.tick(&mut table, blocks_needed, now) {
                    send_mcast(&mcast_socket, &packet).await;
                }
            }
            res = mcast_socket.recv_from(&mut mcast_buf) => {
                match res {
                    Ok((len, _from)) => {
                        match ddhcp_core::protocol::McastPacket::decode(&mcast_buf[..len]) {
                            Ok(packet) => { inbound_handler.handle(&mut table, &packet, now_secs()); }
                            Err(err) => warn!(%err, "dropping malformed coordination packet"),
                        }
                    }
                    Err(err) => warn!(%err, "multicast recv failed"),
                }
            }
            res = client_socket.recv_from(&mut dhcp_buf) => {
                match res {
                    Ok((len, from)) => {
                        if let Some(reply) = dhcp::handle_datagram(&cfg, &mut table, now_secs(), &dhcp_buf[..len]) {
                            if let Err(err) = client_socket.send_to(&reply, from).await {
                                warn!(%err, "failed to send DHCP reply");
                            }
                        }
                    }
                    Err(err) => warn!(%err, "DHCP client recv failed"),
                }
            }
            accepted = control_listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => control::serve_one(stream, &table).await,
                    Err(err) => warn!(%err, "control socket accept failed"),
                }
            }
        }
    }
}

async fn send_mcast(socket: &tokio::net::UdpSocket, packet: &ddhcp_core::protocol::McastPacket) {
    let bytes = packet.encode();
    let dest = (mcast::MCAST_GROUP, mcast::MCAST_PORT);
    if let Err(err) = socket.send_to(&bytes, dest).await {
        warn!(%err, "multicast send failed");
    }
}

fn dhcp_socket(interface: &str) -> Result<tokio::net::UdpSocket> {
    use socket2::{Domain, Protocol, SockAddr, Socket, Type};
    use std::net::SocketAddrV4;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_broadcast(true)?;
    socket
        .bind_device(Some(interface.as_bytes()))
        .with_context(|| format!("failed to bind DHCP socket to {interface}"))?;
    socket.bind(&SockAddr::from(SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, 67)))?;
    Ok(tokio::net::UdpSocket::from_std(socket.into())?)
}

/// calls ioctl(fd, SIOCGIFHWADDR, ifreq) to read `interface`'s hardware address.
fn interface_mac(interface: &str) -> Result<[u8; 6]> {
    use std::io;
    use std::os::unix::prelude::AsRawFd;

    let name = std::ffi::CString::new(interface)?;
    let helper = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, None)
        .context("failed to open ioctl helper socket")?;

    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    let name_bytes = name.as_bytes_with_nul();
    unsafe {
        std::ptr::copy_nonoverlapping(
            name_bytes.as_ptr(),
            ifr.ifr_name.as_mut_ptr() as *mut u8,
            name_bytes.len().min(ifr.ifr_name.len()),
        );
    }
    let res = unsafe { libc::ioctl(helper.as_raw_fd(), libc::SIOCGIFHWADDR, &mut ifr) };
    if res == -1 {
        return Err(io::Error::last_os_error()).with_context(|| format!("SIOCGIFHWADDR failed for {interface}"));
    }

    let data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
    let mut mac = [0u8; 6];
    for (i, b) in mac.iter_mut().enumerate() {
        *b = data[i] as u8;
    }
    Ok(mac)
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
