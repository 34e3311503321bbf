//! DHCP client-facing collaborator (spec 6.2). Decodes DISCOVER/REQUEST/
//! RELEASE and drives the core's address-level lease operations; encoding
//! the on-wire DHCP format itself is explicitly not the core's job
//! (spec 1 non-goal), but some collaborator must exist for the binary to
//! run end to end (SPEC_FULL 10).
use std::net::Ipv4Addr;

use ddhcp_core::prelude::{BlockTable, Config};
use ddhcp_core::tracing::{debug, warn};
use dhcproto::v4::{DhcpOption, Message, MessageType};
use dhcproto::{Decodable, Decoder, Encodable, Encoder};

const DEFAULT_LEASE_SECONDS: u64 = 3600;

/// Translate a block-local `(block_index, offset)` address to the IPv4
/// address it represents within the configured subnet.
fn to_ipv4(cfg: &Config, block_index: usize, offset: u32) -> Ipv4Addr {
    let base = u32::from(cfg.prefix) + block_index as u32 * cfg.block_size;
    Ipv4Addr::from(base + offset)
}

/// Translate an IPv4 address back to `(block_index, offset)`, or `None` if
/// it falls outside the configured subnet.
fn from_ipv4(cfg: &Config, addr: Ipv4Addr) -> Option<(usize, u32)> {
    let offset_in_subnet = u32::from(addr).checked_sub(u32::from(cfg.prefix))?;
    let block_index = (offset_in_subnet / cfg.block_size) as usize;
    let offset = offset_in_subnet % cfg.block_size;
    if block_index as u32 >= cfg.number_of_blocks() {
        return None;
    }
    Some((block_index, offset))
}

/// Handle one inbound client datagram, returning the bytes to send back (if
/// any response is warranted).
pub fn handle_datagram(cfg: &Config, table: &mut BlockTable, now: u64, buf: &[u8]) -> Option<Vec<u8>> {
    let msg = match Message::decode(&mut Decoder::new(buf)) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(%err, "dropping malformed DHCP datagram");
            return None;
        }
    };

    let mtype = msg.opts().msg_type()?;
    let xid = msg.xid();
    let chaddr = chaddr6(&msg);

    let reply = match mtype {
        MessageType::Discover => {
            match table.lease_acquire_offer(chaddr, xid) {
                Ok((block_index, offset)) => {
                    let addr = to_ipv4(cfg, block_index, offset);
                    debug!(%addr, xid, "offering address");
                    Some(build_reply(&msg, MessageType::Offer, addr, DEFAULT_LEASE_SECONDS))
                }
                Err(err) => {
                    warn!(%err, xid, "no capacity to offer a lease");
                    None
                }
            }
        }
        MessageType::Request => {
            let requested = requested_address(&msg)?;
            let (block_index, offset) = from_ipv4(cfg, requested)?;
            match table.lease_confirm(block_index, offset, chaddr, xid, now, DEFAULT_LEASE_SECONDS) {
                Ok(()) => {
                    debug!(%requested, xid, "confirmed lease");
                    Some(build_reply(&msg, MessageType::Ack, requested, DEFAULT_LEASE_SECONDS))
                }
                Err(err) => {
                    warn!(%err, xid, "rejecting lease request");
                    Some(build_reply(&msg, MessageType::Nak, Ipv4Addr::UNSPECIFIED, 0))
                }
            }
        }
        MessageType::Release => {
            if let Some((block_index, offset)) = msg.ciaddr_checked().and_then(|a| from_ipv4(cfg, a)) {
                if let Err(err) = table.lease_release(block_index, offset) {
                    warn!(%err, xid, "failed to release address");
                }
            }
            None
        }
        other => {
            debug!(?other, xid, "ignoring unsupported message type");
            None
        }
    };

    reply.map(|msg| {
        let mut buf = Vec::new();
        let mut encoder = Encoder::new(&mut buf);
        msg.encode(&mut encoder).ok();
        buf
    })
}

fn chaddr6(msg: &Message) -> [u8; 6] {
    let mut mac = [0u8; 6];
    let len = msg.chaddr().len().min(6);
    mac[..len].copy_from_slice(&msg.chaddr()[..len]);
    mac
}

fn requested_address(msg: &Message) -> Option<Ipv4Addr> {
    match msg.opts().get(dhcproto::v4::OptionCode::RequestedIpAddress) {
        Some(DhcpOption::RequestedIpAddress(addr)) => Some(*addr),
        _ => msg.ciaddr_checked(),
    }
}

fn build_reply(request: &Message, mtype: MessageType, yiaddr: Ipv4Addr, lease_seconds: u64) -> Message {
    let mut reply = Message::new_with_id(
        request.xid(),
        Ipv4Addr::UNSPECIFIED,
        yiaddr,
        Ipv4Addr::UNSPECIFIED,
        request.giaddr(),
        request.chaddr(),
    );
    reply.set_flags(request.flags());
    reply.opts_mut().insert(DhcpOption::MessageType(mtype));
    if lease_seconds > 0 {
        reply.opts_mut().insert(DhcpOption::AddressLeaseTime(lease_seconds as u32));
    }
    reply
}

trait CiaddrChecked {
    fn ciaddr_checked(&self) -> Option<Ipv4Addr>;
}

impl CiaddrChecked for Message {
    fn ciaddr_checked(&self) -> Option<Ipv4Addr> {
        let addr = self.ciaddr();
        if addr.is_unspecified() { None } else { Some(addr) }
    }
}
