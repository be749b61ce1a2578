use crate::error::PowerError;
use crate::models::RemoteConfig;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

pub const WOL_PORT: u16 = 9;

pub fn parse_mac(mac: &str) -> Result<[u8; 6], PowerError> {
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let separators_ok = mac
        .chars()
        .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '-');
    if hex.len() != 12 || !separators_ok {
        return Err(PowerError::InvalidMac(mac.to_string()));
    }
    let mut out = [0u8; 6];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| PowerError::InvalidMac(mac.to_string()))?;
    }
    Ok(out)
}

pub fn magic_packet(mac: [u8; 6]) -> [u8; 102] {
    let mut pkt = [0xFFu8; 102];
    // 16 fois l'adresse MAC après les 6 x 0xFF
    for chunk in pkt[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac);
    }
    pkt
}

/// Masque par classe d'adresse (A/8, B/16, C/24).
pub fn default_subnet_mask(ip: Ipv4Addr) -> Result<Ipv4Addr, PowerError> {
    match ip.octets()[0] {
        0..=127 => Ok(Ipv4Addr::new(255, 0, 0, 0)),
        128..=191 => Ok(Ipv4Addr::new(255, 255, 0, 0)),
        192..=223 => Ok(Ipv4Addr::new(255, 255, 255, 0)),
        _ => Err(PowerError::NoDefaultSubnet(ip)),
    }
}

pub fn broadcast_address(ip: Ipv4Addr, mask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(mask))
}

pub fn broadcast_for(remote: &RemoteConfig) -> Result<Ipv4Addr, PowerError> {
    let ip = parse_ipv4(&remote.ip_address)?;
    let mask = match remote.subnet_mask.as_deref() {
        Some(mask) => parse_ipv4(mask)?,
        None => default_subnet_mask(ip)?,
    };
    Ok(broadcast_address(ip, mask))
}

fn parse_ipv4(s: &str) -> Result<Ipv4Addr, PowerError> {
    s.trim()
        .parse()
        .map_err(|_| PowerError::InvalidAddress(s.to_string()))
}

/// Envoie le magic packet en UDP broadcast sur le port 9.
pub async fn send(remote: &RemoteConfig) -> Result<(), PowerError> {
    send_to_port(remote, WOL_PORT).await
}

async fn send_to_port(remote: &RemoteConfig, port: u16) -> Result<(), PowerError> {
    let mac = parse_mac(&remote.mac_address)?;
    let pkt = magic_packet(mac);
    let target = SocketAddrV4::new(broadcast_for(remote)?, port);

    let sock = UdpSocket::bind(("0.0.0.0", 0)).await.map_err(PowerError::Wol)?;
    sock.set_broadcast(true).map_err(PowerError::Wol)?;
    sock.send_to(&pkt, target).await.map_err(|e| {
        warn!(addr = %target, error = %e, "WOL send error");
        PowerError::Wol(e)
    })?;
    debug!(mac = %remote.mac_address, addr = %target, "magic packet sent");
    Ok(())
}
