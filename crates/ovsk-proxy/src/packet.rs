//! Decoding of punted frames
//!
//! Only untagged Ethernet II carrying IPv4 without options and a TCP or UDP
//! header is accepted; everything else is reported as a decode error.

use etherparse::{EtherType, Ethernet2Header, IpNumber, Ipv4Header, TcpHeader, UdpHeader};
use ovsk_core::{MacAddr, Protocol};
use std::net::Ipv4Addr;

use crate::error::{ProxyError, Result};

/// Addressing of a punted TCP/UDP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L4Packet {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub protocol: Protocol,
    pub src_port: u16,
    pub dst_port: u16,
}

pub fn decode(frame: &[u8]) -> Result<L4Packet> {
    let (eth, rest) = Ethernet2Header::from_slice(frame).map_err(ProxyError::packet)?;
    if eth.ether_type != EtherType::IPV4 {
        return Err(ProxyError::packet(format!(
            "ether type {:#06x} is not IPv4",
            eth.ether_type.0
        )));
    }

    let (ip, rest) = Ipv4Header::from_slice(rest).map_err(ProxyError::packet)?;
    if !ip.options.as_slice().is_empty() {
        return Err(ProxyError::packet("IPv4 options are not supported"));
    }
    if ip.fragment_offset.value() != 0 {
        return Err(ProxyError::packet("non-initial IPv4 fragment"));
    }

    let (protocol, src_port, dst_port) = match ip.protocol {
        IpNumber::TCP => {
            let (tcp, _) = TcpHeader::from_slice(rest).map_err(ProxyError::packet)?;
            (Protocol::Tcp, tcp.source_port, tcp.destination_port)
        }
        IpNumber::UDP => {
            let (udp, _) = UdpHeader::from_slice(rest).map_err(ProxyError::packet)?;
            (Protocol::Udp, udp.source_port, udp.destination_port)
        }
        other => {
            return Err(ProxyError::packet(format!(
                "IP protocol {} is not TCP or UDP",
                other.0
            )))
        }
    };

    Ok(L4Packet {
        src_mac: MacAddr::new(eth.source),
        dst_mac: MacAddr::new(eth.destination),
        src_ip: Ipv4Addr::from(ip.source),
        dst_ip: Ipv4Addr::from(ip.destination),
        protocol,
        src_port,
        dst_port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use ovsk_test_utils::packets::{tcp_frame, udp_frame, FrameSpec};

    fn spec() -> FrameSpec {
        FrameSpec::new(
            (Ipv4Addr::new(10, 0, 0, 5), 12345),
            (Ipv4Addr::new(10, 0, 0, 1), 80),
        )
    }

    #[test]
    fn test_decode_tcp() {
        let pkt = decode(&tcp_frame(spec(), b"GET /")).unwrap();
        assert_eq!(pkt.protocol, Protocol::Tcp);
        assert_eq!(pkt.src_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(pkt.dst_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!((pkt.src_port, pkt.dst_port), (12345, 80));
        assert_eq!(pkt.src_mac, MacAddr::new(spec().src_mac));
    }

    #[test]
    fn test_decode_udp() {
        let pkt = decode(&udp_frame(spec(), &[0; 12])).unwrap();
        assert_eq!(pkt.protocol, Protocol::Udp);
        assert_eq!(pkt.dst_port, 80);
    }

    #[test]
    fn test_truncated_frames_are_rejected() {
        let frame = tcp_frame(spec(), b"");
        assert!(decode(&frame[..10]).is_err());
        // Ethernet + IPv4 but the TCP header is cut short
        assert!(decode(&frame[..14 + 20 + 8]).is_err());
    }

    #[test]
    fn test_ip_options_are_rejected() {
        let mut frame = tcp_frame(spec(), b"");
        // Bump IHL to 6 and splice in one 4-byte NOP option word
        frame[14] = 0x46;
        frame.splice(14 + 20..14 + 20, [1u8, 1, 1, 0]);
        assert!(matches!(decode(&frame), Err(ProxyError::Packet(_))));
    }

    #[test]
    fn test_non_ip_is_rejected() {
        let builder = PacketBuilder::ethernet2([1; 6], [2; 6])
            .ipv6([0; 16], [1; 16], 64)
            .udp(1, 2);
        let mut frame = Vec::new();
        builder.write(&mut frame, &[]).unwrap();
        assert!(decode(&frame).is_err());
    }
}
