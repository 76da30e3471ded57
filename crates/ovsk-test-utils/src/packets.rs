//! Ethernet frames as they arrive in packet-in messages

use etherparse::PacketBuilder;
use std::net::Ipv4Addr;

/// Addressing of a test frame
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FrameSpec {
    pub fn new(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Self {
        Self {
            src_mac: [0x0a, 0x58, 0x0a, 0x00, 0x00, 0x05],
            dst_mac: [0x0a, 0x58, 0x0a, 0x00, 0x00, 0x01],
            src_ip: src.0,
            dst_ip: dst.0,
            src_port: src.1,
            dst_port: dst.1,
        }
    }

    pub fn src_mac(mut self, mac: [u8; 6]) -> Self {
        self.src_mac = mac;
        self
    }
}

pub fn tcp_frame(spec: FrameSpec, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(spec.src_mac, spec.dst_mac)
        .ipv4(spec.src_ip.octets(), spec.dst_ip.octets(), 64)
        .tcp(spec.src_port, spec.dst_port, 1, 64240);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut frame, payload)
        .expect("writing into a Vec cannot fail");
    frame
}

pub fn udp_frame(spec: FrameSpec, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2(spec.src_mac, spec.dst_mac)
        .ipv4(spec.src_ip.octets(), spec.dst_ip.octets(), 64)
        .udp(spec.src_port, spec.dst_port);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut frame, payload)
        .expect("writing into a Vec cannot fail");
    frame
}
