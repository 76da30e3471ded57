//! OpenFlow 1.3 wire encoding
//!
//! All multi-byte fields are big endian. Matches, set-field actions and the
//! match inside packet-in and flow-removed are padded to 8 bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ovsk_core::MacAddr;
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use crate::consts::*;
use crate::error::{OpenFlowError, Result};
use crate::flow::{Action, Flow, FlowMatch, FlowMod, FlowModCommand, Instruction, SetField};
use crate::message::*;

fn pad8(len: usize) -> usize {
    len.div_ceil(8) * 8
}

fn zeros(out: &mut Vec<u8>, n: usize) {
    out.resize(out.len() + n, 0);
}

fn len_u16(len: usize, what: &'static str) -> Result<u16> {
    u16::try_from(len).map_err(|_| OpenFlowError::Unencodable(what))
}

// ============================================================================
// Header
// ============================================================================

impl Header {
    pub fn parse(bytes: &[u8; OFP_HEADER_LEN]) -> Result<Self> {
        let mut cur = Cursor::new(&bytes[..]);
        let header = Header {
            version: cur.read_u8()?,
            msg_type: cur.read_u8()?,
            length: cur.read_u16::<BigEndian>()?,
            xid: cur.read_u32::<BigEndian>()?,
        };
        if header.version != OFP_VERSION {
            return Err(OpenFlowError::BadVersion(header.version));
        }
        if usize::from(header.length) < OFP_HEADER_LEN {
            return Err(OpenFlowError::BadLength(header.length));
        }
        Ok(header)
    }

    /// Body length following the header
    pub fn body_len(&self) -> usize {
        usize::from(self.length) - OFP_HEADER_LEN
    }
}

// ============================================================================
// OXM match fields
// ============================================================================

fn oxm_header(out: &mut Vec<u8>, field: u8, len: u8) -> Result<()> {
    out.write_u16::<BigEndian>(OFPXMC_OPENFLOW_BASIC)?;
    out.write_u8(field << 1)?;
    out.write_u8(len)?;
    Ok(())
}

fn oxm_u16(out: &mut Vec<u8>, field: u8, value: u16) -> Result<()> {
    oxm_header(out, field, 2)?;
    out.write_u16::<BigEndian>(value)?;
    Ok(())
}

fn oxm_ipv4(out: &mut Vec<u8>, field: u8, ip: Ipv4Addr) -> Result<()> {
    oxm_header(out, field, 4)?;
    out.extend_from_slice(&ip.octets());
    Ok(())
}

fn oxm_mac(out: &mut Vec<u8>, field: u8, mac: MacAddr) -> Result<()> {
    oxm_header(out, field, 6)?;
    out.extend_from_slice(&mac.octets());
    Ok(())
}

fn encode_oxm_fields(m: &FlowMatch, out: &mut Vec<u8>) -> Result<()> {
    if let Some(port) = m.in_port {
        oxm_header(out, OFPXMT_IN_PORT, 4)?;
        out.write_u32::<BigEndian>(port)?;
    }
    if let Some(mac) = m.eth_dst {
        oxm_mac(out, OFPXMT_ETH_DST, mac)?;
    }
    if let Some(mac) = m.eth_src {
        oxm_mac(out, OFPXMT_ETH_SRC, mac)?;
    }
    if let Some(eth_type) = m.eth_type {
        oxm_u16(out, OFPXMT_ETH_TYPE, eth_type)?;
    }
    if let Some(proto) = m.ip_proto {
        oxm_header(out, OFPXMT_IP_PROTO, 1)?;
        out.write_u8(proto)?;
    }
    if let Some(ip) = m.ipv4_src {
        oxm_ipv4(out, OFPXMT_IPV4_SRC, ip)?;
    }
    if let Some(ip) = m.ipv4_dst {
        oxm_ipv4(out, OFPXMT_IPV4_DST, ip)?;
    }
    if let Some(port) = m.tcp_src {
        oxm_u16(out, OFPXMT_TCP_SRC, port)?;
    }
    if let Some(port) = m.tcp_dst {
        oxm_u16(out, OFPXMT_TCP_DST, port)?;
    }
    if let Some(port) = m.udp_src {
        oxm_u16(out, OFPXMT_UDP_SRC, port)?;
    }
    if let Some(port) = m.udp_dst {
        oxm_u16(out, OFPXMT_UDP_DST, port)?;
    }
    Ok(())
}

/// `ofp_match` with OXM fields, padded to 8 bytes
pub fn encode_match(m: &FlowMatch, out: &mut Vec<u8>) -> Result<()> {
    let mut fields = Vec::new();
    encode_oxm_fields(m, &mut fields)?;
    let len = 4 + fields.len();
    out.write_u16::<BigEndian>(OFPMT_OXM)?;
    out.write_u16::<BigEndian>(len_u16(len, "match")?)?;
    out.extend_from_slice(&fields);
    zeros(out, pad8(len) - len);
    Ok(())
}

fn read_bytes<const N: usize>(cur: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_vec(cur: &mut Cursor<&[u8]>, len: usize, what: &'static str) -> Result<Vec<u8>> {
    let remaining = cur.get_ref().len() - cur.position() as usize;
    if len > remaining {
        return Err(OpenFlowError::malformed(
            what,
            format!("needs {} bytes, {} left", len, remaining),
        ));
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

fn rest(cur: &mut Cursor<&[u8]>) -> Vec<u8> {
    let pos = cur.position() as usize;
    let data = cur.get_ref()[pos..].to_vec();
    cur.set_position(cur.get_ref().len() as u64);
    data
}

/// Decode an `ofp_match`, consuming its padding. Masked and unknown fields are skipped.
pub fn decode_match(cur: &mut Cursor<&[u8]>) -> Result<FlowMatch> {
    let match_type = cur.read_u16::<BigEndian>()?;
    let len = usize::from(cur.read_u16::<BigEndian>()?);
    if match_type != OFPMT_OXM || len < 4 {
        return Err(OpenFlowError::malformed(
            "match",
            format!("type {} length {}", match_type, len),
        ));
    }
    let fields = read_vec(cur, len - 4, "match")?;
    read_vec(cur, pad8(len) - len, "match padding")?;

    let mut m = FlowMatch::default();
    let mut tlv = Cursor::new(fields.as_slice());
    while (tlv.position() as usize) < fields.len() {
        let class = tlv.read_u16::<BigEndian>()?;
        let field_mask = tlv.read_u8()?;
        let field_len = usize::from(tlv.read_u8()?);
        let value = read_vec(&mut tlv, field_len, "oxm field")?;
        if class != OFPXMC_OPENFLOW_BASIC || field_mask & 1 == 1 {
            continue;
        }
        let mut v = Cursor::new(value.as_slice());
        match (field_mask >> 1, field_len) {
            (OFPXMT_IN_PORT, 4) => m.in_port = Some(v.read_u32::<BigEndian>()?),
            (OFPXMT_ETH_DST, 6) => m.eth_dst = Some(MacAddr::new(read_bytes(&mut v)?)),
            (OFPXMT_ETH_SRC, 6) => m.eth_src = Some(MacAddr::new(read_bytes(&mut v)?)),
            (OFPXMT_ETH_TYPE, 2) => m.eth_type = Some(v.read_u16::<BigEndian>()?),
            (OFPXMT_IP_PROTO, 1) => m.ip_proto = Some(v.read_u8()?),
            (OFPXMT_IPV4_SRC, 4) => m.ipv4_src = Some(Ipv4Addr::from(read_bytes::<4>(&mut v)?)),
            (OFPXMT_IPV4_DST, 4) => m.ipv4_dst = Some(Ipv4Addr::from(read_bytes::<4>(&mut v)?)),
            (OFPXMT_TCP_SRC, 2) => m.tcp_src = Some(v.read_u16::<BigEndian>()?),
            (OFPXMT_TCP_DST, 2) => m.tcp_dst = Some(v.read_u16::<BigEndian>()?),
            (OFPXMT_UDP_SRC, 2) => m.udp_src = Some(v.read_u16::<BigEndian>()?),
            (OFPXMT_UDP_DST, 2) => m.udp_dst = Some(v.read_u16::<BigEndian>()?),
            _ => {}
        }
    }
    Ok(m)
}

// ============================================================================
// Actions and instructions
// ============================================================================

fn encode_set_field(field: &SetField, out: &mut Vec<u8>) -> Result<()> {
    match *field {
        SetField::EthDst(mac) => oxm_mac(out, OFPXMT_ETH_DST, mac),
        SetField::EthSrc(mac) => oxm_mac(out, OFPXMT_ETH_SRC, mac),
        SetField::Ipv4Src(ip) => oxm_ipv4(out, OFPXMT_IPV4_SRC, ip),
        SetField::Ipv4Dst(ip) => oxm_ipv4(out, OFPXMT_IPV4_DST, ip),
        SetField::TcpSrc(port) => oxm_u16(out, OFPXMT_TCP_SRC, port),
        SetField::TcpDst(port) => oxm_u16(out, OFPXMT_TCP_DST, port),
        SetField::UdpSrc(port) => oxm_u16(out, OFPXMT_UDP_SRC, port),
        SetField::UdpDst(port) => oxm_u16(out, OFPXMT_UDP_DST, port),
    }
}

pub fn encode_action(action: &Action, out: &mut Vec<u8>) -> Result<()> {
    match action {
        Action::Output(port) => {
            out.write_u16::<BigEndian>(OFPAT_OUTPUT)?;
            out.write_u16::<BigEndian>(16)?;
            out.write_u32::<BigEndian>(*port)?;
            let max_len = if *port == OFPP_CONTROLLER {
                OFPCML_NO_BUFFER
            } else {
                0
            };
            out.write_u16::<BigEndian>(max_len)?;
            zeros(out, 6);
        }
        Action::SetField(field) => {
            let mut tlv = Vec::new();
            encode_set_field(field, &mut tlv)?;
            let len = pad8(4 + tlv.len());
            out.write_u16::<BigEndian>(OFPAT_SET_FIELD)?;
            out.write_u16::<BigEndian>(len_u16(len, "set-field action")?)?;
            out.extend_from_slice(&tlv);
            zeros(out, len - 4 - tlv.len());
        }
    }
    Ok(())
}

pub fn encode_instruction(instruction: &Instruction, out: &mut Vec<u8>) -> Result<()> {
    match instruction {
        Instruction::GotoTable(table_id) => {
            out.write_u16::<BigEndian>(OFPIT_GOTO_TABLE)?;
            out.write_u16::<BigEndian>(8)?;
            out.write_u8(*table_id)?;
            zeros(out, 3);
        }
        Instruction::ApplyActions(actions) => {
            let mut body = Vec::new();
            for action in actions {
                encode_action(action, &mut body)?;
            }
            out.write_u16::<BigEndian>(OFPIT_APPLY_ACTIONS)?;
            out.write_u16::<BigEndian>(len_u16(8 + body.len(), "apply-actions")?)?;
            zeros(out, 4);
            out.extend_from_slice(&body);
        }
    }
    Ok(())
}

fn decode_set_field(tlv: &[u8]) -> Result<Option<SetField>> {
    let mut cur = Cursor::new(tlv);
    let _class = cur.read_u16::<BigEndian>()?;
    let field = cur.read_u8()? >> 1;
    let _len = cur.read_u8()?;
    let decoded = match field {
        OFPXMT_ETH_DST => SetField::EthDst(MacAddr::new(read_bytes(&mut cur)?)),
        OFPXMT_ETH_SRC => SetField::EthSrc(MacAddr::new(read_bytes(&mut cur)?)),
        OFPXMT_IPV4_SRC => SetField::Ipv4Src(Ipv4Addr::from(read_bytes::<4>(&mut cur)?)),
        OFPXMT_IPV4_DST => SetField::Ipv4Dst(Ipv4Addr::from(read_bytes::<4>(&mut cur)?)),
        OFPXMT_TCP_SRC => SetField::TcpSrc(cur.read_u16::<BigEndian>()?),
        OFPXMT_TCP_DST => SetField::TcpDst(cur.read_u16::<BigEndian>()?),
        OFPXMT_UDP_SRC => SetField::UdpSrc(cur.read_u16::<BigEndian>()?),
        OFPXMT_UDP_DST => SetField::UdpDst(cur.read_u16::<BigEndian>()?),
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

fn decode_actions(bytes: &[u8]) -> Result<Vec<Action>> {
    let mut cur = Cursor::new(bytes);
    let mut actions = Vec::new();
    while (cur.position() as usize) < bytes.len() {
        let action_type = cur.read_u16::<BigEndian>()?;
        let len = usize::from(cur.read_u16::<BigEndian>()?);
        if len < 8 {
            return Err(OpenFlowError::malformed("action", format!("length {}", len)));
        }
        let body = read_vec(&mut cur, len - 4, "action")?;
        match action_type {
            OFPAT_OUTPUT => {
                let port = Cursor::new(body.as_slice()).read_u32::<BigEndian>()?;
                actions.push(Action::Output(port));
            }
            OFPAT_SET_FIELD => {
                if let Some(field) = decode_set_field(&body)? {
                    actions.push(Action::SetField(field));
                }
            }
            _ => {}
        }
    }
    Ok(actions)
}

fn decode_instructions(bytes: &[u8]) -> Result<Vec<Instruction>> {
    let mut cur = Cursor::new(bytes);
    let mut instructions = Vec::new();
    while (cur.position() as usize) < bytes.len() {
        let instruction_type = cur.read_u16::<BigEndian>()?;
        let len = usize::from(cur.read_u16::<BigEndian>()?);
        if len < 8 {
            return Err(OpenFlowError::malformed(
                "instruction",
                format!("length {}", len),
            ));
        }
        let body = read_vec(&mut cur, len - 4, "instruction")?;
        match instruction_type {
            OFPIT_GOTO_TABLE => instructions.push(Instruction::GotoTable(body[0])),
            OFPIT_APPLY_ACTIONS => {
                instructions.push(Instruction::ApplyActions(decode_actions(&body[4..])?))
            }
            _ => {}
        }
    }
    Ok(instructions)
}

// ============================================================================
// Message bodies
// ============================================================================

fn encode_flow_mod(fm: &FlowMod, out: &mut Vec<u8>) -> Result<()> {
    let flow = &fm.flow;
    let flags = if fm.command == FlowModCommand::Add && flow.idle_timeout > 0 {
        OFPFF_SEND_FLOW_REM
    } else {
        0
    };
    out.write_u64::<BigEndian>(flow.cookie)?;
    out.write_u64::<BigEndian>(0)?; // cookie_mask
    out.write_u8(flow.table_id)?;
    out.write_u8(fm.command.code())?;
    out.write_u16::<BigEndian>(flow.idle_timeout)?;
    out.write_u16::<BigEndian>(flow.hard_timeout)?;
    out.write_u16::<BigEndian>(flow.priority)?;
    out.write_u32::<BigEndian>(OFP_NO_BUFFER)?;
    out.write_u32::<BigEndian>(OFPP_ANY)?;
    out.write_u32::<BigEndian>(OFPG_ANY)?;
    out.write_u16::<BigEndian>(flags)?;
    zeros(out, 2);
    encode_match(&flow.match_, out)?;
    // Strict deletes match on priority and fields only
    if fm.command == FlowModCommand::Add {
        for instruction in &flow.instructions {
            encode_instruction(instruction, out)?;
        }
    }
    Ok(())
}

fn decode_flow_mod(cur: &mut Cursor<&[u8]>) -> Result<FlowMod> {
    let cookie = cur.read_u64::<BigEndian>()?;
    let _cookie_mask = cur.read_u64::<BigEndian>()?;
    let table_id = cur.read_u8()?;
    let command = match cur.read_u8()? {
        OFPFC_ADD => FlowModCommand::Add,
        OFPFC_DELETE_STRICT => FlowModCommand::DeleteStrict,
        other => {
            return Err(OpenFlowError::malformed(
                "flow mod",
                format!("command {}", other),
            ))
        }
    };
    let idle_timeout = cur.read_u16::<BigEndian>()?;
    let hard_timeout = cur.read_u16::<BigEndian>()?;
    let priority = cur.read_u16::<BigEndian>()?;
    read_vec(cur, 4 + 4 + 4 + 2 + 2, "flow mod")?;
    let match_ = decode_match(cur)?;
    let instructions = decode_instructions(&rest(cur))?;
    Ok(FlowMod {
        command,
        flow: Flow {
            table_id,
            priority,
            idle_timeout,
            hard_timeout,
            cookie,
            match_,
            instructions,
        },
    })
}

fn encode_port_desc(desc: &PortDesc, out: &mut Vec<u8>) -> Result<()> {
    out.write_u32::<BigEndian>(desc.port_no)?;
    zeros(out, 4);
    out.extend_from_slice(&desc.hw_addr.octets());
    zeros(out, 2);
    let mut name = [0u8; 16];
    let bytes = desc.name.as_bytes();
    let n = bytes.len().min(15);
    name[..n].copy_from_slice(&bytes[..n]);
    out.extend_from_slice(&name);
    out.write_u32::<BigEndian>(desc.config)?;
    out.write_u32::<BigEndian>(desc.state)?;
    zeros(out, 16); // curr, advertised, supported, peer
    out.write_u32::<BigEndian>(desc.curr_speed)?;
    out.write_u32::<BigEndian>(desc.max_speed)?;
    Ok(())
}

fn decode_port_desc(cur: &mut Cursor<&[u8]>) -> Result<PortDesc> {
    let port_no = cur.read_u32::<BigEndian>()?;
    read_vec(cur, 4, "port")?;
    let hw_addr = MacAddr::new(read_bytes(cur)?);
    read_vec(cur, 2, "port")?;
    let name: [u8; 16] = read_bytes(cur)?;
    let end = name.iter().position(|b| *b == 0).unwrap_or(name.len());
    let name = String::from_utf8_lossy(&name[..end]).into_owned();
    let config = cur.read_u32::<BigEndian>()?;
    let state = cur.read_u32::<BigEndian>()?;
    read_vec(cur, 16, "port")?;
    let curr_speed = cur.read_u32::<BigEndian>()?;
    let max_speed = cur.read_u32::<BigEndian>()?;
    Ok(PortDesc {
        port_no,
        hw_addr,
        name,
        config,
        state,
        curr_speed,
        max_speed,
    })
}

impl Message {
    /// Full wire encoding including the header
    pub fn encode(&self, xid: u32) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        match self {
            Message::Hello | Message::FeaturesRequest => {}
            Message::EchoRequest(data) | Message::EchoReply(data) => {
                body.extend_from_slice(data)
            }
            Message::Error(e) => {
                body.write_u16::<BigEndian>(e.err_type)?;
                body.write_u16::<BigEndian>(e.code)?;
                body.extend_from_slice(&e.data);
            }
            Message::FeaturesReply(f) => {
                body.write_u64::<BigEndian>(f.datapath_id)?;
                body.write_u32::<BigEndian>(f.n_buffers)?;
                body.write_u8(f.n_tables)?;
                body.write_u8(f.auxiliary_id)?;
                zeros(&mut body, 2);
                body.write_u32::<BigEndian>(f.capabilities)?;
                body.write_u32::<BigEndian>(0)?;
            }
            Message::PacketIn(p) => {
                body.write_u32::<BigEndian>(p.buffer_id)?;
                body.write_u16::<BigEndian>(p.total_len)?;
                body.write_u8(p.reason)?;
                body.write_u8(p.table_id)?;
                body.write_u64::<BigEndian>(p.cookie)?;
                encode_match(&p.match_, &mut body)?;
                zeros(&mut body, 2);
                body.extend_from_slice(&p.data);
            }
            Message::FlowRemoved(r) => {
                body.write_u64::<BigEndian>(r.cookie)?;
                body.write_u16::<BigEndian>(r.priority)?;
                body.write_u8(r.reason)?;
                body.write_u8(r.table_id)?;
                body.write_u32::<BigEndian>(r.duration_sec)?;
                body.write_u32::<BigEndian>(r.duration_nsec)?;
                body.write_u16::<BigEndian>(r.idle_timeout)?;
                body.write_u16::<BigEndian>(r.hard_timeout)?;
                body.write_u64::<BigEndian>(r.packet_count)?;
                body.write_u64::<BigEndian>(r.byte_count)?;
                encode_match(&r.match_, &mut body)?;
            }
            Message::PortStatus(s) => {
                let reason = match s.reason {
                    PortReason::Add => 0,
                    PortReason::Delete => 1,
                    PortReason::Modify => 2,
                    PortReason::Other(code) => code,
                };
                body.write_u8(reason)?;
                zeros(&mut body, 7);
                encode_port_desc(&s.desc, &mut body)?;
            }
            Message::FlowMod(fm) => encode_flow_mod(fm, &mut body)?,
            Message::MultipartReply(r) => {
                body.write_u16::<BigEndian>(r.mp_type)?;
                body.write_u16::<BigEndian>(r.flags)?;
                zeros(&mut body, 4);
                body.extend_from_slice(&r.body);
            }
            Message::Other { body: raw, .. } => body.extend_from_slice(raw),
        }

        let length = len_u16(OFP_HEADER_LEN + body.len(), "message")?;
        let mut out = Vec::with_capacity(usize::from(length));
        out.write_u8(OFP_VERSION)?;
        out.write_u8(self.msg_type())?;
        out.write_u16::<BigEndian>(length)?;
        out.write_u32::<BigEndian>(xid)?;
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a body for the given header
    pub fn decode(header: &Header, body: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(body);
        let cur = &mut cur;
        let msg = match header.msg_type {
            OFPT_HELLO => Message::Hello,
            OFPT_FEATURES_REQUEST => Message::FeaturesRequest,
            OFPT_ECHO_REQUEST => Message::EchoRequest(body.to_vec()),
            OFPT_ECHO_REPLY => Message::EchoReply(body.to_vec()),
            OFPT_ERROR => Message::Error(ErrorMsg {
                err_type: cur.read_u16::<BigEndian>()?,
                code: cur.read_u16::<BigEndian>()?,
                data: rest(cur),
            }),
            OFPT_FEATURES_REPLY => {
                let datapath_id = cur.read_u64::<BigEndian>()?;
                let n_buffers = cur.read_u32::<BigEndian>()?;
                let n_tables = cur.read_u8()?;
                let auxiliary_id = cur.read_u8()?;
                read_vec(cur, 2, "features reply")?;
                let capabilities = cur.read_u32::<BigEndian>()?;
                Message::FeaturesReply(FeaturesReply {
                    datapath_id,
                    n_buffers,
                    n_tables,
                    auxiliary_id,
                    capabilities,
                })
            }
            OFPT_PACKET_IN => {
                let buffer_id = cur.read_u32::<BigEndian>()?;
                let total_len = cur.read_u16::<BigEndian>()?;
                let reason = cur.read_u8()?;
                let table_id = cur.read_u8()?;
                let cookie = cur.read_u64::<BigEndian>()?;
                let match_ = decode_match(cur)?;
                read_vec(cur, 2, "packet-in")?;
                Message::PacketIn(PacketIn {
                    buffer_id,
                    total_len,
                    reason,
                    table_id,
                    cookie,
                    match_,
                    data: rest(cur),
                })
            }
            OFPT_FLOW_REMOVED => Message::FlowRemoved(FlowRemoved {
                cookie: cur.read_u64::<BigEndian>()?,
                priority: cur.read_u16::<BigEndian>()?,
                reason: cur.read_u8()?,
                table_id: cur.read_u8()?,
                duration_sec: cur.read_u32::<BigEndian>()?,
                duration_nsec: cur.read_u32::<BigEndian>()?,
                idle_timeout: cur.read_u16::<BigEndian>()?,
                hard_timeout: cur.read_u16::<BigEndian>()?,
                packet_count: cur.read_u64::<BigEndian>()?,
                byte_count: cur.read_u64::<BigEndian>()?,
                match_: decode_match(cur)?,
            }),
            OFPT_PORT_STATUS => {
                let reason = PortReason::from(cur.read_u8()?);
                read_vec(cur, 7, "port status")?;
                Message::PortStatus(PortStatus {
                    reason,
                    desc: decode_port_desc(cur)?,
                })
            }
            OFPT_FLOW_MOD => Message::FlowMod(decode_flow_mod(cur)?),
            OFPT_MULTIPART_REPLY => {
                let mp_type = cur.read_u16::<BigEndian>()?;
                let flags = cur.read_u16::<BigEndian>()?;
                read_vec(cur, 4, "multipart reply")?;
                Message::MultipartReply(MultipartReply {
                    mp_type,
                    flags,
                    body: rest(cur),
                })
            }
            other => Message::Other {
                msg_type: other,
                body: body.to_vec(),
            },
        };
        Ok(msg)
    }
}
