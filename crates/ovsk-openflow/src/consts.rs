//! OpenFlow 1.3 protocol constants (openflow.h)

pub const OFP_VERSION: u8 = 0x04;
pub const OFP_HEADER_LEN: usize = 8;
pub const OFP_TCP_PORT: u16 = 6653;

// ============================================================================
// Message Types
// ============================================================================
pub const OFPT_HELLO: u8 = 0;
pub const OFPT_ERROR: u8 = 1;
pub const OFPT_ECHO_REQUEST: u8 = 2;
pub const OFPT_ECHO_REPLY: u8 = 3;
pub const OFPT_FEATURES_REQUEST: u8 = 5;
pub const OFPT_FEATURES_REPLY: u8 = 6;
pub const OFPT_PACKET_IN: u8 = 10;
pub const OFPT_FLOW_REMOVED: u8 = 11;
pub const OFPT_PORT_STATUS: u8 = 12;
pub const OFPT_FLOW_MOD: u8 = 14;
pub const OFPT_MULTIPART_REPLY: u8 = 19;

// ============================================================================
// Flow Mod
// ============================================================================
pub const OFPFC_ADD: u8 = 0;
pub const OFPFC_DELETE_STRICT: u8 = 4;

pub const OFPFF_SEND_FLOW_REM: u16 = 1 << 0;

pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
pub const OFPG_ANY: u32 = 0xffff_ffff;

/// Fixed part of the flow-mod body, after the header
pub const OFP_FLOW_MOD_FIXED_LEN: usize = 40;

// ============================================================================
// Reserved Ports
// ============================================================================
pub const OFPP_NORMAL: u32 = 0xffff_fffa;
pub const OFPP_CONTROLLER: u32 = 0xffff_fffd;
pub const OFPP_ANY: u32 = 0xffff_ffff;

/// Send the whole packet to the controller
pub const OFPCML_NO_BUFFER: u16 = 0xffff;

// ============================================================================
// Match (OXM)
// ============================================================================
pub const OFPMT_OXM: u16 = 1;
pub const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;

pub const OFPXMT_IN_PORT: u8 = 0;
pub const OFPXMT_ETH_DST: u8 = 3;
pub const OFPXMT_ETH_SRC: u8 = 4;
pub const OFPXMT_ETH_TYPE: u8 = 5;
pub const OFPXMT_IP_PROTO: u8 = 10;
pub const OFPXMT_IPV4_SRC: u8 = 11;
pub const OFPXMT_IPV4_DST: u8 = 12;
pub const OFPXMT_TCP_SRC: u8 = 13;
pub const OFPXMT_TCP_DST: u8 = 14;
pub const OFPXMT_UDP_SRC: u8 = 15;
pub const OFPXMT_UDP_DST: u8 = 16;

// ============================================================================
// Instructions and Actions
// ============================================================================
pub const OFPIT_GOTO_TABLE: u16 = 1;
pub const OFPIT_APPLY_ACTIONS: u16 = 4;

pub const OFPAT_OUTPUT: u16 = 0;
pub const OFPAT_SET_FIELD: u16 = 25;

// ============================================================================
// Ethernet / IP
// ============================================================================
pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;
