//! Flow model: match, actions, instructions
//!
//! Match builders add their OXM prerequisites, so `FlowMatch::new().tcp_dst(80)`
//! also matches `eth_type=0x0800, ip_proto=6`.

use ovsk_core::MacAddr;
use std::net::Ipv4Addr;

use crate::consts::*;

/// Match fields understood by the proxy pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FlowMatch {
    pub in_port: Option<u32>,
    pub eth_dst: Option<MacAddr>,
    pub eth_src: Option<MacAddr>,
    pub eth_type: Option<u16>,
    pub ip_proto: Option<u8>,
    pub ipv4_src: Option<Ipv4Addr>,
    pub ipv4_dst: Option<Ipv4Addr>,
    pub tcp_src: Option<u16>,
    pub tcp_dst: Option<u16>,
    pub udp_src: Option<u16>,
    pub udp_dst: Option<u16>,
}

impl FlowMatch {
    /// Wildcard match
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: u32) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn eth_dst(mut self, mac: MacAddr) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    pub fn eth_src(mut self, mac: MacAddr) -> Self {
        self.eth_src = Some(mac);
        self
    }

    pub fn eth_type(mut self, eth_type: u16) -> Self {
        self.eth_type = Some(eth_type);
        self
    }

    pub fn ip_proto(mut self, proto: u8) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4);
        self.ip_proto = Some(proto);
        self
    }

    pub fn ipv4_src(mut self, ip: Ipv4Addr) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4);
        self.ipv4_src = Some(ip);
        self
    }

    pub fn ipv4_dst(mut self, ip: Ipv4Addr) -> Self {
        self.eth_type = Some(ETH_TYPE_IPV4);
        self.ipv4_dst = Some(ip);
        self
    }

    pub fn tcp_src(self, port: u16) -> Self {
        let mut m = self.ip_proto(IP_PROTO_TCP);
        m.tcp_src = Some(port);
        m
    }

    pub fn tcp_dst(self, port: u16) -> Self {
        let mut m = self.ip_proto(IP_PROTO_TCP);
        m.tcp_dst = Some(port);
        m
    }

    pub fn udp_src(self, port: u16) -> Self {
        let mut m = self.ip_proto(IP_PROTO_UDP);
        m.udp_src = Some(port);
        m
    }

    pub fn udp_dst(self, port: u16) -> Self {
        let mut m = self.ip_proto(IP_PROTO_UDP);
        m.udp_dst = Some(port);
        m
    }

    pub fn is_wildcard(&self) -> bool {
        *self == Self::default()
    }
}

/// Header field rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetField {
    EthDst(MacAddr),
    EthSrc(MacAddr),
    Ipv4Src(Ipv4Addr),
    Ipv4Dst(Ipv4Addr),
    TcpSrc(u16),
    TcpDst(u16),
    UdpSrc(u16),
    UdpDst(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Output(u32),
    SetField(SetField),
}

impl Action {
    pub fn output(port: u32) -> Self {
        Action::Output(port)
    }

    /// Punt the full packet to the controller
    pub fn controller() -> Self {
        Action::Output(OFPP_CONTROLLER)
    }

    /// Hand the packet to the switch's L2 learning
    pub fn normal() -> Self {
        Action::Output(OFPP_NORMAL)
    }

    pub fn set_field(field: SetField) -> Self {
        Action::SetField(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    GotoTable(u8),
    ApplyActions(Vec<Action>),
}

/// A flow table entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Flow {
    pub table_id: u8,
    pub priority: u16,
    /// Seconds; 0 never expires
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    pub cookie: u64,
    pub match_: FlowMatch,
    pub instructions: Vec<Instruction>,
}

impl Flow {
    pub fn new(table_id: u8, priority: u16) -> Self {
        Self {
            table_id,
            priority,
            idle_timeout: 0,
            hard_timeout: 0,
            cookie: 0,
            match_: FlowMatch::default(),
            instructions: Vec::new(),
        }
    }

    pub fn matching(mut self, match_: FlowMatch) -> Self {
        self.match_ = match_;
        self
    }

    pub fn idle_timeout(mut self, seconds: u16) -> Self {
        self.idle_timeout = seconds;
        self
    }

    pub fn cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn apply(mut self, actions: Vec<Action>) -> Self {
        self.instructions.push(Instruction::ApplyActions(actions));
        self
    }

    pub fn goto_table(mut self, table_id: u8) -> Self {
        self.instructions.push(Instruction::GotoTable(table_id));
        self
    }

    /// All actions of all apply-actions instructions, in order
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.instructions
            .iter()
            .filter_map(|i| match i {
                Instruction::ApplyActions(actions) => Some(actions),
                Instruction::GotoTable(_) => None,
            })
            .flatten()
    }

    /// First output port, if any
    pub fn output_port(&self) -> Option<u32> {
        self.actions().find_map(|a| match a {
            Action::Output(port) => Some(*port),
            Action::SetField(_) => None,
        })
    }
}

/// Flow mod command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModCommand {
    Add,
    DeleteStrict,
}

impl FlowModCommand {
    pub fn code(&self) -> u8 {
        match self {
            FlowModCommand::Add => OFPFC_ADD,
            FlowModCommand::DeleteStrict => OFPFC_DELETE_STRICT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCommand,
    pub flow: Flow,
}

impl FlowMod {
    pub fn add(flow: Flow) -> Self {
        Self {
            command: FlowModCommand::Add,
            flow,
        }
    }

    pub fn delete_strict(flow: Flow) -> Self {
        Self {
            command: FlowModCommand::DeleteStrict,
            flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prerequisites_are_added() {
        let m = FlowMatch::new().tcp_dst(80);
        assert_eq!(m.eth_type, Some(ETH_TYPE_IPV4));
        assert_eq!(m.ip_proto, Some(IP_PROTO_TCP));
        let m = FlowMatch::new().ipv4_dst(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(m.eth_type, Some(ETH_TYPE_IPV4));
        assert_eq!(m.ip_proto, None);
    }

    #[test]
    fn test_output_port() {
        let flow = Flow::new(0, 100).apply(vec![
            Action::set_field(SetField::TcpDst(8080)),
            Action::output(3),
        ]);
        assert_eq!(flow.output_port(), Some(3));
        assert_eq!(Flow::new(0, 0).goto_table(1).output_port(), None);
    }
}
