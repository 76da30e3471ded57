//! The proxy's two-table flow program
//!
//! Table 0 (service table) punts service traffic to the controller, sends
//! traffic for remote endpoints into tunnels, and carries the reactive
//! per-connection flows. Anything else falls through to table 1 (pod table),
//! which delivers to local pods and otherwise does L2 switching.

use ovsk_core::{MacAddr, Protocol};
use std::net::Ipv4Addr;

use crate::consts::ETH_TYPE_ARP;
use crate::controller::SwitchHandle;
use crate::error::Result;
use crate::flow::{Action, Flow, FlowMatch, SetField};

pub const SERVICE_TABLE: u8 = 0;
pub const POD_TABLE: u8 = 1;

// ============================================================================
// Priorities
// ============================================================================
pub const DEFAULT_PRIORITY: u16 = 0;
pub const PUNT_PRIORITY: u16 = 10;
pub const TUNNEL_PRIORITY: u16 = 20;
pub const POD_PRIORITY: u16 = 50;
pub const SERVICE_PRIORITY: u16 = 100;

/// Reactive service flows expire after this many idle seconds
pub const SERVICE_IDLE_TIMEOUT: u16 = 15;

/// Table-miss entries of both tables
pub fn base_flows() -> Vec<Flow> {
    vec![
        Flow::new(SERVICE_TABLE, DEFAULT_PRIORITY).goto_table(POD_TABLE),
        Flow::new(POD_TABLE, DEFAULT_PRIORITY).apply(vec![Action::normal()]),
    ]
}

pub fn install_pipeline(switch: &SwitchHandle) -> Result<()> {
    for flow in base_flows() {
        switch.install_flow(flow)?;
    }
    Ok(())
}

/// ARP by MAC and IPv4 by address, both delivered to the pod's port
pub fn pod_flows(of_port: u32, mac: MacAddr, ip: Ipv4Addr) -> Vec<Flow> {
    vec![
        Flow::new(POD_TABLE, POD_PRIORITY)
            .matching(FlowMatch::new().eth_type(ETH_TYPE_ARP).eth_dst(mac))
            .apply(vec![Action::output(of_port)]),
        Flow::new(POD_TABLE, POD_PRIORITY)
            .matching(FlowMatch::new().ipv4_dst(ip))
            .apply(vec![
                Action::set_field(SetField::EthDst(mac)),
                Action::output(of_port),
            ]),
    ]
}

fn match_dst(m: FlowMatch, protocol: Protocol, port: u16) -> FlowMatch {
    match protocol {
        Protocol::Tcp => m.tcp_dst(port),
        Protocol::Udp => m.udp_dst(port),
        Protocol::Sctp => m.ip_proto(protocol.ip_proto()),
    }
}

fn match_src(m: FlowMatch, protocol: Protocol, port: u16) -> FlowMatch {
    match protocol {
        Protocol::Tcp => m.tcp_src(port),
        Protocol::Udp => m.udp_src(port),
        Protocol::Sctp => m.ip_proto(protocol.ip_proto()),
    }
}

fn set_dst(protocol: Protocol, port: u16) -> Option<Action> {
    match protocol {
        Protocol::Tcp => Some(Action::set_field(SetField::TcpDst(port))),
        Protocol::Udp => Some(Action::set_field(SetField::UdpDst(port))),
        Protocol::Sctp => None,
    }
}

fn set_src(protocol: Protocol, port: u16) -> Option<Action> {
    match protocol {
        Protocol::Tcp => Some(Action::set_field(SetField::TcpSrc(port))),
        Protocol::Udp => Some(Action::set_field(SetField::UdpSrc(port))),
        Protocol::Sctp => None,
    }
}

/// Send new connections to `ip:port` to the controller
pub fn punt_flow(ip: Ipv4Addr, protocol: Protocol, port: u16) -> Flow {
    Flow::new(SERVICE_TABLE, PUNT_PRIORITY)
        .matching(match_dst(FlowMatch::new().ipv4_dst(ip), protocol, port))
        .apply(vec![Action::controller()])
}

/// Send traffic for `ip:port` to the node hosting the endpoint
pub fn tunnel_flow(ip: Ipv4Addr, protocol: Protocol, port: u16, tunnel_port: u32) -> Flow {
    Flow::new(SERVICE_TABLE, TUNNEL_PRIORITY)
        .matching(match_dst(FlowMatch::new().ipv4_dst(ip), protocol, port))
        .apply(vec![Action::output(tunnel_port)])
}

/// One observed client connection to a service, resolved to a backing pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConnection {
    pub protocol: Protocol,
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    /// Switch port the client's traffic enters on
    pub client_of_port: u32,
    /// Rewritten into replies when the client is reached through the service address
    pub client_mac: Option<MacAddr>,
    pub service_ip: Ipv4Addr,
    pub service_port: u16,
    pub pod_ip: Ipv4Addr,
    pub pod_mac: MacAddr,
    pub target_port: u16,
    pub pod_of_port: u32,
}

/// Forward (client to pod) and reverse (pod to client) NAT flows
pub fn service_flows(conn: &ServiceConnection) -> Vec<Flow> {
    let forward_match = match_src(
        match_dst(
            FlowMatch::new().ipv4_src(conn.client_ip).ipv4_dst(conn.service_ip),
            conn.protocol,
            conn.service_port,
        ),
        conn.protocol,
        conn.client_port,
    );
    let mut forward_actions: Vec<Action> = set_dst(conn.protocol, conn.target_port)
        .into_iter()
        .collect();
    forward_actions.push(Action::set_field(SetField::Ipv4Dst(conn.pod_ip)));
    forward_actions.push(Action::set_field(SetField::EthDst(conn.pod_mac)));
    forward_actions.push(Action::output(conn.pod_of_port));

    let reverse_match = match_dst(
        match_src(
            FlowMatch::new().ipv4_src(conn.pod_ip).ipv4_dst(conn.client_ip),
            conn.protocol,
            conn.target_port,
        ),
        conn.protocol,
        conn.client_port,
    );
    let mut reverse_actions: Vec<Action> = set_src(conn.protocol, conn.service_port)
        .into_iter()
        .collect();
    reverse_actions.push(Action::set_field(SetField::Ipv4Src(conn.service_ip)));
    if let Some(mac) = conn.client_mac {
        reverse_actions.push(Action::set_field(SetField::EthDst(mac)));
    }
    reverse_actions.push(Action::output(conn.client_of_port));

    vec![
        Flow::new(SERVICE_TABLE, SERVICE_PRIORITY)
            .idle_timeout(SERVICE_IDLE_TIMEOUT)
            .matching(forward_match)
            .apply(forward_actions),
        Flow::new(SERVICE_TABLE, SERVICE_PRIORITY)
            .idle_timeout(SERVICE_IDLE_TIMEOUT)
            .matching(reverse_match)
            .apply(reverse_actions),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::*;
    use crate::flow::Instruction;
    use crate::message::Message;
    use pretty_assertions::assert_eq;

    fn connection() -> ServiceConnection {
        ServiceConnection {
            protocol: Protocol::Tcp,
            client_ip: Ipv4Addr::new(10, 0, 0, 5),
            client_port: 12345,
            client_of_port: 7,
            client_mac: None,
            service_ip: Ipv4Addr::new(10, 0, 0, 1),
            service_port: 80,
            pod_ip: Ipv4Addr::new(10, 244, 0, 7),
            pod_mac: MacAddr::new([0x0a, 0x58, 0x0a, 0xf4, 0x00, 0x07]),
            target_port: 8080,
            pod_of_port: 3,
        }
    }

    #[test]
    fn test_install_pipeline_sends_table_miss_flows() {
        let (switch, mut rx) = SwitchHandle::detached(1);
        install_pipeline(&switch).unwrap();

        let mut flows = Vec::new();
        while let Ok(out) = rx.try_recv() {
            match out.message {
                Message::FlowMod(fm) => flows.push(fm.flow),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(flows, base_flows());
        assert_eq!(flows[0].instructions, vec![Instruction::GotoTable(POD_TABLE)]);
        assert_eq!(flows[1].output_port(), Some(OFPP_NORMAL));
        assert!(flows.iter().all(|f| f.match_.is_wildcard() && f.priority == 0));
    }

    #[test]
    fn test_punt_flow() {
        let flow = punt_flow(Ipv4Addr::new(10, 0, 0, 1), Protocol::Tcp, 80);
        assert_eq!((flow.table_id, flow.priority), (SERVICE_TABLE, PUNT_PRIORITY));
        assert_eq!(
            flow.match_,
            FlowMatch::new().ipv4_dst(Ipv4Addr::new(10, 0, 0, 1)).tcp_dst(80)
        );
        assert_eq!(flow.output_port(), Some(OFPP_CONTROLLER));
        assert_eq!(flow.idle_timeout, 0);
    }

    #[test]
    fn test_udp_tunnel_flow() {
        let flow = tunnel_flow(Ipv4Addr::new(10, 0, 0, 2), Protocol::Udp, 53, 9);
        assert_eq!(flow.priority, TUNNEL_PRIORITY);
        assert_eq!(flow.match_.udp_dst, Some(53));
        assert_eq!(flow.match_.ip_proto, Some(IP_PROTO_UDP));
        assert_eq!(flow.output_port(), Some(9));
    }

    #[test]
    fn test_pod_flows() {
        let mac = MacAddr::new([0x0a, 0x58, 0, 0, 0, 7]);
        let flows = pod_flows(3, mac, Ipv4Addr::new(10, 244, 0, 7));
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].match_.eth_type, Some(ETH_TYPE_ARP));
        assert_eq!(flows[0].match_.eth_dst, Some(mac));
        assert_eq!(
            flows[1].actions().cloned().collect::<Vec<_>>(),
            vec![Action::set_field(SetField::EthDst(mac)), Action::output(3)]
        );
        assert!(flows.iter().all(|f| f.table_id == POD_TABLE && f.priority == POD_PRIORITY));
    }

    #[test]
    fn test_service_flows_mirror_each_other() {
        let conn = connection();
        let flows = service_flows(&conn);
        assert_eq!(flows.len(), 2);
        let (forward, reverse) = (&flows[0], &flows[1]);

        assert_eq!(
            forward.match_,
            FlowMatch::new()
                .ipv4_src(conn.client_ip)
                .ipv4_dst(conn.service_ip)
                .tcp_src(12345)
                .tcp_dst(80)
        );
        assert_eq!(
            forward.actions().cloned().collect::<Vec<_>>(),
            vec![
                Action::set_field(SetField::TcpDst(8080)),
                Action::set_field(SetField::Ipv4Dst(conn.pod_ip)),
                Action::set_field(SetField::EthDst(conn.pod_mac)),
                Action::output(3),
            ]
        );

        assert_eq!(
            reverse.match_,
            FlowMatch::new()
                .ipv4_src(conn.pod_ip)
                .ipv4_dst(conn.client_ip)
                .tcp_src(8080)
                .tcp_dst(12345)
        );
        assert_eq!(
            reverse.actions().cloned().collect::<Vec<_>>(),
            vec![
                Action::set_field(SetField::TcpSrc(80)),
                Action::set_field(SetField::Ipv4Src(conn.service_ip)),
                Action::output(7),
            ]
        );

        for flow in &flows {
            assert_eq!(flow.table_id, SERVICE_TABLE);
            assert_eq!(flow.priority, SERVICE_PRIORITY);
            assert_eq!(flow.idle_timeout, SERVICE_IDLE_TIMEOUT);
        }
    }

    #[test]
    fn test_reverse_flow_rewrites_captured_mac() {
        let mac = MacAddr::new([2, 0, 0, 0, 0, 1]);
        let conn = ServiceConnection {
            client_mac: Some(mac),
            ..connection()
        };
        let reverse = &service_flows(&conn)[1];
        assert!(reverse
            .actions()
            .any(|a| *a == Action::set_field(SetField::EthDst(mac))));
    }
}
