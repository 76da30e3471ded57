//! OpenFlow event handling for the proxy

use async_trait::async_trait;
use ovsk_openflow::{
    ErrorMsg, FlowRemoved, MultipartReply, PacketIn, PortReason, PortStatus, SwitchApp,
    SwitchHandle,
};
use tracing::{debug, error, info, warn};

use crate::reconciler::ServiceProxy;

#[async_trait]
impl SwitchApp for ServiceProxy {
    async fn switch_connected(&self, switch: SwitchHandle) {
        let datapath_id = switch.datapath_id();
        if let Err(e) = self.attach_switch(switch).await {
            error!("Failed to program switch {:#018x}: {}", datapath_id, e);
        }
    }

    async fn switch_disconnected(&self, switch: SwitchHandle) {
        warn!("Switch {:#018x} went away", switch.datapath_id());
        self.detach_switch(&switch).await;
    }

    async fn packet_in(&self, switch: &SwitchHandle, packet: PacketIn) {
        match self.handle_packet_in(switch, &packet).await {
            Ok(_) => {}
            Err(e) if e.is_miss() => debug!("Packet-in dropped: {}", e),
            Err(e) => warn!("Packet-in failed: {}", e),
        }
    }

    async fn port_status(&self, _switch: &SwitchHandle, status: PortStatus) {
        let verb = match status.reason {
            PortReason::Add => "added",
            PortReason::Delete => "deleted",
            PortReason::Modify => "modified",
            PortReason::Other(_) => "changed",
        };
        info!(
            "Port {} ({}) {}, state {:#x}",
            status.desc.port_no, status.desc.name, verb, status.desc.state
        );
    }

    async fn flow_removed(&self, _switch: &SwitchHandle, removed: FlowRemoved) {
        debug!(
            "Flow removed from table {} priority {} after {}s ({} packets)",
            removed.table_id, removed.priority, removed.duration_sec, removed.packet_count
        );
    }

    async fn multipart_reply(&self, _switch: &SwitchHandle, reply: MultipartReply) {
        debug!(
            "Multipart reply type {} ({} bytes)",
            reply.mp_type,
            reply.body.len()
        );
    }

    async fn error(&self, switch: &SwitchHandle, error: ErrorMsg) {
        warn!(
            "Switch {:#018x} reported error type {} code {}",
            switch.datapath_id(),
            error.err_type,
            error.code
        );
    }
}
