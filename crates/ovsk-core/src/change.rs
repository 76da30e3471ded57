//! Change predicates
//!
//! The watchers see every resync of an object. An update is only forwarded
//! to the reconciler when a field the proxy cares about moved.

use crate::types::{EndpointInfo, NodeInfo, PodInfo, ServiceInfo};

/// Decides whether a new version of a resource is worth reconciling
pub trait ChangePredicate {
    fn has_changed(old: &Self, new: &Self) -> bool;
}

impl ChangePredicate for NodeInfo {
    fn has_changed(old: &Self, new: &Self) -> bool {
        old.internal_ip != new.internal_ip || old.hostname != new.hostname
    }
}

impl ChangePredicate for PodInfo {
    fn has_changed(old: &Self, new: &Self) -> bool {
        old.pod_ip != new.pod_ip
            || old.host_ip != new.host_ip
            || old.node_name != new.node_name
            || old.ports != new.ports
    }
}

impl ChangePredicate for ServiceInfo {
    fn has_changed(old: &Self, new: &Self) -> bool {
        old.cluster_ip != new.cluster_ip
            || old.service_type != new.service_type
            || old.external_ips != new.external_ips
            || old.ports != new.ports
    }
}

impl ChangePredicate for EndpointInfo {
    fn has_changed(old: &Self, new: &Self) -> bool {
        old.pod_namespace != new.pod_namespace
            || old.pod_name != new.pod_name
            || old.pod_ip != new.pod_ip
            || old.node_name != new.node_name
            || old.ports != new.ports
    }
}
