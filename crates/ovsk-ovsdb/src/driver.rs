//! Bridge and port lifecycle on top of the switch store
//!
//! Every change is a single transaction. Creation is idempotent: an object
//! that is already in the cache is left alone.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::tables::{BRIDGE, CONTROLLER, INTERFACE, MANAGER, OPEN_VSWITCH, PORT};
use crate::datum::{Atom, Datum, Row};
use crate::error::{OvsdbError, Result};
use crate::operation::{sanitize_uuid_name, Condition, Mutation, Operation};
use crate::store::SwitchStore;

pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;
pub const DEFAULT_MANAGER_PORT: u16 = 6640;

const BRIDGE_UUID_NAME: &str = "ovskbridge";
const CONTROLLER_UUID_NAME: &str = "ovskcontroller";
const MANAGER_UUID_NAME: &str = "ovskmanager";

const PROTOCOLS: [&str; 4] = ["OpenFlow10", "OpenFlow11", "OpenFlow12", "OpenFlow13"];

/// Interface type column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceType {
    /// Plain system interface (veth end, NIC)
    #[default]
    System,
    Internal,
    Vxlan,
}

impl InterfaceType {
    fn as_column(&self) -> Option<&'static str> {
        match self {
            InterfaceType::System => None,
            InterfaceType::Internal => Some("internal"),
            InterfaceType::Vxlan => Some("vxlan"),
        }
    }
}

/// Everything needed to add a port with its single interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortSpec {
    pub name: String,
    pub iface_type: InterfaceType,
    /// Access VLAN; 0 means trunk
    pub vlan_tag: u16,
    pub external_ids: BTreeMap<String, String>,
    pub options: BTreeMap<String, String>,
}

impl PortSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn iface_type(mut self, iface_type: InterfaceType) -> Self {
        self.iface_type = iface_type;
        self
    }

    pub fn vlan_tag(mut self, tag: u16) -> Self {
        self.vlan_tag = tag;
        self
    }

    pub fn external_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.external_ids.insert(key.into(), value.into());
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Manages the root bridge of this proxy instance and its ports
pub struct SwitchDriver {
    store: Arc<SwitchStore>,
    bridge_name: String,
}

impl SwitchDriver {
    pub fn new(store: Arc<SwitchStore>, bridge_name: impl Into<String>) -> Self {
        Self {
            store,
            bridge_name: bridge_name.into(),
        }
    }

    pub fn bridge_name(&self) -> &str {
        &self.bridge_name
    }

    pub fn store(&self) -> &Arc<SwitchStore> {
        &self.store
    }

    async fn root_uuid(&self) -> Result<String> {
        self.store
            .root_uuid()
            .await
            .ok_or_else(|| OvsdbError::not_found(OPEN_VSWITCH, "root row"))
    }

    async fn root_mutation(&self, mutation: Mutation) -> Result<Operation> {
        Ok(Operation::mutate(
            OPEN_VSWITCH,
            vec![Condition::uuid(self.root_uuid().await?)],
            vec![mutation],
        ))
    }

    fn bridge_mutation(&self, mutation: Mutation) -> Operation {
        Operation::mutate(
            BRIDGE,
            vec![Condition::name(self.bridge_name.as_str())],
            vec![mutation],
        )
    }

    /// Cached row id, or the transaction-local name when the row is not cached
    fn uuid_or_named(cached: Option<String>, named: &str) -> Atom {
        match cached {
            Some(uuid) => Atom::uuid(uuid),
            None => Atom::named_uuid(named),
        }
    }

    // ========================================================================
    // Bridges
    // ========================================================================

    /// Create `name` with its internal port. No-op if present.
    pub async fn create_bridge(&self, name: &str) -> Result<()> {
        if self.store.is_bridge_present(name).await {
            debug!("Bridge {} already exists", name);
            return Ok(());
        }

        let bridge = Row::new()
            .with("name", Datum::string(name))
            .with("protocols", Datum::set(PROTOCOLS.iter().map(|p| Atom::string(*p))));
        let ops = vec![
            Operation::insert(BRIDGE, bridge, BRIDGE_UUID_NAME),
            self.root_mutation(Mutation::insert(
                "bridges",
                Datum::set([Atom::named_uuid(BRIDGE_UUID_NAME)]),
            ))
            .await?,
        ];
        self.store.transact(ops).await?;
        info!("Created OVS bridge {}", name);

        self.create_port_with_bridge(
            name,
            PortSpec::new(name).iface_type(InterfaceType::Internal),
        )
        .await
    }

    pub async fn delete_bridge(&self, name: &str) -> Result<()> {
        let bridge_ref =
            Self::uuid_or_named(self.store.bridge_uuid(name).await, BRIDGE_UUID_NAME);
        let ops = vec![
            Operation::delete(BRIDGE, vec![Condition::name(name)]),
            self.root_mutation(Mutation::delete("bridges", Datum::set([bridge_ref])))
                .await?,
        ];
        self.store.transact(ops).await?;
        info!("Deleted OVS bridge {}", name);
        Ok(())
    }

    /// Remove the managed root bridge
    pub async fn delete(&self) -> Result<()> {
        self.delete_bridge(&self.bridge_name).await
    }

    // ========================================================================
    // Ports
    // ========================================================================

    /// Add a port with optional pod identity (`iface-id`, `attached-mac`)
    pub async fn create_port(
        &self,
        name: &str,
        iface_type: InterfaceType,
        vlan_tag: u16,
        external_id: &str,
        mac: &str,
    ) -> Result<()> {
        let mut spec = PortSpec::new(name).iface_type(iface_type).vlan_tag(vlan_tag);
        if !external_id.is_empty() {
            spec = spec
                .external_id("iface-id", external_id)
                .external_id("attached-mac", mac);
        }
        self.create_port_with(spec).await
    }

    pub async fn create_port_with(&self, spec: PortSpec) -> Result<()> {
        let bridge = self.bridge_name.clone();
        self.create_port_with_bridge(&bridge, spec).await
    }

    async fn create_port_with_bridge(&self, bridge: &str, spec: PortSpec) -> Result<()> {
        if self.store.is_port_name_present(&spec.name).await {
            debug!("Port {} already exists", spec.name);
            return Ok(());
        }

        let port_uuid_name = sanitize_uuid_name(&spec.name);
        let iface_uuid_name = format!("int{}", port_uuid_name);

        let mut iface = Row::new().with("name", Datum::string(&spec.name));
        if let Some(kind) = spec.iface_type.as_column() {
            iface = iface.with("type", Datum::string(kind));
        }
        if !spec.external_ids.is_empty() {
            iface = iface.with("external_ids", Datum::string_map(spec.external_ids.clone()));
        }
        if !spec.options.is_empty() {
            iface = iface.with("options", Datum::string_map(spec.options.clone()));
        }

        let mut port = Row::new()
            .with("name", Datum::string(&spec.name))
            .with(
                "interfaces",
                Datum::set([Atom::named_uuid(iface_uuid_name.as_str())]),
            );
        if !spec.external_ids.is_empty() {
            port = port.with("external_ids", Datum::string_map(spec.external_ids.clone()));
        }
        if spec.vlan_tag != 0 {
            port = port
                .with("vlan_mode", Datum::string("access"))
                .with("tag", Datum::integer(i64::from(spec.vlan_tag)));
        } else {
            port = port.with("vlan_mode", Datum::string("trunk"));
        }

        let ops = vec![
            Operation::insert(INTERFACE, iface, iface_uuid_name.as_str()),
            Operation::insert(PORT, port, port_uuid_name.as_str()),
            Operation::mutate(
                BRIDGE,
                vec![Condition::name(bridge)],
                vec![Mutation::insert(
                    "ports",
                    Datum::set([Atom::named_uuid(port_uuid_name.as_str())]),
                )],
            ),
        ];
        self.store.transact(ops).await?;
        info!("Added port {} to bridge {}", spec.name, bridge);
        Ok(())
    }

    pub async fn delete_port_by_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(OvsdbError::not_found(PORT, "<empty name>"));
        }
        let port_ref =
            Self::uuid_or_named(self.store.port_uuid(name).await, &sanitize_uuid_name(name));
        let ops = vec![
            Operation::delete(INTERFACE, vec![Condition::name(name)]),
            Operation::delete(PORT, vec![Condition::name(name)]),
            self.bridge_mutation(Mutation::delete("ports", Datum::set([port_ref]))),
        ];
        self.store.transact(ops).await?;
        info!("Deleted port {} from bridge {}", name, self.bridge_name);
        Ok(())
    }

    /// VXLAN port towards `remote_ip` with flow-based tunnel key
    pub async fn create_vtep(&self, name: &str, remote_ip: &str) -> Result<()> {
        let spec = PortSpec::new(name)
            .iface_type(InterfaceType::Vxlan)
            .option("remote_ip", remote_ip)
            .option("key", "flow");
        self.create_port_with(spec).await
    }

    // ========================================================================
    // Controller / Manager
    // ========================================================================

    pub async fn set_controller(&self, target: &str) -> Result<()> {
        if self.store.is_controller_present(target).await {
            return Err(OvsdbError::already_exists(CONTROLLER, target));
        }
        let ops = vec![
            Operation::insert(
                CONTROLLER,
                Row::new().with("target", Datum::string(target)),
                CONTROLLER_UUID_NAME,
            ),
            self.bridge_mutation(Mutation::insert(
                "controller",
                Datum::set([Atom::named_uuid(CONTROLLER_UUID_NAME)]),
            )),
        ];
        self.store.transact(ops).await?;
        info!("Registered controller {} on {}", target, self.bridge_name);
        Ok(())
    }

    /// `tcp:<ip>:<port>`, port 0 meaning 6653
    pub async fn set_active_controller(&self, ip: &str, port: u16) -> Result<()> {
        let port = if port == 0 { DEFAULT_CONTROLLER_PORT } else { port };
        self.set_controller(&format!("tcp:{}:{}", ip, port)).await
    }

    /// `ptcp:<port>`, port 0 meaning 6653
    pub async fn set_passive_controller(&self, port: u16) -> Result<()> {
        let port = if port == 0 { DEFAULT_CONTROLLER_PORT } else { port };
        self.set_controller(&format!("ptcp:{}", port)).await
    }

    pub async fn set_manager(&self, target: &str) -> Result<()> {
        if self.store.is_manager_present(target).await {
            return Err(OvsdbError::already_exists(MANAGER, target));
        }
        let ops = vec![
            Operation::insert(
                MANAGER,
                Row::new().with("target", Datum::string(target)),
                MANAGER_UUID_NAME,
            ),
            self.root_mutation(Mutation::insert(
                "manager_options",
                Datum::set([Atom::named_uuid(MANAGER_UUID_NAME)]),
            ))
            .await?,
        ];
        self.store.transact(ops).await?;
        info!("Registered manager {}", target);
        Ok(())
    }

    /// `tcp:<ip>:<port>`, port 0 meaning 6640
    pub async fn set_active_manager(&self, ip: &str, port: u16) -> Result<()> {
        let port = if port == 0 { DEFAULT_MANAGER_PORT } else { port };
        self.set_manager(&format!("tcp:{}:{}", ip, port)).await
    }

    /// `ptcp:<port>`, port 0 meaning 6640
    pub async fn set_passive_manager(&self, port: u16) -> Result<()> {
        let port = if port == 0 { DEFAULT_MANAGER_PORT } else { port };
        self.set_manager(&format!("ptcp:{}", port)).await
    }
}
