//! Kubernetes resource watchers
//!
//! One watcher per kind streams objects from the API server, converts them to
//! the proxy's views and hands ADD / UPDATE / REMOVE records to a
//! [`Reconcile`] sink. A reconcile failure is logged and the stream goes on.

pub mod convert;
pub mod tracker;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Node, Pod, Service};
use kube::api::ListParams;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use ovsk_core::{ChangePredicate, EndpointInfo, NodeInfo, PodInfo, ServiceInfo, Update};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::reconciler::ServiceProxy;
pub use tracker::ChangeTracker;

/// A watched Kubernetes kind and its proxy view
pub trait Watched:
    kube::Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    type Info: ChangePredicate + Clone + Send + Sync + 'static;

    const KIND: &'static str;

    /// `None` when the object carries nothing the proxy can use yet
    fn info(&self) -> Option<Self::Info>;

    /// Tracker key; `namespace:name` for namespaced kinds
    fn key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}:{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }
}

impl Watched for Node {
    type Info = NodeInfo;
    const KIND: &'static str = "Node";

    fn info(&self) -> Option<NodeInfo> {
        Some(convert::node_info(self))
    }
}

impl Watched for Pod {
    type Info = PodInfo;
    const KIND: &'static str = "Pod";

    fn info(&self) -> Option<PodInfo> {
        Some(convert::pod_info(self))
    }
}

impl Watched for Service {
    type Info = ServiceInfo;
    const KIND: &'static str = "Service";

    fn info(&self) -> Option<ServiceInfo> {
        Some(convert::service_info(self))
    }
}

impl Watched for Endpoints {
    type Info = EndpointInfo;
    const KIND: &'static str = "Endpoints";

    fn info(&self) -> Option<EndpointInfo> {
        convert::endpoint_info(self)
    }
}

/// Receiver of change records for one resource view
#[async_trait]
pub trait Reconcile<T>: Send + Sync {
    async fn reconcile(&self, update: Update<T>) -> Result<()>;
}

#[async_trait]
impl Reconcile<NodeInfo> for ServiceProxy {
    async fn reconcile(&self, update: Update<NodeInfo>) -> Result<()> {
        self.on_node_update(update).await
    }
}

#[async_trait]
impl Reconcile<PodInfo> for ServiceProxy {
    async fn reconcile(&self, update: Update<PodInfo>) -> Result<()> {
        self.on_pod_update(update).await
    }
}

#[async_trait]
impl Reconcile<ServiceInfo> for ServiceProxy {
    async fn reconcile(&self, update: Update<ServiceInfo>) -> Result<()> {
        self.on_service_update(update).await
    }
}

#[async_trait]
impl Reconcile<EndpointInfo> for ServiceProxy {
    async fn reconcile(&self, update: Update<EndpointInfo>) -> Result<()> {
        self.on_endpoints_update(update).await
    }
}

/// Cluster-wide watcher for one kind
pub struct ResourceWatcher<K: Watched> {
    api: Api<K>,
    token: CancellationToken,
    tracker: ChangeTracker<K::Info>,
}

impl<K: Watched> ResourceWatcher<K> {
    pub fn new(client: Client, token: CancellationToken) -> Self {
        Self {
            api: Api::all(client),
            token,
            tracker: ChangeTracker::new(),
        }
    }

    /// Stream events into `sink` until cancelled or the stream ends
    pub async fn run<R>(mut self, sink: Arc<R>)
    where
        R: Reconcile<K::Info> + ?Sized,
    {
        info!("Watching {} objects", K::KIND);
        let mut stream = watcher::watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => break,
                event = stream.try_next() => event,
            };
            match event {
                Ok(Some(event)) => {
                    for update in self.apply(event) {
                        let op = update.op;
                        if let Err(e) = sink.reconcile(update).await {
                            warn!("{} {} failed: {}", K::KIND, op, e);
                        }
                    }
                }
                Ok(None) => break,
                // The backoff retries the watch; nothing to do but report it
                Err(e) => warn!("{} watch error: {}", K::KIND, e),
            }
        }
        info!("{} watcher stopped", K::KIND);
    }

    /// Fold one watch event into the tracker
    fn apply(&mut self, event: Event<K>) -> Vec<Update<K::Info>> {
        match event {
            Event::Init => {
                debug!("{} relist started", K::KIND);
                self.tracker.begin_relist();
                Vec::new()
            }
            Event::InitApply(obj) | Event::Apply(obj) => self.observe(&obj).into_iter().collect(),
            Event::InitDone => {
                let removed = self.tracker.finish_relist();
                debug!("{} relist done, {} gone", K::KIND, removed.len());
                removed
            }
            Event::Delete(obj) => self.tracker.forget(&obj.key()).into_iter().collect(),
        }
    }

    fn observe(&mut self, obj: &K) -> Option<Update<K::Info>> {
        let key = obj.key();
        match obj.info() {
            Some(info) => self.tracker.observe(&key, info),
            None => self.tracker.forget(&key),
        }
    }
}

/// Spawn the four watchers feeding `proxy`
pub fn spawn_all(
    client: Client,
    proxy: Arc<ServiceProxy>,
    token: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    vec![
        tokio::spawn(ResourceWatcher::<Node>::new(client.clone(), token.clone()).run(proxy.clone())),
        tokio::spawn(ResourceWatcher::<Pod>::new(client.clone(), token.clone()).run(proxy.clone())),
        tokio::spawn(
            ResourceWatcher::<Service>::new(client.clone(), token.clone()).run(proxy.clone()),
        ),
        tokio::spawn(ResourceWatcher::<Endpoints>::new(client, token).run(proxy)),
    ]
}

/// Internal IP of the node whose `Hostname` address is `hostname`
pub async fn node_ip_for_host(client: Client, hostname: &str) -> Result<Option<Ipv4Addr>> {
    let nodes: Api<Node> = Api::all(client);
    let list = nodes.list(&ListParams::default()).await?;
    Ok(list
        .items
        .iter()
        .map(convert::node_info)
        .find(|node| node.hostname.as_deref() == Some(hostname))
        .and_then(|node| node.internal_ip))
}
