//! OpenFlow controller
//!
//! Listens for switch connections, runs the HELLO / FEATURES handshake and
//! hands every connected switch to a [`SwitchApp`] as a [`SwitchHandle`].
//! Outgoing messages are queued to a per-connection writer task, so sending
//! never blocks the caller.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consts::OFP_HEADER_LEN;
use crate::error::{OpenFlowError, Result};
use crate::flow::{Flow, FlowMod};
use crate::message::*;

/// Receiver of switch events
#[async_trait]
pub trait SwitchApp: Send + Sync + 'static {
    /// Handshake finished; the handle stays valid until the switch disconnects
    async fn switch_connected(&self, switch: SwitchHandle);

    /// The connection behind `switch` is gone; a newer connection from the
    /// same datapath may already have been handed over
    async fn switch_disconnected(&self, switch: SwitchHandle);

    async fn packet_in(&self, switch: &SwitchHandle, packet: PacketIn);

    async fn port_status(&self, _switch: &SwitchHandle, _status: PortStatus) {}

    async fn flow_removed(&self, _switch: &SwitchHandle, _removed: FlowRemoved) {}

    async fn multipart_reply(&self, _switch: &SwitchHandle, _reply: MultipartReply) {}

    async fn error(&self, _switch: &SwitchHandle, _error: ErrorMsg) {}
}

/// A message queued for the connection writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub xid: u32,
    pub message: Message,
}

/// Send side of a switch connection
#[derive(Debug, Clone)]
pub struct SwitchHandle {
    datapath_id: u64,
    tx: mpsc::UnboundedSender<Outgoing>,
    next_xid: Arc<AtomicU32>,
}

impl SwitchHandle {
    fn new(datapath_id: u64, tx: mpsc::UnboundedSender<Outgoing>, next_xid: Arc<AtomicU32>) -> Self {
        Self {
            datapath_id,
            tx,
            next_xid,
        }
    }

    /// A handle not backed by a connection; everything sent lands in the receiver
    pub fn detached(datapath_id: u64) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(datapath_id, tx, Arc::new(AtomicU32::new(1))), rx)
    }

    pub fn datapath_id(&self) -> u64 {
        self.datapath_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both handles write to the same connection
    pub fn same_connection(&self, other: &SwitchHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Queue a message; returns the xid it was sent with
    pub fn send(&self, message: Message) -> Result<u32> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(Outgoing { xid, message })
            .map_err(|_| OpenFlowError::Disconnected(self.datapath_id))?;
        Ok(xid)
    }

    pub fn install_flow(&self, flow: Flow) -> Result<()> {
        debug!(
            "Installing flow table={} priority={} on {:#x}",
            flow.table_id, flow.priority, self.datapath_id
        );
        self.send(Message::FlowMod(FlowMod::add(flow)))?;
        Ok(())
    }

    /// Strict delete: same table, priority and match
    pub fn remove_flow(&self, flow: &Flow) -> Result<()> {
        debug!(
            "Removing flow table={} priority={} on {:#x}",
            flow.table_id, flow.priority, self.datapath_id
        );
        self.send(Message::FlowMod(FlowMod::delete_strict(flow.clone())))?;
        Ok(())
    }
}

/// TCP listener the switch connects to
pub struct OpenFlowController<A: SwitchApp> {
    app: Arc<A>,
}

impl<A: SwitchApp> OpenFlowController<A> {
    pub fn new(app: Arc<A>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<A> {
        &self.app
    }

    /// Bind `addr` and serve until `shutdown` is cancelled
    pub async fn serve(self: Arc<Self>, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve an already bound listener
    pub async fn serve_listener(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("OpenFlow controller listening on {}", listener.local_addr()?);

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("OpenFlow controller shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted?,
            };

            info!("Switch connected from {}", peer);
            let controller = Arc::clone(&self);
            let token = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = controller.handle_connection(stream, peer, token).await {
                    error!("Switch connection {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let next_xid = Arc::new(AtomicU32::new(1));

        let writer_task = tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                let bytes = match out.message.encode(out.xid) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Dropping message type {}: {}", out.message.msg_type(), e);
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(&bytes).await {
                    warn!("Write to {} failed: {}", peer, e);
                    break;
                }
            }
        });

        // Handshake messages go through the same queue as everything else
        let raw = SwitchHandle::new(0, tx.clone(), Arc::clone(&next_xid));
        raw.send(Message::Hello)?;

        let mut switch: Option<SwitchHandle> = None;
        let result = loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                frame = read_frame(&mut reader) => frame,
            };
            let (header, body) = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            let message = match Message::decode(&header, &body) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Undecodable message type {} from {}: {}", header.msg_type, peer, e);
                    continue;
                }
            };

            match message {
                Message::Hello => {
                    debug!("HELLO from {}", peer);
                    if let Err(e) = raw.send(Message::FeaturesRequest) {
                        break Err(e);
                    }
                }
                Message::EchoRequest(data) => {
                    // Replies reuse the request xid
                    if tx
                        .send(Outgoing {
                            xid: header.xid,
                            message: Message::EchoReply(data),
                        })
                        .is_err()
                    {
                        break Err(OpenFlowError::Disconnected(0));
                    }
                }
                Message::EchoReply(_) => {}
                Message::FeaturesReply(features) => {
                    if switch.is_some() {
                        continue;
                    }
                    info!(
                        "Switch {:#018x} ready ({} tables)",
                        features.datapath_id, features.n_tables
                    );
                    let handle =
                        SwitchHandle::new(features.datapath_id, tx.clone(), Arc::clone(&next_xid));
                    self.app.switch_connected(handle.clone()).await;
                    switch = Some(handle);
                }
                other => match &switch {
                    Some(handle) => self.dispatch(handle, other).await,
                    None => {
                        if let Message::Error(e) = &other {
                            break Err(OpenFlowError::Handshake {
                                peer: peer.to_string(),
                                reason: format!("error type {} code {}", e.err_type, e.code),
                            });
                        }
                        debug!("Ignoring message type {} before handshake", other.msg_type());
                    }
                },
            }
        };

        writer_task.abort();
        if let Some(handle) = switch {
            info!("Switch {:#018x} disconnected", handle.datapath_id());
            self.app.switch_disconnected(handle).await;
        }
        result
    }

    async fn dispatch(&self, switch: &SwitchHandle, message: Message) {
        match message {
            Message::PacketIn(packet) => self.app.packet_in(switch, packet).await,
            Message::PortStatus(status) => self.app.port_status(switch, status).await,
            Message::FlowRemoved(removed) => self.app.flow_removed(switch, removed).await,
            Message::MultipartReply(reply) => self.app.multipart_reply(switch, reply).await,
            Message::Error(e) => self.app.error(switch, e).await,
            other => debug!("Unhandled message type {}", other.msg_type()),
        }
    }
}

/// Read one message; `None` on a clean end of stream
async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<(Header, Vec<u8>)>> {
    let mut raw = [0u8; OFP_HEADER_LEN];
    match reader.read_exact(&mut raw).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = Header::parse(&raw)?;
    let mut body = vec![0u8; header.body_len()];
    reader.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowMatch;

    #[test]
    fn test_detached_handle_queues_messages() {
        let (handle, mut rx) = SwitchHandle::detached(0xab);
        let flow = Flow::new(1, 50).matching(FlowMatch::new().in_port(3));
        handle.install_flow(flow.clone()).unwrap();
        handle.remove_flow(&flow).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.message, Message::FlowMod(FlowMod::add(flow.clone())));
        assert_eq!(second.message, Message::FlowMod(FlowMod::delete_strict(flow)));
        assert!(second.xid > first.xid);
    }

    #[test]
    fn test_same_connection() {
        let (first, _rx1) = SwitchHandle::detached(1);
        let (second, _rx2) = SwitchHandle::detached(1);
        assert!(first.same_connection(&first.clone()));
        assert!(!first.same_connection(&second));
    }

    #[test]
    fn test_send_after_close_is_disconnected() {
        let (handle, rx) = SwitchHandle::detached(7);
        drop(rx);
        assert!(handle.is_closed());
        let err = handle.send(Message::Hello).unwrap_err();
        assert!(matches!(err, OpenFlowError::Disconnected(7)));
    }
}
