//! Controller handshake and dispatch against a scripted switch

use async_trait::async_trait;
use ovsk_openflow::consts::*;
use ovsk_openflow::pipeline::{self, install_pipeline};
use ovsk_openflow::{
    FeaturesReply, FlowMatch, Header, Message, OpenFlowController, PacketIn, SwitchApp,
    SwitchHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const DPID: u64 = 0x0000_5254_0012_3456;

#[derive(Debug)]
enum Event {
    Connected(u64),
    Disconnected(u64),
    PacketIn(PacketIn),
}

struct RecordingApp {
    events: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl SwitchApp for RecordingApp {
    async fn switch_connected(&self, switch: SwitchHandle) {
        install_pipeline(&switch).unwrap();
        let _ = self.events.send(Event::Connected(switch.datapath_id()));
    }

    async fn switch_disconnected(&self, switch: SwitchHandle) {
        let _ = self.events.send(Event::Disconnected(switch.datapath_id()));
    }

    async fn packet_in(&self, _switch: &SwitchHandle, packet: PacketIn) {
        let _ = self.events.send(Event::PacketIn(packet));
    }
}

async fn start() -> (
    std::net::SocketAddr,
    mpsc::UnboundedReceiver<Event>,
    CancellationToken,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let controller = Arc::new(OpenFlowController::new(Arc::new(RecordingApp { events: tx })));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    tokio::spawn(controller.serve_listener(listener, token.clone()));
    (addr, rx, token)
}

async fn read_message(stream: &mut TcpStream) -> (Header, Message) {
    let mut raw = [0u8; OFP_HEADER_LEN];
    stream.read_exact(&mut raw).await.unwrap();
    let header = Header::parse(&raw).unwrap();
    let mut body = vec![0u8; header.body_len()];
    stream.read_exact(&mut body).await.unwrap();
    let message = Message::decode(&header, &body).unwrap();
    (header, message)
}

async fn send(stream: &mut TcpStream, message: Message, xid: u32) {
    stream.write_all(&message.encode(xid).unwrap()).await.unwrap();
}

async fn handshake(stream: &mut TcpStream) {
    let (_, hello) = read_message(stream).await;
    assert_eq!(hello, Message::Hello);
    send(stream, Message::Hello, 1).await;
    let (_, request) = read_message(stream).await;
    assert_eq!(request, Message::FeaturesRequest);
    send(
        stream,
        Message::FeaturesReply(FeaturesReply {
            datapath_id: DPID,
            n_buffers: 0,
            n_tables: 254,
            auxiliary_id: 0,
            capabilities: 0x4f,
        }),
        2,
    )
    .await;
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_handshake_installs_pipeline() {
    let (addr, mut events, _token) = start().await;
    let mut switch = TcpStream::connect(addr).await.unwrap();
    handshake(&mut switch).await;

    assert!(matches!(next_event(&mut events).await, Event::Connected(DPID)));

    let mut flows = Vec::new();
    for _ in 0..2 {
        match read_message(&mut switch).await {
            (_, Message::FlowMod(fm)) => flows.push(fm.flow),
            (_, other) => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(flows, pipeline::base_flows());
}

#[tokio::test]
async fn test_echo_request_is_answered_with_same_xid() {
    let (addr, _events, _token) = start().await;
    let mut switch = TcpStream::connect(addr).await.unwrap();
    let (_, hello) = read_message(&mut switch).await;
    assert_eq!(hello, Message::Hello);

    send(&mut switch, Message::EchoRequest(b"ping".to_vec()), 77).await;
    let (header, reply) = read_message(&mut switch).await;
    assert_eq!(header.xid, 77);
    assert_eq!(reply, Message::EchoReply(b"ping".to_vec()));
}

#[tokio::test]
async fn test_packet_in_and_disconnect_reach_app() {
    let (addr, mut events, _token) = start().await;
    let mut switch = TcpStream::connect(addr).await.unwrap();
    handshake(&mut switch).await;
    assert!(matches!(next_event(&mut events).await, Event::Connected(DPID)));

    let packet = PacketIn {
        buffer_id: OFP_NO_BUFFER,
        total_len: 3,
        reason: 0,
        table_id: 0,
        cookie: 0,
        match_: FlowMatch::new().in_port(7),
        data: vec![1, 2, 3],
    };
    send(&mut switch, Message::PacketIn(packet.clone()), 10).await;
    match next_event(&mut events).await {
        Event::PacketIn(received) => {
            assert_eq!(received, packet);
            assert_eq!(received.in_port(), Some(7));
        }
        other => panic!("unexpected {other:?}"),
    }

    drop(switch);
    assert!(matches!(
        next_event(&mut events).await,
        Event::Disconnected(DPID)
    ));
}

#[tokio::test]
async fn test_messages_before_handshake_are_not_dispatched() {
    let (addr, mut events, _token) = start().await;
    let mut switch = TcpStream::connect(addr).await.unwrap();
    let _ = read_message(&mut switch).await;

    let packet = PacketIn {
        buffer_id: OFP_NO_BUFFER,
        total_len: 0,
        reason: 0,
        table_id: 0,
        cookie: 0,
        match_: FlowMatch::new(),
        data: Vec::new(),
    };
    send(&mut switch, Message::PacketIn(packet), 3).await;
    drop(switch);

    let quiet = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
    assert!(matches!(quiet, Err(_) | Ok(None)));
}
