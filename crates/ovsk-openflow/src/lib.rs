//! OpenFlow 1.3 support for ovsk
//!
//! A minimal controller: wire codec for the messages the proxy exchanges with
//! Open vSwitch, a flow model, the connection handler and the flow pipeline.

pub mod codec;
pub mod consts;
pub mod controller;
pub mod error;
pub mod flow;
pub mod message;
pub mod pipeline;

pub use codec::{decode_match, encode_match};
pub use controller::{OpenFlowController, Outgoing, SwitchApp, SwitchHandle};
pub use error::{OpenFlowError, Result};
pub use flow::{Action, Flow, FlowMatch, FlowMod, FlowModCommand, Instruction, SetField};
pub use message::{
    ErrorMsg, FeaturesReply, FlowRemoved, Header, Message, MultipartReply, PacketIn, PortDesc,
    PortReason, PortStatus,
};
pub use pipeline::ServiceConnection;
