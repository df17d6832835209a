//! Process-group layer for the makroq task queue.
//!
//! Models a distributed-memory computation as a set of peer rank threads
//! (the *universe*) with blocking collectives, a round-robin partitioner
//! producing disjoint *subworlds*, and named request/reply services for
//! point-to-point coordinator traffic.

pub mod error;
pub mod group;
pub mod message;
pub mod rpc;
pub mod subworld;
pub mod universe;

pub use error::CommError;
pub use group::{Communicator, CommunicatorExt};
pub use message::Message;
pub use rpc::{
    ChannelRequestClient, ChannelRequestServer, ReplyToken, RequestHandler, RequestSender,
};
pub use subworld::{partition, Subworld};
pub use universe::Universe;
