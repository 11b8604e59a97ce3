//! Peer-to-peer RPC surface.
//!
//! Plants talk to each other over plain TCP with one JSON document per line.
//! Every request is answered by an [`wire::Ack`]; tokens and winner
//! announcements are acknowledged before they are processed so the serving
//! connection is never blocked by downstream ring forwarding.

pub mod client;
pub mod server;
pub mod wire;

pub use client::PeerClient;
pub use server::RpcServer;
pub use wire::{Ack, ElectionToken, PeerMessage, WinnerAnnouncement};
