#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod identity;
pub mod realtime;
pub mod stomp;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use identity::{CurrentMember, IdentityProvider, MemberStore, UserId};
pub use realtime::{
    Channel, Client, ConnectOutcome, ConnectionCheck, ConnectionState, ConnectionStatus,
    SubscriptionHandle,
};
pub use stomp::Message;
pub use ws::config::Config;
