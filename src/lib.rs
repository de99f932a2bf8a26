#![warn(rust_2018_idioms)]

//! amqp-channels
//!
//! The channel layer of an AMQP 0.9.1 client, targeting especially RabbitMQ:
//! channel number allocation, one ordered command queue per channel,
//! publisher confirms, and the recovery of channels and their topology after
//! a connection loss.
//!
//! The socket and the codec are not part of this crate: they are plugged in
//! through the [`Transport`] trait for writing, and
//! [`Connection::handle_frame`] for reading.
//!
//! The main access point is the [`Channel`], which contains the individual
//! AMQP methods. As to the AMQP specification, one [`Connection`] can contain
//! multiple channels.
//!
//! ## Feature switches
//!
//! * `default-runtime` (*default*): run the channels on async-global-executor
//!   when no executor is configured
//!
//! ## Example
//!
//! ```rust,no_run
//! use amqp_channels::{
//!     frame::Frame,
//!     options::*,
//!     types::{ChannelId, FieldTable},
//!     BasicProperties, Connection, ConnectionProperties, RecoveryConfig, Result, Transport,
//! };
//! use std::sync::Arc;
//! use tracing::info;
//!
//! // Encodes frames and writes them to the socket
//! struct Socket;
//!
//! impl Transport for Socket {
//!     fn write_frame(&self, _channel_id: ChannelId, _frame: Frame) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let properties = ConnectionProperties::default()
//!         .with_recovery_config(RecoveryConfig::default().auto_recover_channels());
//!     // The socket layer hands what it reads to `conn.handle_frame`
//!     let conn = Connection::new(Arc::new(Socket), properties)?;
//!
//!     let channel = conn.create_channel().wait()?;
//!     channel
//!         .confirm_select(ConfirmSelectOptions::default())
//!         .wait()?;
//!
//!     let queue = channel
//!         .queue_declare(
//!             "hello".into(),
//!             QueueDeclareOptions::default(),
//!             FieldTable::default(),
//!         )
//!         .wait()?;
//!
//!     info!(?queue, "Declared queue");
//!
//!     let confirm = channel
//!         .basic_publish(
//!             "".into(),
//!             queue.name().clone(),
//!             BasicPublishOptions::default(),
//!             b"Hello world!",
//!             BasicProperties::default(),
//!         )
//!         .wait()?;
//!     assert!(confirm.is_ack());
//!     Ok(())
//! }
//! ```

pub use amq_protocol::{
    protocol::{self, BasicProperties},
    types,
};

pub use channel::Channel;
pub use channel_allocator::ChannelAllocator;
pub use channel_status::{ChannelState, ChannelStatus};
pub use configuration::Configuration;
pub use connection::Connection;
pub use connection_properties::ConnectionProperties;
pub use connection_status::{ConnectionState, ConnectionStatus};
pub use consumer::Consumer;
pub use error::{Error, ErrorKind, ProtocolError, Result};
pub use exchange::ExchangeKind;
pub use name_generator::{
    DefaultNameGenerator, NameGenerator, CONSUMER_TAG_PREFIX, QUEUE_NAME_PREFIX,
};
pub use promise::Promise;
pub use publisher_confirm::{Confirmation, PublisherConfirm};
pub use queue::Queue;
pub use recovery_config::RecoveryConfig;
pub use topology::{ChannelDefinition, Declaration, TopologyDefinition};
pub use transport::Transport;

pub mod frame;
pub mod message;
pub mod options;

mod channel;
mod channel_allocator;
mod channel_receiver_state;
mod channel_recovery_context;
mod channel_status;
mod channels;
mod configuration;
mod confirmations;
mod connection;
mod connection_properties;
mod connection_status;
mod consumer;
mod consumers;
mod dispatcher;
mod error;
mod error_handler;
mod error_holder;
mod exchange;
mod name_generator;
mod promise;
mod publisher_confirm;
mod queue;
mod recovery_config;
mod replay_log;
mod replies;
mod topology;
mod transport;
