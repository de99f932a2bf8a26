use crate::{
    channel_allocator::ChannelAllocator,
    channels::Channels,
    connection_properties::ConnectionProperties,
    connection_status::{ConnectionState, ConnectionStatus},
    error_handler::ErrorHandler,
    frame::Frame,
    topology::TopologyDefinition,
    transport::{FrameWriter, Transport},
    types::{ChannelId, FrameSize, ReplyCode},
    Channel, Configuration, Error, ErrorKind, Promise, Result,
};
use std::{fmt, sync::Arc};
use tracing::{info, warn};

/// The channel side of an AMQP connection.
///
/// The socket layer owns the actual connection: it feeds the frames it reads
/// through [`handle_frame`](Connection::handle_frame), writes what the
/// channels send through the [`Transport`], and reports connection losses
/// and reconnections.
///
/// Also see the RabbitMQ documentation on [connections](https://www.rabbitmq.com/connections.html).
#[derive(Clone)]
pub struct Connection {
    configuration: Configuration,
    status: ConnectionStatus,
    channels: Channels,
    writer: FrameWriter,
    error_handler: ErrorHandler,
    auto_recover_channels: bool,
}

impl Connection {
    /// Set up the channel layer on top of an established connection.
    ///
    /// Fails with [`ErrorKind::NoConfiguredExecutor`] if no executor was
    /// given and the `default-runtime` feature is disabled.
    pub fn new(transport: Arc<dyn Transport>, properties: ConnectionProperties) -> Result<Self> {
        let executor = properties
            .executor
            .ok_or(ErrorKind::NoConfiguredExecutor)?;
        let configuration = Configuration::new(properties.channel_max, properties.frame_max);
        let error_handler = ErrorHandler::default();
        let writer = FrameWriter::new(transport, error_handler.clone());
        let auto_recover_channels = properties.recovery_config.auto_recover_channels;
        let channels = Channels::new(
            configuration.clone(),
            writer.clone(),
            executor,
            properties.recovery_config,
            properties.name_generator,
        );
        Ok(Self {
            configuration,
            status: ConnectionStatus::default(),
            channels,
            writer,
            error_handler,
            auto_recover_channels,
        })
    }

    /// Creates a new [`Channel`] on this connection and opens it.
    ///
    /// This method is only successful if the client is connected.
    /// Otherwise, [`ErrorKind::InvalidConnectionState`] error is returned.
    pub fn create_channel(&self) -> Promise<Channel> {
        if !self.status.connected() {
            return Promise::new_with_data(Err(
                ErrorKind::InvalidConnectionState(self.status.state()).into()
            ));
        }
        match self.channels.create() {
            Ok(channel) => channel.open_then(Channel::clone),
            Err(error) => Promise::new_with_data(Err(error)),
        }
    }

    /// Hand over a frame read from the socket.
    pub fn handle_frame(&self, channel_id: ChannelId, frame: Frame) -> Result<()> {
        self.channels.handle_frame(channel_id, frame)
    }

    /// The connection went away: every channel either waits for
    /// [`reconnected`](Connection::reconnected) or gets closed, depending on
    /// the recovery configuration.
    pub fn connection_lost(&self, cause: Error) {
        if self.status.closed() {
            return;
        }
        warn!(%cause, "connection lost");
        self.status.set_state(if self.auto_recover_channels {
            ConnectionState::Recovering
        } else {
            ConnectionState::Closed
        });
        self.channels.connection_lost(cause);
    }

    /// A new connection is up: recover every channel that waits for it.
    ///
    /// Resolves once they all got through their replay, with the first
    /// failure if any. Channels that could not be recovered end up closed.
    pub fn reconnected(&self, transport: Arc<dyn Transport>) -> Promise<()> {
        if !self.status.recovering() {
            return Promise::new_with_data(Err(
                ErrorKind::InvalidConnectionState(self.status.state()).into()
            ));
        }
        info!("connection is back, recovering channels");
        self.writer.set_transport(transport);
        self.status.set_state(ConnectionState::Connected);
        self.channels.recover_all()
    }

    /// Apply the channel-max and frame-max negotiated with the broker, for
    /// instance on a new connection before calling
    /// [`reconnected`](Connection::reconnected).
    ///
    /// Lowering channel-max leaves the channels already open alone.
    pub fn set_tuning(&self, channel_max: ChannelId, frame_max: FrameSize) {
        self.configuration.set_channel_max(channel_max);
        self.configuration.set_frame_max(frame_max);
        self.channels.allocator().set_channel_max(channel_max);
    }

    /// Close every channel, then refuse to open new ones.
    pub fn close(&self, reply_code: ReplyCode, reply_text: &str) -> Promise<()> {
        self.status.set_state(ConnectionState::Closed);
        self.channels.close_all(reply_code, reply_text)
    }

    /// Called with failures nobody waits for, such as a transport write error.
    pub fn on_error<E: Fn(Error) + Send + Sync + 'static>(&self, handler: E) {
        self.error_handler.set_handler(handler);
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn channel_allocator(&self) -> &ChannelAllocator {
        self.channels.allocator()
    }

    /// The channels that are not closed yet.
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.list()
    }

    /// Everything the channels declared, as recovery would replay it.
    pub fn topology(&self) -> TopologyDefinition {
        self.channels.topology()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("configuration", &self.configuration)
            .field("status", &self.status)
            .field("channels", &self.channels)
            .field("error_handler", &self.error_handler)
            .finish()
    }
}
