use crate::{
    types::{DeliveryTag, ShortString},
    BasicProperties, Result,
};

/// Type wrapping the output of a consumer
///
/// - Ok(Some(delivery)) carries the delivery
/// - Ok(None) means that the consumer got canceled
/// - Err(error) carries the error and is always followed by Ok(None)
pub(crate) type DeliveryResult = Result<Option<Delivery>>;

/// A received AMQP message.
///
/// Unless consuming with `no_ack`, acknowledge it through
/// [`Channel::basic_ack`](crate::Channel::basic_ack) using its delivery tag.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message. Use this for
    /// acknowledging the message.
    pub delivery_tag: DeliveryTag,

    /// The tag of the consumer the message was delivered to.
    pub consumer_tag: ShortString,

    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,

    /// The routing key of the message. May be an empty string
    /// if no routing key is specified.
    pub routing_key: ShortString,

    /// Whether this message was redelivered
    pub redelivered: bool,

    /// Contains the properties and the headers of the
    /// message.
    pub properties: BasicProperties,

    /// The payload of the message in binary format.
    pub data: Vec<u8>,
}

impl Delivery {
    pub(crate) fn new(
        delivery_tag: DeliveryTag,
        consumer_tag: ShortString,
        exchange: ShortString,
        routing_key: ShortString,
        redelivered: bool,
    ) -> Self {
        Self {
            delivery_tag,
            consumer_tag,
            exchange,
            routing_key,
            redelivered,
            properties: BasicProperties::default(),
            data: Vec::default(),
        }
    }

    pub(crate) fn receive_content(&mut self, data: Vec<u8>) {
        self.data.extend(data);
    }
}
