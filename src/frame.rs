//! The frames exchanged with the codec collaborator.
//!
//! Only the channel-level methods are modelled: connection-level traffic
//! (channel 0) is handled outside of this crate.

use crate::{
    exchange::ExchangeKind,
    options::*,
    types::{
        DeliveryTag, FieldTable, FrameSize, Identifier, MessageCount, PayloadSize,
        ReplyCode, ShortString,
    },
    BasicProperties,
};

/// Class id of the basic class, carried by content header frames.
pub const BASIC_CLASS_ID: Identifier = 60;

/// Bytes of a frame that are not payload: type, channel, size and frame-end.
pub const FRAME_OVERHEAD: FrameSize = 8;

/// The smallest frame-max a peer may negotiate.
pub const FRAME_MIN_SIZE: FrameSize = 4096;

/// A frame on a given channel, the channel number travelling alongside it.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Method(Box<Method>),
    Header {
        class_id: Identifier,
        body_size: PayloadSize,
        properties: BasicProperties,
    },
    Body(Vec<u8>),
}

impl Frame {
    pub fn method(method: Method) -> Self {
        Self::Method(Box::new(method))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Method {
    ChannelOpen,
    ChannelOpenOk,
    ChannelFlow {
        active: bool,
    },
    ChannelFlowOk {
        active: bool,
    },
    ChannelClose {
        reply_code: ReplyCode,
        reply_text: ShortString,
        class_id: Identifier,
        method_id: Identifier,
    },
    ChannelCloseOk,

    ExchangeDeclare {
        exchange: ShortString,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    },
    ExchangeDeclareOk,
    ExchangeDelete {
        exchange: ShortString,
        options: ExchangeDeleteOptions,
    },
    ExchangeDeleteOk,
    ExchangeBind {
        destination: ShortString,
        source: ShortString,
        routing_key: ShortString,
        options: ExchangeBindOptions,
        arguments: FieldTable,
    },
    ExchangeBindOk,
    ExchangeUnbind {
        destination: ShortString,
        source: ShortString,
        routing_key: ShortString,
        options: ExchangeUnbindOptions,
        arguments: FieldTable,
    },
    ExchangeUnbindOk,

    QueueDeclare {
        queue: ShortString,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    },
    QueueDeclareOk {
        queue: ShortString,
        message_count: MessageCount,
        consumer_count: u32,
    },
    QueueBind {
        queue: ShortString,
        exchange: ShortString,
        routing_key: ShortString,
        options: QueueBindOptions,
        arguments: FieldTable,
    },
    QueueBindOk,
    QueueUnbind {
        queue: ShortString,
        exchange: ShortString,
        routing_key: ShortString,
        arguments: FieldTable,
    },
    QueueUnbindOk,
    QueuePurge {
        queue: ShortString,
        options: QueuePurgeOptions,
    },
    QueuePurgeOk {
        message_count: MessageCount,
    },
    QueueDelete {
        queue: ShortString,
        options: QueueDeleteOptions,
    },
    QueueDeleteOk {
        message_count: MessageCount,
    },

    BasicQos {
        prefetch_count: u16,
        options: BasicQosOptions,
    },
    BasicQosOk,
    BasicConsume {
        queue: ShortString,
        consumer_tag: ShortString,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    },
    BasicConsumeOk {
        consumer_tag: ShortString,
    },
    BasicCancel {
        consumer_tag: ShortString,
        options: BasicCancelOptions,
    },
    BasicCancelOk {
        consumer_tag: ShortString,
    },
    BasicPublish {
        exchange: ShortString,
        routing_key: ShortString,
        options: BasicPublishOptions,
    },
    BasicDeliver {
        consumer_tag: ShortString,
        delivery_tag: DeliveryTag,
        redelivered: bool,
        exchange: ShortString,
        routing_key: ShortString,
    },
    BasicAck {
        delivery_tag: DeliveryTag,
        multiple: bool,
    },
    BasicNack {
        delivery_tag: DeliveryTag,
        multiple: bool,
        requeue: bool,
    },
    BasicReject {
        delivery_tag: DeliveryTag,
        requeue: bool,
    },

    ConfirmSelect {
        options: ConfirmSelectOptions,
    },
    ConfirmSelectOk,
}

/// The reply a synchronous request waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReplyKind {
    ChannelOpenOk,
    ChannelCloseOk,
    ExchangeDeclareOk,
    ExchangeDeleteOk,
    ExchangeBindOk,
    ExchangeUnbindOk,
    QueueDeclareOk,
    QueueBindOk,
    QueueUnbindOk,
    QueuePurgeOk,
    QueueDeleteOk,
    BasicQosOk,
    BasicConsumeOk,
    BasicCancelOk,
    ConfirmSelectOk,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChannelOpen => "channel.open",
            Self::ChannelOpenOk => "channel.open-ok",
            Self::ChannelFlow { .. } => "channel.flow",
            Self::ChannelFlowOk { .. } => "channel.flow-ok",
            Self::ChannelClose { .. } => "channel.close",
            Self::ChannelCloseOk => "channel.close-ok",
            Self::ExchangeDeclare { .. } => "exchange.declare",
            Self::ExchangeDeclareOk => "exchange.declare-ok",
            Self::ExchangeDelete { .. } => "exchange.delete",
            Self::ExchangeDeleteOk => "exchange.delete-ok",
            Self::ExchangeBind { .. } => "exchange.bind",
            Self::ExchangeBindOk => "exchange.bind-ok",
            Self::ExchangeUnbind { .. } => "exchange.unbind",
            Self::ExchangeUnbindOk => "exchange.unbind-ok",
            Self::QueueDeclare { .. } => "queue.declare",
            Self::QueueDeclareOk { .. } => "queue.declare-ok",
            Self::QueueBind { .. } => "queue.bind",
            Self::QueueBindOk => "queue.bind-ok",
            Self::QueueUnbind { .. } => "queue.unbind",
            Self::QueueUnbindOk => "queue.unbind-ok",
            Self::QueuePurge { .. } => "queue.purge",
            Self::QueuePurgeOk { .. } => "queue.purge-ok",
            Self::QueueDelete { .. } => "queue.delete",
            Self::QueueDeleteOk { .. } => "queue.delete-ok",
            Self::BasicQos { .. } => "basic.qos",
            Self::BasicQosOk => "basic.qos-ok",
            Self::BasicConsume { .. } => "basic.consume",
            Self::BasicConsumeOk { .. } => "basic.consume-ok",
            Self::BasicCancel { .. } => "basic.cancel",
            Self::BasicCancelOk { .. } => "basic.cancel-ok",
            Self::BasicPublish { .. } => "basic.publish",
            Self::BasicDeliver { .. } => "basic.deliver",
            Self::BasicAck { .. } => "basic.ack",
            Self::BasicNack { .. } => "basic.nack",
            Self::BasicReject { .. } => "basic.reject",
            Self::ConfirmSelect { .. } => "confirm.select",
            Self::ConfirmSelectOk => "confirm.select-ok",
        }
    }

    /// The reply the broker sends back for this request, if we have to wait for one.
    pub(crate) fn expected_reply(&self) -> Option<ReplyKind> {
        match self {
            Self::ChannelOpen => Some(ReplyKind::ChannelOpenOk),
            Self::ChannelClose { .. } => Some(ReplyKind::ChannelCloseOk),
            Self::ExchangeDeclare { options, .. } => {
                (!options.nowait).then_some(ReplyKind::ExchangeDeclareOk)
            }
            Self::ExchangeDelete { options, .. } => {
                (!options.nowait).then_some(ReplyKind::ExchangeDeleteOk)
            }
            Self::ExchangeBind { options, .. } => {
                (!options.nowait).then_some(ReplyKind::ExchangeBindOk)
            }
            Self::ExchangeUnbind { options, .. } => {
                (!options.nowait).then_some(ReplyKind::ExchangeUnbindOk)
            }
            Self::QueueDeclare { options, .. } => {
                (!options.nowait).then_some(ReplyKind::QueueDeclareOk)
            }
            Self::QueueBind { options, .. } => (!options.nowait).then_some(ReplyKind::QueueBindOk),
            Self::QueueUnbind { .. } => Some(ReplyKind::QueueUnbindOk),
            Self::QueuePurge { options, .. } => {
                (!options.nowait).then_some(ReplyKind::QueuePurgeOk)
            }
            Self::QueueDelete { options, .. } => {
                (!options.nowait).then_some(ReplyKind::QueueDeleteOk)
            }
            Self::BasicQos { .. } => Some(ReplyKind::BasicQosOk),
            Self::BasicConsume { options, .. } => {
                (!options.nowait).then_some(ReplyKind::BasicConsumeOk)
            }
            Self::BasicCancel { options, .. } => {
                (!options.nowait).then_some(ReplyKind::BasicCancelOk)
            }
            Self::ConfirmSelect { options } => {
                (!options.nowait).then_some(ReplyKind::ConfirmSelectOk)
            }
            _ => None,
        }
    }

    /// Which pending request this method answers, if it is a reply at all.
    pub(crate) fn reply_kind(&self) -> Option<ReplyKind> {
        match self {
            Self::ChannelOpenOk => Some(ReplyKind::ChannelOpenOk),
            Self::ChannelCloseOk => Some(ReplyKind::ChannelCloseOk),
            Self::ExchangeDeclareOk => Some(ReplyKind::ExchangeDeclareOk),
            Self::ExchangeDeleteOk => Some(ReplyKind::ExchangeDeleteOk),
            Self::ExchangeBindOk => Some(ReplyKind::ExchangeBindOk),
            Self::ExchangeUnbindOk => Some(ReplyKind::ExchangeUnbindOk),
            Self::QueueDeclareOk { .. } => Some(ReplyKind::QueueDeclareOk),
            Self::QueueBindOk => Some(ReplyKind::QueueBindOk),
            Self::QueueUnbindOk => Some(ReplyKind::QueueUnbindOk),
            Self::QueuePurgeOk { .. } => Some(ReplyKind::QueuePurgeOk),
            Self::QueueDeleteOk { .. } => Some(ReplyKind::QueueDeleteOk),
            Self::BasicQosOk => Some(ReplyKind::BasicQosOk),
            Self::BasicConsumeOk { .. } => Some(ReplyKind::BasicConsumeOk),
            Self::BasicCancelOk { .. } => Some(ReplyKind::BasicCancelOk),
            Self::ConfirmSelectOk => Some(ReplyKind::ConfirmSelectOk),
            _ => None,
        }
    }
}

/// Split a message into the frames that carry it: method, content header,
/// then as many body frames as needed to respect `max_body_size`.
///
/// An empty payload is sent without any body frame.
pub(crate) fn content_frames(
    method: Method,
    payload: &[u8],
    properties: BasicProperties,
    max_body_size: usize,
) -> Vec<Frame> {
    let max_body_size = max_body_size.max(1);
    let mut frames = Vec::with_capacity(2 + payload.len().div_ceil(max_body_size));
    frames.push(Frame::method(method));
    frames.push(Frame::Header {
        class_id: BASIC_CLASS_ID,
        body_size: payload.len() as PayloadSize,
        properties,
    });
    frames.extend(
        payload
            .chunks(max_body_size)
            .map(|chunk| Frame::Body(chunk.to_vec())),
    );
    frames
}
