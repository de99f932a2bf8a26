use crate::{
    exchange::ExchangeKind,
    frame::Method,
    options::*,
    types::{ChannelId, FieldTable, ShortString},
};
use serde::{Deserialize, Serialize};

/// Everything the channels of a connection declared, as it would be replayed
/// after a connection loss.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyDefinition {
    pub channels: Vec<ChannelDefinition>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelDefinition {
    pub id: ChannelId,
    /// Whether publisher confirms get re-enabled
    pub confirm: bool,
    /// In declaration order
    pub declarations: Vec<Declaration>,
}

/// One successful declaration, replayed as-is during recovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    Exchange {
        name: ShortString,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    },
    ExchangeBinding {
        destination: ShortString,
        source: ShortString,
        routing_key: ShortString,
        arguments: FieldTable,
    },
    Queue {
        name: ShortString,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    },
    QueueBinding {
        queue: ShortString,
        exchange: ShortString,
        routing_key: ShortString,
        arguments: FieldTable,
    },
    Qos {
        prefetch_count: u16,
        options: BasicQosOptions,
    },
    Consumer {
        queue: ShortString,
        tag: ShortString,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    },
}

impl Declaration {
    /// The request that re-creates this declaration, waiting for the broker's
    /// answer so that a refusal aborts the replay.
    pub(crate) fn to_method(&self) -> Method {
        match self.clone() {
            Self::Exchange {
                name,
                kind,
                options,
                arguments,
            } => Method::ExchangeDeclare {
                exchange: name,
                kind,
                options: ExchangeDeclareOptions {
                    nowait: false,
                    ..options
                },
                arguments,
            },
            Self::ExchangeBinding {
                destination,
                source,
                routing_key,
                arguments,
            } => Method::ExchangeBind {
                destination,
                source,
                routing_key,
                options: ExchangeBindOptions::default(),
                arguments,
            },
            Self::Queue {
                name,
                options,
                arguments,
            } => Method::QueueDeclare {
                queue: name,
                options: QueueDeclareOptions {
                    nowait: false,
                    ..options
                },
                arguments,
            },
            Self::QueueBinding {
                queue,
                exchange,
                routing_key,
                arguments,
            } => Method::QueueBind {
                queue,
                exchange,
                routing_key,
                options: QueueBindOptions::default(),
                arguments,
            },
            Self::Qos {
                prefetch_count,
                options,
            } => Method::BasicQos {
                prefetch_count,
                options,
            },
            Self::Consumer {
                queue,
                tag,
                options,
                arguments,
            } => Method::BasicConsume {
                queue,
                consumer_tag: tag,
                options: BasicConsumeOptions {
                    nowait: false,
                    ..options
                },
                arguments,
            },
        }
    }
}
