#![allow(dead_code)]

//! An in-memory broker answering the requests of a `Connection` from its own
//! thread, the way a socket reader would.

use amqp_channels::{
    frame::{Frame, Method},
    types::ChannelId,
    BasicProperties, Connection, ConnectionProperties, Result, Transport,
};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use tracing::debug;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// How the broker answers publishes on channels in confirm mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Confirms {
    #[default]
    Ack,
    Nack,
    /// The test sends the acks itself
    Manual,
}

pub struct FakeBroker {
    inbox: flume::Sender<(ChannelId, Frame)>,
    state: Mutex<State>,
    down: AtomicBool,
}

#[derive(Default)]
struct State {
    log: Vec<(ChannelId, Frame)>,
    refuse: Option<&'static str>,
    confirms: Confirms,
    // Present for the channels in confirm mode
    publish_seq: HashMap<ChannelId, u64>,
    silent: HashSet<ChannelId>,
}

struct Link(Arc<FakeBroker>);

impl Transport for Link {
    fn write_frame(&self, channel_id: ChannelId, frame: Frame) -> Result<()> {
        if self.0.down.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        self.0.state.lock().log.push((channel_id, frame.clone()));
        let _ = self.0.inbox.send((channel_id, frame));
        Ok(())
    }
}

impl FakeBroker {
    pub fn start(properties: ConnectionProperties) -> (Arc<Self>, Connection) {
        let _ = tracing_subscriber::fmt::try_init();

        let (inbox, frames) = flume::unbounded();
        let broker = Arc::new(Self {
            inbox,
            state: Mutex::default(),
            down: AtomicBool::new(false),
        });
        let connection = Connection::new(broker.link(), properties).expect("connection");
        let worker = broker.clone();
        let conn = connection.clone();
        thread::spawn(move || {
            for (channel_id, frame) in frames.iter() {
                for reply in worker.answer(channel_id, frame) {
                    if let Err(error) = conn.handle_frame(channel_id, reply) {
                        debug!(channel = channel_id, %error, "reply rejected by the client");
                    }
                }
            }
        });
        (broker, connection)
    }

    /// A fresh transport to this broker, as after a reconnection.
    pub fn link(self: &Arc<Self>) -> Arc<dyn Transport> {
        Arc::new(Link(self.clone()))
    }

    /// Make every write fail until brought back up.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Answer the next request named `method` with a channel.close.
    pub fn refuse_next(&self, method: &'static str) {
        self.state.lock().refuse = Some(method);
    }

    /// Leave every request on `channel_id` unanswered.
    pub fn silence(&self, channel_id: ChannelId) {
        self.state.lock().silent.insert(channel_id);
    }

    pub fn set_confirms(&self, confirms: Confirms) {
        self.state.lock().confirms = confirms;
    }

    pub fn take_log(&self) -> Vec<(ChannelId, Frame)> {
        std::mem::take(&mut self.state.lock().log)
    }

    pub fn frames(&self, channel_id: ChannelId) -> Vec<Frame> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(id, _)| *id == channel_id)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn methods(&self, channel_id: ChannelId) -> Vec<Method> {
        self.frames(channel_id)
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Method(method) => Some(*method),
                _ => None,
            })
            .collect()
    }

    pub fn method_names(&self, channel_id: ChannelId) -> Vec<&'static str> {
        self.methods(channel_id).iter().map(Method::name).collect()
    }

    /// Wait until `count` requests named `method` were written on the channel.
    pub fn wait_for(&self, channel_id: ChannelId, method: &str, count: usize) {
        eventually(|| {
            self.method_names(channel_id)
                .iter()
                .filter(|name| **name == method)
                .count()
                >= count
        });
    }

    fn answer(&self, channel_id: ChannelId, frame: Frame) -> Vec<Frame> {
        let Frame::Method(method) = frame else {
            return Vec::new();
        };
        let mut state = self.state.lock();
        if state.silent.contains(&channel_id) {
            return Vec::new();
        }
        if state.refuse == Some(method.name()) {
            state.refuse = None;
            state.publish_seq.remove(&channel_id);
            return vec![Frame::method(Method::ChannelClose {
                reply_code: 404,
                reply_text: "NOT_FOUND".into(),
                class_id: 50,
                method_id: 10,
            })];
        }
        let confirms = state.confirms;
        let reply = match *method {
            Method::ChannelOpen => {
                state.publish_seq.remove(&channel_id);
                Some(Method::ChannelOpenOk)
            }
            Method::ChannelClose { .. } => {
                state.publish_seq.remove(&channel_id);
                Some(Method::ChannelCloseOk)
            }
            Method::ExchangeDeclare { options, .. } => {
                (!options.nowait).then_some(Method::ExchangeDeclareOk)
            }
            Method::ExchangeDelete { options, .. } => {
                (!options.nowait).then_some(Method::ExchangeDeleteOk)
            }
            Method::ExchangeBind { options, .. } => {
                (!options.nowait).then_some(Method::ExchangeBindOk)
            }
            Method::ExchangeUnbind { options, .. } => {
                (!options.nowait).then_some(Method::ExchangeUnbindOk)
            }
            Method::QueueDeclare { queue, options, .. } => {
                (!options.nowait).then_some(Method::QueueDeclareOk {
                    queue,
                    message_count: 0,
                    consumer_count: 0,
                })
            }
            Method::QueueBind { options, .. } => (!options.nowait).then_some(Method::QueueBindOk),
            Method::QueueUnbind { .. } => Some(Method::QueueUnbindOk),
            Method::QueuePurge { options, .. } => {
                (!options.nowait).then_some(Method::QueuePurgeOk { message_count: 7 })
            }
            Method::QueueDelete { options, .. } => {
                (!options.nowait).then_some(Method::QueueDeleteOk { message_count: 0 })
            }
            Method::BasicQos { .. } => Some(Method::BasicQosOk),
            Method::BasicConsume {
                consumer_tag,
                options,
                ..
            } => (!options.nowait).then_some(Method::BasicConsumeOk { consumer_tag }),
            Method::BasicCancel {
                consumer_tag,
                options,
            } => (!options.nowait).then_some(Method::BasicCancelOk { consumer_tag }),
            Method::ConfirmSelect { options } => {
                state.publish_seq.insert(channel_id, 0);
                (!options.nowait).then_some(Method::ConfirmSelectOk)
            }
            Method::BasicPublish { .. } => match state.publish_seq.get_mut(&channel_id) {
                Some(seq) => {
                    *seq += 1;
                    match confirms {
                        Confirms::Ack => Some(Method::BasicAck {
                            delivery_tag: *seq,
                            multiple: false,
                        }),
                        Confirms::Nack => Some(Method::BasicNack {
                            delivery_tag: *seq,
                            multiple: false,
                            requeue: false,
                        }),
                        Confirms::Manual => None,
                    }
                }
                None => None,
            },
            _ => None,
        };
        reply.map(Frame::method).into_iter().collect()
    }
}

/// Push a delivery to the client, its body split in `chunks`.
pub fn deliver(
    connection: &Connection,
    channel_id: ChannelId,
    consumer_tag: &str,
    delivery_tag: u64,
    chunks: &[&[u8]],
) {
    let body_size = chunks.iter().map(|chunk| chunk.len()).sum::<usize>();
    connection
        .handle_frame(
            channel_id,
            Frame::method(Method::BasicDeliver {
                consumer_tag: consumer_tag.into(),
                delivery_tag,
                redelivered: false,
                exchange: "".into(),
                routing_key: "rk".into(),
            }),
        )
        .unwrap();
    connection
        .handle_frame(
            channel_id,
            Frame::Header {
                class_id: 60,
                body_size: body_size as u64,
                properties: BasicProperties::default(),
            },
        )
        .unwrap();
    for chunk in chunks {
        connection
            .handle_frame(channel_id, Frame::Body(chunk.to_vec()))
            .unwrap();
    }
}

/// Poll `condition` until it holds, failing the test after `TIMEOUT`.
pub fn eventually<F: FnMut() -> bool>(mut condition: F) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() < TIMEOUT, "condition not met in time");
        thread::sleep(Duration::from_millis(1));
    }
}
