use crate::{
    channel_allocator::ChannelAllocator,
    channel_recovery_context::ChannelRecoveryContext,
    channel_status::{ChannelState, ChannelStatus},
    configuration::Configuration,
    confirmations::Confirmations,
    consumer::Consumer,
    consumers::Consumers,
    dispatcher::{Dispatcher, DispatcherKind},
    error_holder::ErrorHolder,
    exchange::ExchangeKind,
    frame::{content_frames, Frame, Method},
    message::Delivery,
    name_generator::{NameGenerator, CONSUMER_TAG_PREFIX, QUEUE_NAME_PREFIX},
    options::*,
    promise::PromiseResolver,
    publisher_confirm::{Confirmation, PublisherConfirm},
    queue::Queue,
    recovery_config::RecoveryConfig,
    replay_log::ReplayLog,
    replies::ExpectedReplies,
    topology::{ChannelDefinition, Declaration},
    transport::FrameWriter,
    types::{
        ChannelId, DeliveryTag, FieldTable, Identifier, MessageCount, PayloadSize, ReplyCode,
        ShortString,
    },
    BasicProperties, Error, ErrorKind, Promise, ProtocolError, Result,
};
use executor_trait::FullExecutor;
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use std::{fmt, future::Future, sync::Arc};
use tracing::{debug, error, info, trace, warn};

/// Main entry point for most AMQP operations.
///
/// It serves as a lightweight connection and can be obtained from a
/// [`Connection`](crate::Connection) by calling
/// [`Connection::create_channel`](crate::Connection::create_channel).
///
/// Every operation is queued on the channel and runs in order, after the
/// ones queued before it; the returned [`Promise`] tells its outcome. While
/// the channel is recovering from a connection loss, operations are held
/// back until the replay of its declarations is over.
///
/// See also the RabbitMQ documentation on [channels](https://www.rabbitmq.com/channels.html).
#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    configuration: Configuration,
    status: ChannelStatus,
    allocator: ChannelAllocator,
    writer: FrameWriter,
    replies: ExpectedReplies,
    dispatcher: Dispatcher,
    recovery_dispatcher: Dispatcher,
    confirmations: Confirmations,
    consumers: Consumers,
    replay_log: ReplayLog,
    recovery_config: RecoveryConfig,
    recovery: Arc<Mutex<Option<ChannelRecoveryContext>>>,
    name_generator: Arc<dyn NameGenerator>,
    // Reply epoch of the unit this handle runs, see `for_unit`
    epoch: u64,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("confirmations", &self.confirmations)
            .field("replies", &self.replies)
            .field("dispatcher", &self.dispatcher)
            .field("recovery_dispatcher", &self.recovery_dispatcher)
            .field("consumers", &self.consumers)
            .finish()
    }
}

impl Channel {
    pub(crate) fn new(
        id: ChannelId,
        configuration: Configuration,
        allocator: ChannelAllocator,
        writer: FrameWriter,
        executor: &Arc<dyn FullExecutor + Send + Sync>,
        recovery_config: RecoveryConfig,
        name_generator: Arc<dyn NameGenerator>,
    ) -> Self {
        Self {
            id,
            configuration,
            status: ChannelStatus::default(),
            allocator,
            writer,
            replies: ExpectedReplies::default(),
            dispatcher: Dispatcher::new(id, DispatcherKind::Commands, executor),
            recovery_dispatcher: Dispatcher::new(id, DispatcherKind::Recovery, executor),
            confirmations: Confirmations::new(id),
            consumers: Consumers::default(),
            replay_log: ReplayLog::default(),
            recovery_config,
            recovery: Arc::default(),
            name_generator,
            epoch: 0,
        }
    }

    /// The handle a unit works with, bound to the reply epoch it started in:
    /// once the connection is lost, its requests get refused.
    fn for_unit(&self) -> Self {
        let mut channel = self.clone();
        channel.epoch = self.replies.epoch();
        channel
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn status(&self) -> &ChannelStatus {
        &self.status
    }

    /// What recovery would replay for this channel.
    pub fn definition(&self) -> ChannelDefinition {
        ChannelDefinition {
            id: self.id,
            confirm: self.status.confirm(),
            declarations: self.replay_log.snapshot(),
        }
    }

    pub fn open(&self) -> Promise<()> {
        self.open_then(|_| ())
    }

    pub(crate) fn open_then<T, F>(&self, on_open: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce(&Channel) -> T + Send + 'static,
    {
        let promise = match self
            .status
            .transition(&[ChannelState::Initial], ChannelState::Opening)
        {
            Ok(()) => {
                let channel = self.clone();
                self.dispatcher.enqueue(move || async move {
                    let channel = channel.for_unit();
                    if let Err(error) = channel.call(Method::ChannelOpen).await {
                        warn!(channel = channel.id, %error, "failed to open channel");
                        channel.finalize_close(Some(error.clone()));
                        return Err(error);
                    }
                    channel
                        .status
                        .transition(&[ChannelState::Opening], ChannelState::Connected)
                        .map_err(ErrorKind::InvalidChannelState)?;
                    debug!(channel = channel.id, "channel opened");
                    Ok(on_open(&channel))
                })
            }
            Err(state) => Promise::new_with_data(Err(ErrorKind::InvalidChannelState(state).into())),
        };
        promise.set_marker(format!("Channel {}: channel.open", self.id));
        promise
    }

    /// Close the channel once everything queued so far has run.
    ///
    /// Closing a channel that is already closed or closing does nothing. A
    /// channel that is not open on the broker side (never opened, or waiting
    /// for recovery) gets closed locally.
    pub fn close(&self, reply_code: ReplyCode, reply_text: &str) -> Promise<()> {
        let open = [ChannelState::Opening, ChannelState::Connected];
        if self.status.transition(&open, ChannelState::Closing).is_ok() {
            let channel = self.clone();
            let method = Method::ChannelClose {
                reply_code,
                reply_text: reply_text.into(),
                class_id: 0,
                method_id: 0,
            };
            let promise = self.dispatcher.enqueue(move || async move {
                let channel = channel.for_unit();
                let res = channel.call(method).await;
                channel.finalize_close(None);
                res.map(|_| ())
            });
            promise.set_marker(format!("Channel {}: channel.close", self.id));
            return promise;
        }

        let local = [ChannelState::Initial, ChannelState::Recovering];
        if self.status.transition(&local, ChannelState::Closing).is_ok() {
            debug!(channel = self.id, "closing channel locally");
            self.finalize_close(None);
        }
        Promise::new_with_data(Ok(()))
    }

    pub fn exchange_declare(
        &self,
        exchange: ShortString,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Promise<()> {
        self.enqueue("exchange.declare", move |channel| async move {
            channel
                .call(Method::ExchangeDeclare {
                    exchange: exchange.clone(),
                    kind: kind.clone(),
                    options,
                    arguments: arguments.clone(),
                })
                .await?;
            if !options.passive {
                channel.replay_log.record(Declaration::Exchange {
                    name: exchange,
                    kind,
                    options,
                    arguments,
                });
            }
            Ok(())
        })
    }

    pub fn exchange_delete(
        &self,
        exchange: ShortString,
        options: ExchangeDeleteOptions,
    ) -> Promise<()> {
        self.enqueue("exchange.delete", move |channel| async move {
            channel
                .call(Method::ExchangeDelete {
                    exchange: exchange.clone(),
                    options,
                })
                .await?;
            channel.replay_log.forget_exchange(exchange.as_str());
            Ok(())
        })
    }

    pub fn exchange_bind(
        &self,
        destination: ShortString,
        source: ShortString,
        routing_key: ShortString,
        options: ExchangeBindOptions,
        arguments: FieldTable,
    ) -> Promise<()> {
        self.enqueue("exchange.bind", move |channel| async move {
            channel
                .call(Method::ExchangeBind {
                    destination: destination.clone(),
                    source: source.clone(),
                    routing_key: routing_key.clone(),
                    options,
                    arguments: arguments.clone(),
                })
                .await?;
            channel.replay_log.record(Declaration::ExchangeBinding {
                destination,
                source,
                routing_key,
                arguments,
            });
            Ok(())
        })
    }

    pub fn exchange_unbind(
        &self,
        destination: ShortString,
        source: ShortString,
        routing_key: ShortString,
        options: ExchangeUnbindOptions,
        arguments: FieldTable,
    ) -> Promise<()> {
        self.enqueue("exchange.unbind", move |channel| async move {
            channel
                .call(Method::ExchangeUnbind {
                    destination: destination.clone(),
                    source: source.clone(),
                    routing_key: routing_key.clone(),
                    options,
                    arguments,
                })
                .await?;
            channel.replay_log.forget_exchange_binding(
                destination.as_str(),
                source.as_str(),
                routing_key.as_str(),
            );
            Ok(())
        })
    }

    /// Declare a queue. An empty name gets replaced by a generated one, which
    /// is kept across recoveries.
    pub fn queue_declare(
        &self,
        queue: ShortString,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Promise<Queue> {
        let queue = if queue.as_str().is_empty() {
            self.name_generator.generate(QUEUE_NAME_PREFIX)
        } else {
            queue
        };
        self.enqueue("queue.declare", move |channel| async move {
            let reply = channel
                .call(Method::QueueDeclare {
                    queue: queue.clone(),
                    options,
                    arguments: arguments.clone(),
                })
                .await?;
            let declared = match reply {
                Some(Method::QueueDeclareOk {
                    queue,
                    message_count,
                    consumer_count,
                }) => Queue::new(queue, message_count, consumer_count),
                _ => Queue::new(queue, 0, 0),
            };
            if !options.passive {
                channel.replay_log.record(Declaration::Queue {
                    name: declared.name().clone(),
                    options,
                    arguments,
                });
            }
            Ok(declared)
        })
    }

    pub fn queue_bind(
        &self,
        queue: ShortString,
        exchange: ShortString,
        routing_key: ShortString,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Promise<()> {
        self.enqueue("queue.bind", move |channel| async move {
            channel
                .call(Method::QueueBind {
                    queue: queue.clone(),
                    exchange: exchange.clone(),
                    routing_key: routing_key.clone(),
                    options,
                    arguments: arguments.clone(),
                })
                .await?;
            channel.replay_log.record(Declaration::QueueBinding {
                queue,
                exchange,
                routing_key,
                arguments,
            });
            Ok(())
        })
    }

    pub fn queue_unbind(
        &self,
        queue: ShortString,
        exchange: ShortString,
        routing_key: ShortString,
        arguments: FieldTable,
    ) -> Promise<()> {
        self.enqueue("queue.unbind", move |channel| async move {
            channel
                .call(Method::QueueUnbind {
                    queue: queue.clone(),
                    exchange: exchange.clone(),
                    routing_key: routing_key.clone(),
                    arguments,
                })
                .await?;
            channel.replay_log.forget_queue_binding(
                queue.as_str(),
                exchange.as_str(),
                routing_key.as_str(),
            );
            Ok(())
        })
    }

    /// Returns the number of messages that were purged.
    pub fn queue_purge(
        &self,
        queue: ShortString,
        options: QueuePurgeOptions,
    ) -> Promise<MessageCount> {
        self.enqueue("queue.purge", move |channel| async move {
            match channel.call(Method::QueuePurge { queue, options }).await? {
                Some(Method::QueuePurgeOk { message_count }) => Ok(message_count),
                _ => Ok(0),
            }
        })
    }

    /// Delete a queue, ending the consumers reading from it.
    pub fn queue_delete(
        &self,
        queue: ShortString,
        options: QueueDeleteOptions,
    ) -> Promise<MessageCount> {
        self.enqueue("queue.delete", move |channel| async move {
            let reply = channel
                .call(Method::QueueDelete {
                    queue: queue.clone(),
                    options,
                })
                .await?;
            channel.replay_log.forget_queue(queue.as_str());
            for consumer_tag in channel.consumers.deregister_queue(queue.as_str()) {
                debug!(
                    channel = channel.id,
                    queue = %queue.as_str(),
                    consumer_tag = %consumer_tag.as_str(),
                    "consumer ended with its queue",
                );
            }
            match reply {
                Some(Method::QueueDeleteOk { message_count }) => Ok(message_count),
                _ => Ok(0),
            }
        })
    }

    pub fn basic_qos(&self, prefetch_count: u16, options: BasicQosOptions) -> Promise<()> {
        self.enqueue("basic.qos", move |channel| async move {
            channel
                .call(Method::BasicQos {
                    prefetch_count,
                    options,
                })
                .await?;
            channel.replay_log.record(Declaration::Qos {
                prefetch_count,
                options,
            });
            Ok(())
        })
    }

    /// Start consuming from `queue`. An empty tag gets replaced by a generated
    /// one.
    ///
    /// The consumer is registered before the request goes out, so no delivery
    /// racing the broker's answer gets lost.
    pub fn basic_consume(
        &self,
        queue: ShortString,
        consumer_tag: ShortString,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Promise<Consumer> {
        let consumer_tag = if consumer_tag.as_str().is_empty() {
            self.name_generator.generate(CONSUMER_TAG_PREFIX)
        } else {
            consumer_tag
        };
        self.enqueue("basic.consume", move |channel| async move {
            let (consumer, sink) = Consumer::new(consumer_tag.clone(), queue.clone());
            channel.consumers.register(consumer_tag.clone(), sink);
            let method = Method::BasicConsume {
                queue: queue.clone(),
                consumer_tag: consumer_tag.clone(),
                options,
                arguments: arguments.clone(),
            };
            if let Err(error) = channel.call(method).await {
                channel.consumers.deregister(&consumer_tag);
                return Err(error);
            }
            channel.replay_log.record(Declaration::Consumer {
                queue,
                tag: consumer_tag,
                options,
                arguments,
            });
            Ok(consumer)
        })
    }

    pub fn basic_cancel(
        &self,
        consumer_tag: ShortString,
        options: BasicCancelOptions,
    ) -> Promise<()> {
        self.enqueue("basic.cancel", move |channel| async move {
            channel
                .call(Method::BasicCancel {
                    consumer_tag: consumer_tag.clone(),
                    options,
                })
                .await?;
            channel.replay_log.forget_consumer(consumer_tag.as_str());
            channel.consumers.deregister(&consumer_tag);
            Ok(())
        })
    }

    /// Publish a message.
    ///
    /// The delivery tag is assigned when the message is actually written, so
    /// tags follow the order of the frames on the wire. Outside of confirm
    /// mode the returned handle resolves with [`Confirmation::NotRequested`]
    /// once the message is written.
    pub fn basic_publish(
        &self,
        exchange: ShortString,
        routing_key: ShortString,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> PublisherConfirm {
        let (promise, resolver) = Promise::new();
        promise.set_marker(format!("Channel {}: basic.publish", self.id));
        if let Err(state) = self.status.ensure_usable() {
            resolver.reject(ErrorKind::InvalidChannelState(state).into());
            return PublisherConfirm::new(promise);
        }

        let frames = content_frames(
            Method::BasicPublish {
                exchange,
                routing_key,
                options,
            },
            payload,
            properties,
            self.configuration.max_content_body_size(),
        );
        let channel = self.clone();
        let canceler = resolver.clone();
        self.dispatcher.push(
            move || -> BoxFuture<'static, ()> {
                channel.write_content(frames, resolver);
                Box::pin(std::future::ready(()))
            },
            move |error| canceler.reject(error),
        );
        PublisherConfirm::new(promise)
    }

    pub fn basic_ack(&self, delivery_tag: DeliveryTag, options: BasicAckOptions) -> Promise<()> {
        self.enqueue("basic.ack", move |channel| async move {
            channel
                .call(Method::BasicAck {
                    delivery_tag,
                    multiple: options.multiple,
                })
                .await
                .map(|_| ())
        })
    }

    pub fn basic_nack(&self, delivery_tag: DeliveryTag, options: BasicNackOptions) -> Promise<()> {
        self.enqueue("basic.nack", move |channel| async move {
            channel
                .call(Method::BasicNack {
                    delivery_tag,
                    multiple: options.multiple,
                    requeue: options.requeue,
                })
                .await
                .map(|_| ())
        })
    }

    pub fn basic_reject(
        &self,
        delivery_tag: DeliveryTag,
        options: BasicRejectOptions,
    ) -> Promise<()> {
        self.enqueue("basic.reject", move |channel| async move {
            channel
                .call(Method::BasicReject {
                    delivery_tag,
                    requeue: options.requeue,
                })
                .await
                .map(|_| ())
        })
    }

    /// Turn publisher confirms on. Delivery tags start over at 1.
    pub fn confirm_select(&self, options: ConfirmSelectOptions) -> Promise<()> {
        self.enqueue("confirm.select", move |channel| async move {
            channel.confirmations.enable()?;
            if let Err(error) = channel.call(Method::ConfirmSelect { options }).await {
                channel.confirmations.reset();
                return Err(error);
            }
            channel.status.set_confirm();
            Ok(())
        })
    }

    /// Resolves once every message published so far got its confirmation,
    /// or failed.
    pub fn wait_for_confirms(&self) -> Promise<()> {
        let (promise, resolver) = Promise::new();
        promise.set_marker(format!("Channel {}: wait_for_confirms", self.id));
        if let Err(state) = self.status.ensure_usable() {
            resolver.reject(ErrorKind::InvalidChannelState(state).into());
            return promise;
        }
        let confirmations = self.confirmations.clone();
        let canceler = resolver.clone();
        self.dispatcher.push(
            move || -> BoxFuture<'static, ()> {
                confirmations.notify_when_idle(resolver);
                Box::pin(std::future::ready(()))
            },
            move |error| canceler.reject(error),
        );
        promise
    }

    pub(crate) fn handle_frame(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Method(method) => self.handle_method(*method),
            Frame::Header {
                class_id,
                body_size,
                properties,
            } => self.handle_content_header(class_id, body_size, properties),
            Frame::Body(payload) => self.handle_body(payload),
        }
    }

    /// The connection went away.
    pub(crate) fn connection_lost(&self, cause: Error) {
        let error = Error::connection_lost();
        match self.status.state() {
            ChannelState::Closed => return,
            ChannelState::Connected | ChannelState::Recovering => {}
            state => {
                debug!(channel = self.id, ?state, %cause, "connection lost before the channel was usable");
                self.finalize_close(Some(error));
                return;
            }
        }

        // Nothing queued may run before the replay.
        self.dispatcher.suspend();
        self.dispatcher.fail_pending(error.clone());
        self.recovery_dispatcher.fail_pending(error.clone());
        self.replies.reset(error.clone());
        self.confirmations.fail_all_outstanding(error.clone());
        self.confirmations.reset();
        self.consumers.drop_partial_delivery();
        self.status.reset_receiver_state();

        let attempt = {
            let mut recovery = self.recovery.lock();
            match recovery.as_mut() {
                Some(context) => context.retry(cause.clone()),
                None => *recovery = Some(ChannelRecoveryContext::new(cause.clone())),
            }
            recovery
                .as_ref()
                .map_or(1, ChannelRecoveryContext::attempts)
        };

        if !self.recovery_config.auto_recover_channels {
            warn!(channel = self.id, %cause, "connection lost, closing channel");
            self.finalize_close(Some(error));
        } else if !self.recovery_config.allows(attempt) {
            error!(channel = self.id, %cause, attempt, "giving up on channel recovery");
            self.finalize_close(Some(ErrorKind::RecoveryAbandoned(self.id).into()));
        } else {
            info!(channel = self.id, %cause, attempt, "connection lost, channel will be recovered");
            self.status.set_state(ChannelState::Recovering);
        }
    }

    /// Replay the channel on a fresh connection, then let the queued
    /// operations run.
    ///
    /// The replay is queued right away, the returned future tells how it went.
    pub(crate) fn recover(&self) -> BoxFuture<'static, Result<()>> {
        if !self.status.recovering() {
            let error: Error = ErrorKind::InvalidChannelState(self.status.state()).into();
            return Box::pin(std::future::ready(Err(error)));
        }
        if let Some(context) = self.recovery.lock().as_ref() {
            debug!(
                channel = self.id,
                cause = %context.cause(),
                attempt = context.attempts(),
                "replaying channel",
            );
        }

        let holder = ErrorHolder::default();
        self.replay(&holder, Method::ChannelOpen);
        for declaration in self.replay_log.snapshot() {
            self.replay(&holder, declaration.to_method());
        }
        if self.status.confirm() {
            let channel = self.clone();
            let errors = holder.clone();
            self.replay_step(&holder, move || async move {
                errors.check()?;
                let channel = channel.for_unit();
                channel.confirmations.enable()?;
                channel
                    .call(Method::ConfirmSelect {
                        options: ConfirmSelectOptions::default(),
                    })
                    .await
                    .map(|_| ())
            });
        }

        let channel = self.clone();
        Box::pin(
            self.recovery_dispatcher
                .enqueue_and_await(move || async move { channel.finish_recovery(holder) }),
        )
    }

    fn replay(&self, holder: &ErrorHolder, method: Method) {
        let channel = self.clone();
        let errors = holder.clone();
        self.replay_step(holder, move || async move {
            errors.check()?;
            trace!(channel = channel.id, method = method.name(), "replaying");
            channel.for_unit().call(method).await.map(|_| ())
        });
    }

    fn replay_step<F, Fut>(&self, holder: &ErrorHolder, step: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let on_failure = holder.clone();
        let on_cancel = holder.clone();
        self.recovery_dispatcher.push(
            move || -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    if let Err(error) = step().await {
                        on_failure.set(error);
                    }
                })
            },
            move |error| on_cancel.set(error),
        );
    }

    fn finish_recovery(&self, holder: ErrorHolder) -> Result<()> {
        match holder.check() {
            Ok(()) => {
                self.status
                    .transition(&[ChannelState::Recovering], ChannelState::Connected)
                    .map_err(ErrorKind::InvalidChannelState)?;
                self.recovery.lock().take();
                info!(channel = self.id, "channel recovered");
                self.dispatcher.resume();
                Ok(())
            }
            Err(error) if error.is_connection_lost() => {
                debug!(channel = self.id, "replay interrupted by a connection loss");
                Err(error)
            }
            Err(error) => {
                error!(channel = self.id, %error, "channel replay failed, abandoning recovery");
                let reason: Error = ErrorKind::RecoveryAbandoned(self.id).into();
                self.finalize_close(Some(reason.clone()));
                Err(reason)
            }
        }
    }

    /// Move to the final state, exactly once whatever the path that got us
    /// here. `None` means we closed it on request.
    fn finalize_close(&self, reason: Option<Error>) {
        if !self.status.set_closed(reason.clone()) {
            return;
        }
        let error = reason
            .clone()
            .unwrap_or_else(|| ErrorKind::InvalidChannelState(ChannelState::Closed).into());
        debug!(channel = self.id, %error, "channel closed");
        self.replies.cancel(error.clone());
        if let Err(err) = self.allocator.release(self.id) {
            error!(channel = self.id, error = %err, "failed to release channel number");
        }
        self.confirmations.fail_all_outstanding(error.clone());
        self.confirmations.reset();
        match reason {
            None => self.consumers.cancel(),
            Some(reason) => self.consumers.error(reason),
        }
        self.recovery.lock().take();
        self.dispatcher.close(error.clone());
        self.recovery_dispatcher.close(error);
    }

    /// Send a method and wait for the broker's answer if there is one.
    async fn call(&self, method: Method) -> Result<Option<Method>> {
        let reply = self.replies.expect(self.epoch, method.expected_reply())?;
        trace!(channel = self.id, method = method.name(), "sending method");
        if let Err(error) = self.writer.write(self.id, Frame::method(method)) {
            self.replies.cancel(error.clone());
            return Err(error);
        }
        match reply {
            Some(reply) => reply.await.map(Some),
            None => Ok(None),
        }
    }

    fn write_content(
        &self,
        frames: Vec<Frame>,
        resolver: PromiseResolver<Confirmation>,
    ) {
        if !self.confirmations.enabled() {
            match self.writer.write_all(self.id, frames) {
                Ok(()) => resolver.resolve(Confirmation::NotRequested),
                Err(error) => resolver.reject(error),
            }
            return;
        }
        let tag = self.confirmations.track(resolver.clone());
        if let Err(error) = self.writer.write_all(self.id, frames) {
            match tag {
                Some(tag) => self.confirmations.fail(tag, error),
                None => resolver.reject(error),
            }
        }
    }

    fn enqueue<T, F, Fut>(&self, name: &'static str, task: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce(Channel) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let promise = match self.status.ensure_usable() {
            Ok(()) => {
                let channel = self.clone();
                self.dispatcher.enqueue(move || task(channel.for_unit()))
            }
            Err(state) => Promise::new_with_data(Err(ErrorKind::InvalidChannelState(state).into())),
        };
        promise.set_marker(format!("Channel {}: {}", self.id, name));
        promise
    }

    fn handle_method(&self, method: Method) -> Result<()> {
        match method {
            Method::BasicAck {
                delivery_tag,
                multiple,
            } => self
                .confirmations
                .resolve_ack(delivery_tag, multiple)
                .map_err(|error| {
                    warn!(channel = self.id, %error, "invalid basic.ack");
                    error
                }),
            Method::BasicNack {
                delivery_tag,
                multiple,
                ..
            } => self
                .confirmations
                .resolve_nack(delivery_tag, multiple)
                .map_err(|error| {
                    warn!(channel = self.id, %error, "invalid basic.nack");
                    error
                }),
            Method::BasicDeliver {
                consumer_tag,
                delivery_tag,
                redelivered,
                exchange,
                routing_key,
            } => {
                self.status.set_will_receive(consumer_tag.clone());
                self.consumers.start_delivery(Delivery::new(
                    delivery_tag,
                    consumer_tag,
                    exchange,
                    routing_key,
                    redelivered,
                ));
                Ok(())
            }
            Method::ChannelClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => self.on_channel_close_received(ProtocolError::new(
                reply_code, reply_text, class_id, method_id,
            )),
            Method::BasicCancel {
                consumer_tag,
                options,
            } => self.on_basic_cancel_received(consumer_tag, options),
            Method::ChannelFlow { active } => {
                debug!(channel = self.id, active, "channel flow");
                self.status.set_send_flow(active);
                self.writer
                    .write(self.id, Frame::method(Method::ChannelFlowOk { active }))
            }
            method => match method.reply_kind() {
                Some(kind) => self.replies.resolve(self.id, kind, method),
                None => {
                    warn!(channel = self.id, method = method.name(), "unexpected method");
                    Err(ErrorKind::UnexpectedReply(self.id, method.name()).into())
                }
            },
        }
    }

    fn handle_content_header(
        &self,
        class_id: Identifier,
        body_size: PayloadSize,
        properties: BasicProperties,
    ) -> Result<()> {
        let (_, complete) = self
            .status
            .set_content_length(self.id, class_id, body_size)?;
        self.consumers.set_delivery_properties(properties);
        if complete {
            self.consumers.complete_delivery();
        }
        Ok(())
    }

    fn handle_body(&self, payload: Vec<u8>) -> Result<()> {
        let (_, complete) = self
            .status
            .receive(self.id, payload.len() as PayloadSize)?;
        self.consumers.receive_delivery_content(payload);
        if complete {
            self.consumers.complete_delivery();
        }
        Ok(())
    }

    fn on_channel_close_received(&self, error: ProtocolError) -> Result<()> {
        warn!(channel = self.id, %error, "channel closed by the broker");
        let res = self
            .writer
            .write(self.id, Frame::method(Method::ChannelCloseOk));
        self.replies
            .cancel(ErrorKind::HandshakeFailed(error.clone()).into());
        let reason = if self.status.recovering() {
            ErrorKind::RecoveryAbandoned(self.id)
        } else {
            ErrorKind::ProtocolError(error)
        };
        self.finalize_close(Some(reason.into()));
        res
    }

    fn on_basic_cancel_received(
        &self,
        consumer_tag: ShortString,
        options: BasicCancelOptions,
    ) -> Result<()> {
        debug!(channel = self.id, consumer_tag = %consumer_tag.as_str(), "consumer canceled by the broker");
        self.replay_log.forget_consumer(consumer_tag.as_str());
        self.consumers.deregister(&consumer_tag);
        if options.nowait {
            return Ok(());
        }
        self.writer
            .write(self.id, Frame::method(Method::BasicCancelOk { consumer_tag }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error_handler::ErrorHandler, name_generator::DefaultNameGenerator, transport::Transport,
    };
    use async_global_executor_trait::AsyncGlobalExecutor;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(ChannelId, Frame)>>);

    impl Transport for Recorder {
        fn write_frame(&self, channel_id: ChannelId, frame: Frame) -> Result<()> {
            self.0.lock().push((channel_id, frame));
            Ok(())
        }
    }

    impl Recorder {
        fn wait_for(&self, count: usize) {
            while self.0.lock().len() < count {
                std::thread::yield_now();
            }
        }
    }

    fn channel(recorder: Arc<Recorder>) -> Channel {
        channel_with(recorder, RecoveryConfig::default())
    }

    fn channel_with(recorder: Arc<Recorder>, recovery_config: RecoveryConfig) -> Channel {
        let executor: Arc<dyn FullExecutor + Send + Sync> = Arc::new(AsyncGlobalExecutor);
        let allocator = ChannelAllocator::new(8);
        let id = allocator.allocate().unwrap();
        Channel::new(
            id,
            Configuration::new(8, 4096),
            allocator,
            FrameWriter::new(recorder, ErrorHandler::default()),
            &executor,
            recovery_config,
            Arc::new(DefaultNameGenerator::new()),
        )
    }

    #[test]
    fn operations_need_an_open_channel() {
        let recorder = Arc::new(Recorder::default());
        let channel = channel(recorder.clone());
        assert_eq!(
            channel.basic_qos(10, BasicQosOptions::default()).wait(),
            Err(ErrorKind::InvalidChannelState(ChannelState::Initial).into())
        );
        assert_eq!(
            channel
                .basic_publish(
                    "".into(),
                    "q".into(),
                    BasicPublishOptions::default(),
                    b"hello",
                    BasicProperties::default(),
                )
                .wait(),
            Err(ErrorKind::InvalidChannelState(ChannelState::Initial).into())
        );
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn closing_an_unopened_channel_releases_its_number() {
        let channel = channel(Arc::new(Recorder::default()));
        assert!(channel.allocator.is_allocated(channel.id()));
        assert_eq!(channel.close(200, "OK").wait(), Ok(()));
        assert!(channel.status().closed());
        assert!(!channel.allocator.is_allocated(channel.id()));
        assert_eq!(channel.close(200, "OK").wait(), Ok(()));
        assert_eq!(channel.status().close_reason(), None);
    }

    #[test]
    fn open_waits_for_the_broker() {
        let recorder = Arc::new(Recorder::default());
        let channel = channel(recorder.clone());
        let opened = channel.open();
        recorder.wait_for(1);
        assert_eq!(
            recorder.0.lock()[0],
            (channel.id(), Frame::method(Method::ChannelOpen))
        );
        assert_eq!(channel.status().state(), ChannelState::Opening);
        channel
            .handle_frame(Frame::method(Method::ChannelOpenOk))
            .unwrap();
        assert_eq!(opened.wait(), Ok(()));
        assert!(channel.status().connected());
        assert_eq!(
            channel.open().wait(),
            Err(ErrorKind::InvalidChannelState(ChannelState::Connected).into())
        );
    }

    #[test]
    fn units_started_before_a_connection_loss_send_nothing() {
        let recorder = Arc::new(Recorder::default());
        let channel = channel_with(
            recorder.clone(),
            RecoveryConfig::default().auto_recover_channels(),
        );
        let opened = channel.open();
        recorder.wait_for(1);
        channel
            .handle_frame(Frame::method(Method::ChannelOpenOk))
            .unwrap();
        assert_eq!(opened.wait(), Ok(()));

        // Got its turn, but did not send anything yet
        let in_flight = channel.for_unit();
        channel.connection_lost(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into());
        assert!(channel.status().recovering());
        let sent = futures_lite::future::block_on(in_flight.call(Method::BasicQos {
            prefetch_count: 1,
            options: BasicQosOptions::default(),
        }));
        assert_eq!(sent.map(|_| ()), Err(Error::connection_lost()));
        assert_eq!(recorder.0.lock().len(), 1);
        assert!(channel.replies.is_empty());

        // The replayed channel.open gets its own answer
        let recovered = channel.recover();
        recorder.wait_for(2);
        assert_eq!(
            recorder.0.lock()[1],
            (channel.id(), Frame::method(Method::ChannelOpen))
        );
        channel
            .handle_frame(Frame::method(Method::ChannelOpenOk))
            .unwrap();
        assert_eq!(futures_lite::future::block_on(recovered), Ok(()));
        assert!(channel.status().connected());
    }
}
