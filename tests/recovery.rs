mod support;

use amqp_channels::{
    frame::Method,
    options::*,
    types::FieldTable,
    BasicProperties, ChannelState, Confirmation, ConnectionProperties, ConnectionState, Error,
    ErrorKind, ExchangeKind, RecoveryConfig,
};
use std::io;
use support::{deliver, FakeBroker, TIMEOUT};

fn connection_reset() -> Error {
    io::Error::from(io::ErrorKind::ConnectionReset).into()
}

fn recovering(config: RecoveryConfig) -> ConnectionProperties {
    ConnectionProperties::default().with_recovery_config(config.auto_recover_channels())
}

#[test]
fn topology_is_replayed_before_queued_operations() {
    let (broker, conn) = FakeBroker::start(recovering(RecoveryConfig::default()));
    let channel = conn.create_channel().wait().unwrap();
    channel
        .exchange_declare(
            "logs".into(),
            ExchangeKind::Direct,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .wait()
        .unwrap();
    let queue = channel
        .queue_declare("".into(), QueueDeclareOptions::default(), FieldTable::default())
        .wait()
        .unwrap();
    channel
        .queue_bind(
            queue.name().clone(),
            "logs".into(),
            "info".into(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .wait()
        .unwrap();
    channel
        .basic_qos(5, BasicQosOptions::default())
        .wait()
        .unwrap();
    let consumer = channel
        .basic_consume(
            queue.name().clone(),
            "worker".into(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .wait()
        .unwrap();
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .wait()
        .unwrap();
    broker.take_log();

    broker.set_down(true);
    conn.connection_lost(connection_reset());
    assert_eq!(conn.status().state(), ConnectionState::Recovering);
    assert_eq!(channel.status().state(), ChannelState::Recovering);

    // Queued while recovering, run once the replay is over
    let declared = channel.queue_declare(
        "later".into(),
        QueueDeclareOptions::default(),
        FieldTable::default(),
    );
    let confirm = channel.basic_publish(
        "".into(),
        "later".into(),
        BasicPublishOptions::default(),
        b"after recovery",
        BasicProperties::default(),
    );
    assert!(declared.try_wait().is_none());

    broker.set_down(false);
    assert_eq!(conn.reconnected(broker.link()).wait(), Ok(()));
    assert_eq!(declared.wait().unwrap().name().as_str(), "later");
    assert_eq!(confirm.wait(), Ok(Confirmation::Ack));
    assert!(channel.status().connected());

    assert_eq!(
        broker.method_names(channel.id()),
        vec![
            "channel.open",
            "exchange.declare",
            "queue.declare",
            "queue.bind",
            "basic.qos",
            "basic.consume",
            "confirm.select",
            "queue.declare",
            "basic.publish",
        ]
    );
    assert!(matches!(
        &broker.methods(channel.id())[2],
        Method::QueueDeclare { queue: replayed, .. } if replayed == queue.name()
    ));

    deliver(&conn, channel.id(), "worker", 1, &[b"again"]);
    let delivery = consumer.next_delivery_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(delivery.data, b"again");
}

#[test]
fn channels_recover_independently() {
    let (broker, conn) = FakeBroker::start(recovering(RecoveryConfig::default()));
    let stuck = conn.create_channel().wait().unwrap();
    let channel = conn.create_channel().wait().unwrap();

    conn.connection_lost(connection_reset());
    let queued = channel.queue_purge("jobs".into(), QueuePurgeOptions::default());
    broker.silence(stuck.id());
    let recovered = conn.reconnected(broker.link());

    assert_eq!(queued.wait_timeout(TIMEOUT), Ok(7));
    assert!(channel.status().connected());
    assert!(stuck.status().recovering());
    assert!(recovered.try_wait().is_none());
}

#[test]
fn channels_close_when_recovery_is_disabled() {
    let (broker, conn) = FakeBroker::start(ConnectionProperties::default());
    let channel = conn.create_channel().wait().unwrap();
    let consumer = channel
        .basic_consume(
            "jobs".into(),
            "worker".into(),
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .wait()
        .unwrap();

    conn.connection_lost(connection_reset());
    assert!(conn.status().closed());
    assert!(channel.status().closed());
    assert_eq!(
        channel.status().close_reason(),
        Some(ErrorKind::ConnectionLost.into())
    );
    assert_eq!(
        consumer.next_delivery_timeout(TIMEOUT),
        Some(Err(ErrorKind::ConnectionLost.into()))
    );
    assert_eq!(consumer.next_delivery_timeout(TIMEOUT), None);
    assert!(!conn.channel_allocator().is_allocated(channel.id()));
    assert_eq!(
        conn.reconnected(broker.link()).wait(),
        Err(ErrorKind::InvalidConnectionState(ConnectionState::Closed).into())
    );
}

#[test]
fn refused_replay_abandons_the_channel() {
    let (broker, conn) = FakeBroker::start(recovering(RecoveryConfig::default()));
    let channel = conn.create_channel().wait().unwrap();
    channel
        .exchange_declare(
            "logs".into(),
            ExchangeKind::Topic,
            ExchangeDeclareOptions::default(),
            FieldTable::default(),
        )
        .wait()
        .unwrap();
    channel
        .basic_qos(1, BasicQosOptions::default())
        .wait()
        .unwrap();

    conn.connection_lost(connection_reset());
    let queued = channel.basic_qos(2, BasicQosOptions::default());
    broker.refuse_next("exchange.declare");
    assert_eq!(
        conn.reconnected(broker.link()).wait(),
        Err(ErrorKind::RecoveryAbandoned(channel.id()).into())
    );
    assert!(channel.status().closed());
    assert_eq!(
        channel.status().close_reason(),
        Some(ErrorKind::RecoveryAbandoned(channel.id()).into())
    );
    assert_eq!(
        queued.wait(),
        Err(ErrorKind::RecoveryAbandoned(channel.id()).into())
    );
    assert!(!conn.channel_allocator().is_allocated(channel.id()));
    assert!(conn.status().connected());
}

#[test]
fn recovery_gives_up_after_max_attempts() {
    let (_broker, conn) =
        FakeBroker::start(recovering(RecoveryConfig::default().with_max_attempts(1)));
    let channel = conn.create_channel().wait().unwrap();

    conn.connection_lost(connection_reset());
    assert!(channel.status().recovering());
    conn.connection_lost(connection_reset());
    assert!(channel.status().closed());
    assert_eq!(
        channel.status().close_reason(),
        Some(ErrorKind::RecoveryAbandoned(channel.id()).into())
    );
}

#[test]
fn closing_a_recovering_channel_is_local() {
    let (broker, conn) = FakeBroker::start(recovering(RecoveryConfig::default()));
    let channel = conn.create_channel().wait().unwrap();
    broker.take_log();

    conn.connection_lost(connection_reset());
    assert_eq!(channel.close(200, "OK").wait(), Ok(()));
    assert!(channel.status().closed());
    assert_eq!(channel.status().close_reason(), None);
    assert_eq!(conn.reconnected(broker.link()).wait(), Ok(()));
    assert!(broker.method_names(channel.id()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recovery_on_tokio() {
    let executor =
        tokio_executor_trait::Tokio::default().with_handle(tokio::runtime::Handle::current());
    let properties = recovering(RecoveryConfig::default()).with_executor(executor);
    let (broker, conn) = FakeBroker::start(properties);

    let channel = conn.create_channel().await.unwrap();
    channel
        .queue_declare(
            "tokio".into(),
            QueueDeclareOptions::default(),
            FieldTable::default(),
        )
        .await
        .unwrap();

    conn.connection_lost(connection_reset());
    let purged = channel.queue_purge("tokio".into(), QueuePurgeOptions::default());
    conn.reconnected(broker.link()).await.unwrap();
    assert_eq!(purged.await, Ok(7));
    assert_eq!(
        broker.method_names(channel.id()),
        vec![
            "channel.open",
            "queue.declare",
            "channel.open",
            "queue.declare",
            "queue.purge",
        ]
    );
}
