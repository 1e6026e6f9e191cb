//! AMQP 发布者 (topic exchange)

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use shared::message::EventEnvelope;

use super::{EventError, EventPublisher};

/// 持久化投递
const DELIVERY_MODE_PERSISTENT: u8 = 2;

pub struct AmqpPublisher {
    // 保持连接存活
    _connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpPublisher {
    /// 连接 broker 并声明 durable topic exchange；启动时失败即退出
    pub async fn connect(addr: &str, exchange: &str) -> Result<Self, EventError> {
        let connection = Connection::connect(addr, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        tracing::info!(exchange = %exchange, "AMQP publisher connected");
        Ok(Self {
            _connection: connection,
            channel,
            exchange: exchange.to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for AmqpPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        let body = envelope.to_json_bytes()?;
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_message_id(envelope.event_id.to_string().into())
            .with_delivery_mode(DELIVERY_MODE_PERSISTENT);
        self.channel
            .basic_publish(
                &self.exchange,
                envelope.routing_key(),
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}
