//! RabbitMQ connection and the consume loop.

use crate::dispatch::{Dispatcher, Inbound};
use crate::error::{ControlPlaneError, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties};
use proxyfleet_config::{BrokerSettings, ExchangeKind};
use proxyfleet_container::WorkerRuntime;
use proxyfleet_core::{Disconnect, FleetController, ShutdownToken};
use tracing::{debug, info, warn};

const CONSUMER_TAG: &str = "proxyfleet";
const REPLY_SUCCESS: u16 = 200;

fn amqp_uri(settings: &BrokerSettings) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: settings.credentials.username.clone(),
                password: settings.credentials.password.clone(),
            },
            host: settings.host.clone(),
            port: settings.port,
        },
        vhost: settings.vhost.clone(),
        ..Default::default()
    }
}

/// lapin を既存の tokio ランタイム上で動かす
fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

fn exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

/// An open broker connection with one channel.
pub struct ControlPlane {
    connection: Connection,
    channel: Channel,
    settings: BrokerSettings,
    closed: bool,
}

impl ControlPlane {
    /// Connects with up to `connection_attempts` tries, `retry_delay` apart.
    ///
    /// A shutdown request aborts both the attempt in flight and the wait
    /// between attempts.
    pub async fn connect(settings: &BrokerSettings, shutdown: &mut ShutdownToken) -> Result<Self> {
        let url = settings.display_url();
        let attempts = settings.connection_attempts.max(1);

        let mut attempt = 1;
        let connection = loop {
            debug!(url = %url, attempt, "Connecting to RabbitMQ");
            let connect = Connection::connect_uri(amqp_uri(settings), connection_properties());

            let result = tokio::select! {
                _ = shutdown.requested() => return Err(ControlPlaneError::Interrupted),
                result = connect => result,
            };

            match result {
                Ok(connection) => break connection,
                Err(source) if attempt >= attempts => {
                    return Err(ControlPlaneError::ConnectionFailed {
                        url,
                        attempts,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        "Connection to {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        url, attempt, attempts, e, settings.retry_delay
                    );
                    tokio::select! {
                        _ = shutdown.requested() => return Err(ControlPlaneError::Interrupted),
                        _ = tokio::time::sleep(settings.retry_delay) => {}
                    }
                    attempt += 1;
                }
            }
        };

        let channel = connection
            .create_channel()
            .await
            .map_err(|source| ControlPlaneError::Setup {
                operation: "channel open",
                name: url.clone(),
                source,
            })?;

        info!(url = %url, "Connected to RabbitMQ");
        Ok(Self {
            connection,
            channel,
            settings: settings.clone(),
            closed: false,
        })
    }

    /// Declares the durable exchange, the queue and the binding between them.
    ///
    /// With an empty exchange name only the queue is declared; it is then
    /// reachable through the default exchange by its own name.
    pub async fn declare(&self) -> Result<()> {
        let settings = &self.settings;

        if !settings.exchange.is_empty() {
            self.channel
                .exchange_declare(
                    &settings.exchange,
                    exchange_kind(settings.exchange_kind),
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|source| ControlPlaneError::Setup {
                    operation: "exchange declare",
                    name: settings.exchange.clone(),
                    source,
                })?;
        }

        self.channel
            .queue_declare(
                &settings.queue,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| ControlPlaneError::Setup {
                operation: "queue declare",
                name: settings.queue.clone(),
                source,
            })?;

        if !settings.exchange.is_empty() {
            self.channel
                .queue_bind(
                    &settings.queue,
                    &settings.exchange,
                    "",
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|source| ControlPlaneError::Setup {
                    operation: "queue bind",
                    name: format!("{} -> {}", settings.exchange, settings.queue),
                    source,
                })?;
        }

        info!(
            exchange = %settings.exchange,
            kind = %settings.exchange_kind,
            queue = %settings.queue,
            "Control plane declared"
        );
        Ok(())
    }

    /// Consumes restart commands until shutdown is requested.
    ///
    /// Deliveries are handled one at a time; a delivery being dispatched is
    /// always finished before the shutdown request is observed. Returns an
    /// error if the consumer stream ends or fails.
    pub async fn listen<R: WorkerRuntime>(
        &mut self,
        controller: &mut FleetController<R>,
        shutdown: &mut ShutdownToken,
    ) -> Result<()> {
        let queue = self.settings.queue.clone();
        let consumer = self
            .channel
            .basic_consume(
                &queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|source| ControlPlaneError::Setup {
                operation: "basic consume",
                name: queue.clone(),
                source,
            })?;

        let mut dispatcher = Dispatcher::new(self.settings.message_format);
        info!(queue = %queue, format = %dispatcher.format(), "Waiting for messages");

        let result = consume(&mut dispatcher, controller, consumer, shutdown, &queue).await;

        let stats = dispatcher.stats();
        info!(
            acked = stats.acked,
            unacked = stats.unacked,
            "Stopped consuming"
        );
        result
    }

    /// Closes the connection. Later calls are no-ops.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(ControlPlaneError::Close)?;
        info!("Control-plane connection closed");
        Ok(())
    }
}

/// Dispatches `deliveries` one at a time until shutdown is requested.
///
/// The shutdown request is only observed between deliveries. The end of the
/// stream is an error: the broker cancelled the consumer or the channel died.
pub async fn consume<R, S, M>(
    dispatcher: &mut Dispatcher,
    controller: &mut FleetController<R>,
    deliveries: S,
    shutdown: &mut ShutdownToken,
    queue: &str,
) -> Result<()>
where
    R: WorkerRuntime,
    S: Stream<Item = std::result::Result<M, lapin::Error>>,
    M: Inbound,
{
    let mut deliveries = std::pin::pin!(deliveries);

    loop {
        let next = tokio::select! {
            _ = shutdown.requested() => return Ok(()),
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                dispatcher.dispatch(controller, &delivery).await;
            }
            Some(Err(e)) => return Err(ControlPlaneError::Consume(e)),
            None => {
                return Err(ControlPlaneError::ConsumerClosed {
                    queue: queue.to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl Disconnect for ControlPlane {
    async fn disconnect(&mut self) -> anyhow::Result<()> {
        Ok(self.close().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyfleet_config::Credentials;

    #[test]
    fn test_amqp_uri_from_settings() {
        let settings = BrokerSettings {
            host: "rabbit.internal".to_string(),
            port: 5673,
            vhost: "fleet".to_string(),
            credentials: Credentials::new("svc", "pw"),
            ..Default::default()
        };

        let uri = amqp_uri(&settings);
        assert_eq!(uri.authority.host, "rabbit.internal");
        assert_eq!(uri.authority.port, 5673);
        assert_eq!(uri.authority.userinfo.username, "svc");
        assert_eq!(uri.authority.userinfo.password, "pw");
        assert_eq!(uri.vhost, "fleet");
    }

    /// lapin は独自のスレッドではなく現在の tokio ランタイムで動く
    #[tokio::test]
    async fn test_connection_properties_use_tokio() {
        let properties = connection_properties();
        assert!(properties.executor.is_some());
        assert!(properties.reactor.is_some());
    }
}
