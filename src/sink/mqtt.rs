//! MQTT publisher
//!
//! Each delivery opens a fresh clean-session connection, publishes one non-retained
//! QoS 1 message whose payload is the whole number of liters as decimal text, waits for
//! the broker's acknowledgement and disconnects.
//!
//! Connecting is bounded by `connect_timeout_secs`. Once the broker has accepted the
//! connection, a transport error is treated as transient: the event loop is polled
//! again, which reconnects and retransmits the pending publish, up to
//! `max_reconnect_attempts` times.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::time::timeout;

use crate::config::MqttConfig;
use crate::error::{AppResult, CisternError};
use crate::measurement::VolumeMeasurement;
use crate::traits::MeasurementPublisher;

const DEFAULT_PORT: u16 = 1883;
const REQUEST_CHANNEL_CAPACITY: usize = 10;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const SINK_NAME: &str = "mqtt";

/// One outgoing PUBLISH: where, what and how
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMessage {
    /// Destination topic
    pub topic: String,
    /// Whole liters as decimal text
    pub payload: String,
    /// Delivery guarantee requested from the broker
    pub qos: QoS,
    /// Whether the broker keeps it as the topic's last value
    pub retain: bool,
}

/// Publishes volume measurements to a fixed topic
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    host: String,
    port: u16,
    topic: String,
    client_id: String,
    connect_timeout: Duration,
    keep_alive: Duration,
    max_reconnect_attempts: u32,
}

impl MqttPublisher {
    /// # Errors
    ///
    /// `ConfigValidation` if `host` is not a usable broker address.
    pub fn new(config: &MqttConfig) -> AppResult<Self> {
        let (host, port) = parse_broker_address(&config.host)?;
        Ok(Self {
            host,
            port,
            topic: config.topic.clone(),
            client_id: config.client_id.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            keep_alive: Duration::from_secs(config.keep_alive_secs.max(5)),
            max_reconnect_attempts: config.max_reconnect_attempts,
        })
    }

    /// Broker host and port
    pub fn broker(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    /// The message `measurement` is published as
    pub fn message(&self, measurement: &VolumeMeasurement) -> VolumeMessage {
        VolumeMessage {
            topic: self.topic.clone(),
            payload: measurement.whole_liters().to_string(),
            qos: QoS::AtLeastOnce,
            retain: false,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_clean_session(true);
        options.set_keep_alive(self.keep_alive);
        options
    }

    async fn await_connack(&self, event_loop: &mut EventLoop) -> AppResult<()> {
        let connect = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(CisternError::delivery(
                                SINK_NAME,
                                format!("broker refused connection: {:?}", ack.code),
                            ))
                        };
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(CisternError::delivery(SINK_NAME, e)),
                }
            }
        };

        timeout(self.connect_timeout, connect).await.map_err(|_| {
            CisternError::delivery(
                SINK_NAME,
                format!(
                    "connect to {}:{} timed out after {:?}",
                    self.host, self.port, self.connect_timeout
                ),
            )
        })?
    }

    async fn await_puback(&self, event_loop: &mut EventLoop) -> AppResult<()> {
        let mut reconnects = 0;
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => {
                    reconnects += 1;
                    if reconnects > self.max_reconnect_attempts {
                        return Err(CisternError::delivery(
                            SINK_NAME,
                            format!("connection lost after {} reconnect attempts: {e}", reconnects - 1),
                        ));
                    }
                    tracing::warn!(
                        attempt = reconnects,
                        error = %e,
                        "MQTT connection lost during publish, reconnecting"
                    );
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }

    async fn disconnect(&self, client: &AsyncClient, event_loop: &mut EventLoop) {
        if let Err(e) = client.disconnect().await {
            tracing::debug!(error = %e, "MQTT disconnect request not queued");
            return;
        }

        let drain = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        };
        if timeout(self.connect_timeout, drain).await.is_err() {
            tracing::debug!("MQTT disconnect did not complete in time");
        }
    }
}

#[async_trait]
impl MeasurementPublisher for MqttPublisher {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn deliver(&self, measurement: &VolumeMeasurement) -> AppResult<()> {
        let message = self.message(measurement);
        let (client, mut event_loop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);

        client
            .publish(
                message.topic.as_str(),
                message.qos,
                message.retain,
                message.payload.clone().into_bytes(),
            )
            .await
            .map_err(|e| CisternError::delivery(SINK_NAME, e))?;

        self.await_connack(&mut event_loop).await?;
        self.await_puback(&mut event_loop).await?;

        tracing::debug!(
            topic = %message.topic,
            payload = %message.payload,
            delivered_at = %chrono::Utc::now().to_rfc3339(),
            "Published cistern volume"
        );

        self.disconnect(&client, &mut event_loop).await;
        Ok(())
    }
}

/// Split a broker address into host and port.
///
/// Accepts `tcp://host:port`, `mqtt://host:port` or bare `host[:port]`; the port
/// defaults to 1883.
pub fn parse_broker_address(address: &str) -> AppResult<(String, u16)> {
    let invalid = |reason: &str| {
        CisternError::ConfigValidation(format!("Invalid mqtt.host '{address}': {reason}"))
    };

    let trimmed = address.trim();
    let without_scheme = match trimmed.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{scheme}'"))),
        None => trimmed,
    };
    let authority = without_scheme.trim_end_matches('/');

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    Ok((host.to_string(), port))
}
