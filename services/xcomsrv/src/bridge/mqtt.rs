//! MQTT publish bridge.
//!
//! Owns the broker client, the spawned network event-loop task, the
//! connection flag and the serial-link availability state. The poll task
//! only ever calls bounded operations here; broker I/O and reconnection
//! live entirely on the event-loop task.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::availability::LinkAvailability;
use super::discovery;
use crate::config::{MqttConfig, ParameterDescriptor};
use crate::executor::TransactionOutcome;
use crate::scheduler::OutcomeSink;

/// Retained liveness payloads; the offline payload doubles as the last will.
pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Published instead of a number when a poll fails, so subscribers can tell
/// "poll failed" from "never polled".
pub const FAILURE_SENTINEL: &str = "nAn";

/// Publishes derived from one transaction outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomePlan {
    /// Payload for the value topic: a formatted number or the sentinel.
    pub value_payload: String,
    /// Retained marker for the availability topic, present only on a
    /// debounced liveness transition.
    pub availability_marker: Option<&'static str>,
}

/// Decide what one outcome publishes.
///
/// The availability flag follows every individual transaction: a failure
/// mid-sweep goes offline immediately and the next success goes back
/// online, each transition announced exactly once. Online transitions are
/// only recorded while the broker is reachable so the marker is re-sent
/// once connectivity returns; encode failures are not link evidence and
/// leave the flag alone.
pub fn plan_outcome(
    descriptor: &ParameterDescriptor,
    outcome: &TransactionOutcome,
    availability: &LinkAvailability,
    broker_connected: bool,
) -> OutcomePlan {
    match outcome {
        TransactionOutcome::Value(raw) => {
            let marker =
                (broker_connected && availability.mark_online()).then_some(PAYLOAD_ONLINE);
            let value = raw * descriptor.sign * descriptor.scale;
            OutcomePlan {
                value_payload: format!("{value:.3}"),
                availability_marker: marker,
            }
        }
        TransactionOutcome::Failure(kind) => {
            let marker =
                (kind.is_link_evidence() && availability.mark_offline()).then_some(PAYLOAD_OFFLINE);
            OutcomePlan {
                value_payload: FAILURE_SENTINEL.to_string(),
                availability_marker: marker,
            }
        }
    }
}

/// Bridge between poll outcomes and the MQTT topic space.
pub struct MqttBridge {
    client: AsyncClient,
    config: MqttConfig,
    connected: Arc<Mutex<bool>>,
    availability: Arc<LinkAvailability>,
    reconnect: Arc<Notify>,
    last_health_check: Mutex<Option<Instant>>,
}

impl MqttBridge {
    /// Create the broker client and spawn its event-loop task.
    ///
    /// The task drives connection keep-alive and automatic reconnection
    /// with a fixed backoff, flips the `connected` flag on
    /// ConnAck/error, and re-announces discovery metadata and availability
    /// after every (re)connection.
    pub fn connect(
        config: MqttConfig,
        table: Arc<Vec<ParameterDescriptor>>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(
            config.availability_topic(),
            PAYLOAD_OFFLINE,
            QoS::AtMostOnce,
            true,
        ));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        info!("connecting to MQTT broker {}:{}", config.host, config.port);
        let (client, eventloop) = AsyncClient::new(options, 16);

        let connected = Arc::new(Mutex::new(false));
        let availability = Arc::new(LinkAvailability::new());
        let reconnect = Arc::new(Notify::new());

        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            config.clone(),
            table,
            connected.clone(),
            availability.clone(),
            reconnect.clone(),
            cancel,
        ));

        (
            Self {
                client,
                config,
                connected,
                availability,
                reconnect,
                last_health_check: Mutex::new(None),
            },
            task,
        )
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    /// Bounded connection check, rate-limited to the configured interval.
    ///
    /// The event-loop task retries on its own backoff; when the link is
    /// still down at check time this skips the remaining backoff so the
    /// next attempt happens immediately.
    pub async fn health_check(&self) {
        let interval = Duration::from_secs(self.config.health_check_interval_secs);
        {
            let mut last = self.last_health_check.lock();
            match *last {
                Some(at) if at.elapsed() < interval => return,
                _ => *last = Some(Instant::now()),
            }
        }

        if self.is_connected() {
            debug!("mqtt status: connected");
        } else {
            warn!("mqtt disconnected, requesting immediate reconnect attempt");
            self.reconnect.notify_one();
        }
    }

    /// Disconnect cleanly; the event-loop task winds down on its own.
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("mqtt disconnect failed: {}", e);
        }
    }

    /// Non-blocking: the poll task must never stall behind the network
    /// worker, so a full request queue drops the publish with a warning,
    /// exactly like a failed publish on a dead broker handle.
    fn publish_marker(&self, marker: &str) {
        info!("serial commstatus set to {}", marker);
        if let Err(e) =
            self.client
                .try_publish(self.config.availability_topic(), QoS::AtMostOnce, true, marker)
        {
            warn!("availability publish failed: {}", e);
        }
    }
}

#[async_trait]
impl OutcomeSink for MqttBridge {
    async fn publish_outcome(&self, descriptor: &ParameterDescriptor, outcome: &TransactionOutcome) {
        let plan = plan_outcome(descriptor, outcome, &self.availability, self.is_connected());

        if let Some(marker) = plan.availability_marker {
            self.publish_marker(marker);
        }

        match outcome {
            TransactionOutcome::Value(_) => {
                debug!("{} = {} {}", descriptor.name, plan.value_payload, descriptor.unit);
            }
            TransactionOutcome::Failure(kind) => {
                warn!("{} = read failed ({:?})", descriptor.name, kind);
            }
        }

        let topic = self.config.value_topic(descriptor);
        if let Err(e) = self
            .client
            .try_publish(topic, QoS::AtMostOnce, false, plan.value_payload)
        {
            warn!("value publish failed for {}: {}", descriptor.name, e);
        }
    }

    async fn maintain(&self) {
        self.health_check().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    config: MqttConfig,
    table: Arc<Vec<ParameterDescriptor>>,
    connected: Arc<Mutex<bool>>,
    availability: Arc<LinkAvailability>,
    reconnect: Arc<Notify>,
    cancel: CancellationToken,
) {
    let backoff = Duration::from_secs(config.reconnect_backoff_secs);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                *connected.lock() = accepted;
                info!("mqtt connack: {:?}", ack.code);
                if accepted {
                    // The broker may have been recreated and lost retained
                    // state; re-announce everything. Publishing happens on
                    // its own task: requests are only drained while this
                    // task keeps polling the event loop.
                    availability.reset();
                    tokio::spawn(publish_discovery(
                        client.clone(),
                        config.clone(),
                        table.clone(),
                    ));
                }
            }
            Ok(_) => {}
            Err(e) => {
                *connected.lock() = false;
                error!("mqtt connection error: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = reconnect.notified() => debug!("reconnect nudge received"),
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }
    debug!("mqtt event loop stopped");
}

async fn publish_discovery(
    client: AsyncClient,
    config: MqttConfig,
    table: Arc<Vec<ParameterDescriptor>>,
) {
    info!("publishing discovery configs for {} sensors", table.len());
    for descriptor in table.iter() {
        let topic = discovery::config_topic(&config.discovery_prefix, descriptor);
        let payload = discovery::config_payload(
            descriptor,
            &config.value_topic(descriptor),
            &config.availability_topic(),
        );
        if let Err(e) = client
            .publish(topic, QoS::AtMostOnce, true, payload.to_string())
            .await
        {
            warn!("discovery publish failed for {}: {}", descriptor.name, e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_parameter_table;
    use crate::executor::FailureKind;

    #[test]
    fn value_outcome_applies_sign_and_scale() {
        let table = default_parameter_table();
        // xt1_input_active_power carries sign -1.
        let descriptor = &table[0];
        let availability = LinkAvailability::new();

        let plan = plan_outcome(
            descriptor,
            &TransactionOutcome::Value(-2.0),
            &availability,
            true,
        );
        assert_eq!(plan.value_payload, "2.000");
        assert_eq!(plan.availability_marker, Some(PAYLOAD_ONLINE));
    }

    #[test]
    fn failure_publishes_sentinel_and_offline_once() {
        let table = default_parameter_table();
        let descriptor = &table[0];
        let availability = LinkAvailability::new();
        availability.mark_online();

        let outcome = TransactionOutcome::Failure(FailureKind::HeaderTimeout);
        let plan = plan_outcome(descriptor, &outcome, &availability, true);
        assert_eq!(plan.value_payload, FAILURE_SENTINEL);
        assert_eq!(plan.availability_marker, Some(PAYLOAD_OFFLINE));

        // A second consecutive failure never re-announces.
        let plan = plan_outcome(descriptor, &outcome, &availability, true);
        assert_eq!(plan.availability_marker, None);
    }

    #[test]
    fn encode_failure_is_not_link_evidence() {
        let table = default_parameter_table();
        let descriptor = &table[0];
        let availability = LinkAvailability::new();
        availability.mark_online();

        let outcome = TransactionOutcome::Failure(FailureKind::EncodeError);
        let plan = plan_outcome(descriptor, &outcome, &availability, true);
        assert_eq!(plan.value_payload, FAILURE_SENTINEL);
        assert_eq!(plan.availability_marker, None);
        assert!(availability.is_online());
    }

    #[test]
    fn online_marker_waits_for_broker_connectivity() {
        let table = default_parameter_table();
        let descriptor = &table[0];
        let availability = LinkAvailability::new();

        // Broker down: the transition is deferred, not lost.
        let plan = plan_outcome(
            descriptor,
            &TransactionOutcome::Value(1.0),
            &availability,
            false,
        );
        assert_eq!(plan.availability_marker, None);
        assert!(!availability.is_online());

        let plan = plan_outcome(
            descriptor,
            &TransactionOutcome::Value(1.0),
            &availability,
            true,
        );
        assert_eq!(plan.availability_marker, Some(PAYLOAD_ONLINE));
    }
}
