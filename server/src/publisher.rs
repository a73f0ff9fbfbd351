//! Tenant-scoped event publishing.
//!
//! [`EventPublisher`] delivers one [`Event`] to every connection bound to a
//! tenant's channel. Delivery is best-effort and per connection: a member
//! whose writer has gone away, or whose outbound queue is full, is counted
//! as failed and skipped, and the caller never sees an error.
//!
//! # Ordering
//!
//! Membership is snapshotted under the hub lock, then each member's
//! outbound queue is fed synchronously before `publish` returns. Every
//! connection drains its queue in order, so events published one after
//! another by the same caller reach each member in that same order.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use comanda_server::hub::Hub;
//! use comanda_server::publisher::EventPublisher;
//! use comanda_server::types::TenantId;
//! use serde_json::json;
//!
//! let publisher = EventPublisher::new(Arc::new(Hub::new()));
//! let tenant = TenantId::parse("42").unwrap();
//!
//! // Nobody is listening: a no-op, not an error.
//! let report = publisher.publish(&tenant, "order_created", json!({"id": 1}));
//! assert_eq!(report.recipients, 0);
//! ```

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::hub::Hub;
use crate::types::{Event, ServerFrame, TenantId};

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Channel members at the time of the call.
    pub recipients: usize,
    /// Members whose queue accepted the event.
    pub delivered: usize,
    /// Members that were closing or too far behind to take the event.
    pub failed: usize,
}

/// Handle for broadcasting events to a tenant's channel.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    hub: Arc<Hub>,
}

impl EventPublisher {
    /// Creates a publisher over `hub`.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Publishes `event_type` with `payload` to every member of `tenant`'s channel.
    ///
    /// Returns once delivery has been attempted for every member present when
    /// the call started. Does not wait for clients to read the event.
    pub fn publish(
        &self,
        tenant: &TenantId,
        event_type: impl Into<String>,
        payload: Value,
    ) -> PublishReport {
        self.publish_event(tenant, Event::new(event_type, payload))
    }

    /// Publishes an already constructed event.
    pub fn publish_event(&self, tenant: &TenantId, event: Event) -> PublishReport {
        let targets: Vec<_> = {
            let hub = self.hub.lock();
            hub.registry
                .members_of(tenant)
                .into_iter()
                .filter_map(|id| hub.connections.get(&id).map(|conn| (id, conn.outbound())))
                .collect()
        };

        let mut report = PublishReport {
            recipients: targets.len(),
            ..PublishReport::default()
        };

        if targets.is_empty() {
            trace!(
                empresa_id = %tenant,
                event = %event.event,
                "No subscribers in channel"
            );
            return report;
        }

        let event = Arc::new(event);
        for (id, outbound) in targets {
            match outbound.try_send(ServerFrame::Event(Arc::clone(&event))) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.failed += 1;
                    warn!(
                        connection_id = %id,
                        empresa_id = %tenant,
                        event = %event.event,
                        "Outbound queue full, dropping event for slow client"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    report.failed += 1;
                    warn!(
                        connection_id = %id,
                        empresa_id = %tenant,
                        event = %event.event,
                        "Failed to deliver event (connection closing)"
                    );
                }
            }
        }

        debug!(
            empresa_id = %tenant,
            event = %event.event,
            recipients = report.recipients,
            failed = report.failed,
            "Published event to company channel"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, OUTBOUND_CAPACITY};
    use serde_json::json;
    use tokio::sync::mpsc::{self, Receiver};

    fn setup() -> (ConnectionManager, EventPublisher, Arc<Hub>) {
        let hub = Arc::new(Hub::new());
        (
            ConnectionManager::new(Arc::clone(&hub)),
            EventPublisher::new(Arc::clone(&hub)),
            hub,
        )
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    /// Drains queued frames and returns the names of delivered events.
    fn drain_events(rx: &mut Receiver<ServerFrame>) -> Vec<String> {
        let mut names = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Event(event) = frame {
                names.push(event.event.clone());
            }
        }
        names
    }

    #[test]
    fn publish_to_unknown_tenant_is_noop() {
        let (_, publisher, _) = setup();
        let report = publisher.publish(&tenant("never"), "order_created", json!({}));
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn publish_reaches_only_the_target_tenant() {
        let (manager, publisher, _) = setup();
        let (tx_a, mut rx_a) = mpsc::channel(OUTBOUND_CAPACITY);
        let (tx_b, mut rx_b) = mpsc::channel(OUTBOUND_CAPACITY);
        let a = manager.accept(tx_a);
        let b = manager.accept(tx_b);
        manager.join(a, &json!(42)).unwrap();
        manager.join(b, &json!(7)).unwrap();

        let report = publisher.publish(&tenant("42"), "order_created", json!({"id": 1}));

        assert_eq!(report.recipients, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(drain_events(&mut rx_a), vec!["order_created"]);
        assert!(drain_events(&mut rx_b).is_empty());
    }

    #[test]
    fn unbound_connections_receive_nothing() {
        let (manager, publisher, _) = setup();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_CAPACITY);
        manager.accept(tx);

        publisher.publish(&tenant("42"), "order_created", json!({}));

        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn sequential_publishes_arrive_in_order() {
        let (manager, publisher, _) = setup();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
            let id = manager.accept(tx);
            manager.join(id, &json!("42")).unwrap();
            receivers.push(rx);
        }

        let expected: Vec<String> = (0..20).map(|i| format!("event_{i}")).collect();
        for name in &expected {
            publisher.publish(&tenant("42"), name.clone(), json!({}));
        }

        for rx in &mut receivers {
            assert_eq!(drain_events(rx), expected);
        }
    }

    #[test]
    fn failed_member_does_not_block_others() {
        let (manager, publisher, _) = setup();
        let (tx_dead, rx_dead) = mpsc::channel(OUTBOUND_CAPACITY);
        let (tx_live, mut rx_live) = mpsc::channel(OUTBOUND_CAPACITY);
        let dead = manager.accept(tx_dead);
        let live = manager.accept(tx_live);
        manager.join(dead, &json!(42)).unwrap();
        manager.join(live, &json!(42)).unwrap();

        drop(rx_dead);
        let report = publisher.publish(&tenant("42"), "order_updated", json!({"id": 3}));

        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(drain_events(&mut rx_live), vec!["order_updated"]);
    }

    #[test]
    fn stalled_member_sheds_events_while_others_receive() {
        let (manager, publisher, _) = setup();
        let (tx_stalled, mut rx_stalled) = mpsc::channel(OUTBOUND_CAPACITY);
        let (tx_live, mut rx_live) = mpsc::channel(OUTBOUND_CAPACITY);
        let stalled = manager.accept(tx_stalled);
        let live = manager.accept(tx_live);
        manager.join(stalled, &json!(42)).unwrap();
        manager.join(live, &json!(42)).unwrap();

        // The greeting and join acknowledgement already occupy two slots.
        let total = OUTBOUND_CAPACITY + 10;
        let mut failed = 0;
        let mut live_received = 0;
        for seq in 0..total {
            let report = publisher.publish(&tenant("42"), "order_updated", json!({"seq": seq}));
            assert_eq!(report.recipients, 2);
            assert_eq!(report.delivered + report.failed, 2);
            failed += report.failed;
            live_received += drain_events(&mut rx_live).len();
        }

        assert_eq!(live_received, total);
        assert_eq!(failed, total - (OUTBOUND_CAPACITY - 2));
        assert_eq!(drain_events(&mut rx_stalled).len(), OUTBOUND_CAPACITY - 2);

        // Once drained, the member receives again.
        let report = publisher.publish(&tenant("42"), "order_ready", json!({}));
        assert_eq!(report.delivered, 2);
        assert_eq!(drain_events(&mut rx_stalled), vec!["order_ready"]);
    }

    #[test]
    fn disconnected_member_is_not_a_recipient() {
        let (manager, publisher, _) = setup();
        let (tx, _rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let id = manager.accept(tx);
        manager.join(id, &json!(42)).unwrap();
        manager.disconnect(id);

        let report = publisher.publish(&tenant("42"), "order_created", json!({}));

        assert_eq!(report.recipients, 0);
    }

    #[test]
    fn payload_is_shared_not_copied() {
        let (manager, publisher, _) = setup();
        let (tx1, mut rx1) = mpsc::channel(OUTBOUND_CAPACITY);
        let (tx2, mut rx2) = mpsc::channel(OUTBOUND_CAPACITY);
        let c1 = manager.accept(tx1);
        let c2 = manager.accept(tx2);
        manager.join(c1, &json!(1)).unwrap();
        manager.join(c2, &json!(1)).unwrap();

        publisher.publish(&tenant("1"), "menu_updated", json!({"items": [1, 2, 3]}));

        let first = std::iter::from_fn(|| rx1.try_recv().ok())
            .find_map(|f| match f {
                ServerFrame::Event(e) => Some(e),
                _ => None,
            })
            .unwrap();
        let second = std::iter::from_fn(|| rx2.try_recv().ok())
            .find_map(|f| match f {
                ServerFrame::Event(e) => Some(e),
                _ => None,
            })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
