//! Post-commit domain events.
//!
//! Services publish events only after their transaction has committed. The
//! [`EventWorker`] drains the channel and calls the collaborators one event at
//! a time; every collaborator failure is logged and dropped, so nothing that
//! happens here can undo an order, a cancellation or a refund.

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use stockroom_core::{OrderId, OrderStatus, RefundId, RefundStatus, UserId};

use super::collaborators::Collaborators;
use crate::db::StockLevel;
use crate::db::notifications::NewNotification;

/// Something that happened in a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    OrderCreated {
        order_id: OrderId,
        user_id: UserId,
        order_number: String,
        total_amount: Decimal,
        shipping_fee: Decimal,
        shipping_provider: Option<String>,
    },
    OrderCancelled {
        order_id: OrderId,
        user_id: UserId,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: OrderId,
        user_id: UserId,
        order_number: String,
        status: OrderStatus,
    },
    /// A ledger mutation left the unit at this level.
    StockChanged(StockLevel),
    PaymentReceived {
        order_id: OrderId,
        user_id: UserId,
        order_number: String,
        success: bool,
    },
    RefundRequested {
        refund_id: RefundId,
        order_id: OrderId,
        user_id: UserId,
        refund_number: String,
    },
    RefundStatusChanged {
        refund_id: RefundId,
        user_id: UserId,
        refund_number: String,
        status: RefundStatus,
    },
}

impl DomainEvent {
    /// One `StockChanged` per level.
    pub fn stock_changes(levels: impl IntoIterator<Item = StockLevel>) -> impl Iterator<Item = Self> {
        levels.into_iter().map(Self::StockChanged)
    }

    /// The in-app notification this event produces, if any.
    #[must_use]
    pub fn notification(&self) -> Option<NewNotification> {
        let (user_id, kind, title, message, link) = match self {
            Self::OrderCreated {
                order_id,
                user_id,
                order_number,
                total_amount,
                ..
            } => (
                *user_id,
                "order_created",
                "Order placed".to_owned(),
                format!("Your order {order_number} for {total_amount} has been placed."),
                format!("/orders/{order_id}"),
            ),
            Self::OrderCancelled {
                order_id,
                user_id,
                order_number,
            } => (
                *user_id,
                "order_cancelled",
                "Order cancelled".to_owned(),
                format!("Your order {order_number} has been cancelled."),
                format!("/orders/{order_id}"),
            ),
            Self::OrderStatusChanged {
                order_id,
                user_id,
                order_number,
                status,
            } => (
                *user_id,
                "order_status",
                "Order updated".to_owned(),
                format!("Your order {order_number} is now {status}."),
                format!("/orders/{order_id}"),
            ),
            Self::PaymentReceived {
                order_id,
                user_id,
                order_number,
                success,
            } => (
                *user_id,
                "payment",
                if *success { "Payment received" } else { "Payment failed" }.to_owned(),
                if *success {
                    format!("Payment for order {order_number} was received.")
                } else {
                    format!("Payment for order {order_number} did not go through.")
                },
                format!("/orders/{order_id}"),
            ),
            Self::RefundRequested {
                refund_id,
                user_id,
                refund_number,
                ..
            } => (
                *user_id,
                "refund_requested",
                "Refund requested".to_owned(),
                format!("We received refund request {refund_number}."),
                format!("/refunds/{refund_id}"),
            ),
            Self::RefundStatusChanged {
                refund_id,
                user_id,
                refund_number,
                status,
            } => (
                *user_id,
                "refund_status",
                "Refund updated".to_owned(),
                format!("Refund {refund_number} is now {status}."),
                format!("/refunds/{refund_id}"),
            ),
            Self::StockChanged(_) => return None,
        };

        Some(NewNotification {
            user_id,
            kind,
            title,
            message,
            link: Some(link),
        })
    }
}

/// Sending half of the post-commit channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl EventBus {
    /// Create a bus and the receiver the worker consumes.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DomainEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue events for the worker. Never blocks and never fails the caller.
    pub fn publish(&self, events: impl IntoIterator<Item = DomainEvent>) {
        for event in events {
            if let Err(e) = self.tx.send(event) {
                tracing::warn!(event = ?e.0, "Event worker stopped, dropping event");
            }
        }
    }
}

/// Consumes domain events and drives the collaborators.
pub struct EventWorker {
    collaborators: Collaborators,
}

impl EventWorker {
    #[must_use]
    pub const fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Run the worker on its own task until every bus handle is dropped.
    pub fn spawn(self, rx: mpsc::UnboundedReceiver<DomainEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    /// Drain the channel until it closes.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<DomainEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(&event).await;
        }
        tracing::debug!("Event channel closed, worker exiting");
    }

    /// Dispatch one event. Collaborator failures are logged, never returned.
    pub async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::OrderCreated {
                order_id,
                shipping_fee,
                shipping_provider,
                ..
            } => {
                let provider = shipping_provider.as_deref().unwrap_or("standard");
                match self
                    .collaborators
                    .shipping
                    .create_shipment(*order_id, *shipping_fee, provider)
                    .await
                {
                    Ok(shipment_id) => {
                        tracing::debug!(order_id = %order_id, shipment_id = %shipment_id, "Shipment placeholder created");
                    }
                    Err(e) => {
                        tracing::warn!(order_id = %order_id, error = %e, "Failed to create shipment");
                    }
                }
            }
            DomainEvent::StockChanged(level) => {
                if let Err(e) = self.collaborators.alerter.check_and_alert(*level).await {
                    tracing::warn!(sku = %level.sku, error = %e, "Low-stock check failed");
                }
            }
            _ => {}
        }

        if let Some(notification) = event.notification() {
            let user_id = notification.user_id;
            if let Err(e) = self.collaborators.notifier.notify(notification).await {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to send notification");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use stockroom_core::{ProductId, ShipmentId, SkuKey};

    use super::*;
    use crate::services::collaborators::{
        CollaboratorError, LowStockAlerter, Notifier, ShippingProvider,
    };

    #[derive(Default)]
    struct Recorder {
        shipments: Mutex<Vec<(OrderId, Decimal, String)>>,
        notifications: Mutex<Vec<NewNotification>>,
        levels: Mutex<Vec<StockLevel>>,
        fail_shipping: bool,
    }

    #[async_trait]
    impl ShippingProvider for Recorder {
        async fn create_shipment(
            &self,
            order_id: OrderId,
            fee: Decimal,
            provider: &str,
        ) -> Result<ShipmentId, CollaboratorError> {
            if self.fail_shipping {
                return Err(CollaboratorError::Rejected("carrier down".to_owned()));
            }
            self.shipments
                .lock()
                .unwrap()
                .push((order_id, fee, provider.to_owned()));
            Ok(ShipmentId::new(1))
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, notification: NewNotification) -> Result<(), CollaboratorError> {
            self.notifications.lock().unwrap().push(notification);
            Ok(())
        }
    }

    #[async_trait]
    impl LowStockAlerter for Recorder {
        async fn check_and_alert(&self, level: StockLevel) -> Result<(), CollaboratorError> {
            self.levels.lock().unwrap().push(level);
            Ok(())
        }
    }

    fn worker(recorder: &Arc<Recorder>) -> EventWorker {
        EventWorker::new(Collaborators {
            shipping: recorder.clone(),
            notifier: recorder.clone(),
            alerter: recorder.clone(),
        })
    }

    fn order_created() -> DomainEvent {
        DomainEvent::OrderCreated {
            order_id: OrderId::new(10),
            user_id: UserId::new(3),
            order_number: "ORD1".to_owned(),
            total_amount: Decimal::from(1000),
            shipping_fee: Decimal::from(50),
            shipping_provider: None,
        }
    }

    #[tokio::test]
    async fn test_order_created_creates_shipment_and_notifies() {
        let recorder = Arc::new(Recorder::default());
        worker(&recorder).handle(&order_created()).await;

        let shipments = recorder.shipments.lock().unwrap();
        assert_eq!(shipments.len(), 1);
        assert_eq!(shipments[0].2, "standard");
        let notifications = recorder.notifications.lock().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, "order_created");
        assert_eq!(notifications[0].user_id, UserId::new(3));
    }

    #[tokio::test]
    async fn test_shipping_failure_does_not_stop_notification() {
        let recorder = Arc::new(Recorder {
            fail_shipping: true,
            ..Recorder::default()
        });
        worker(&recorder).handle(&order_created()).await;

        assert!(recorder.shipments.lock().unwrap().is_empty());
        assert_eq!(recorder.notifications.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stock_changed_goes_to_alerter_only() {
        let recorder = Arc::new(Recorder::default());
        let level = StockLevel {
            sku: SkuKey::product(ProductId::new(42)),
            quantity: 0,
            low_stock_threshold: 5,
        };
        worker(&recorder).handle(&DomainEvent::StockChanged(level)).await;

        assert_eq!(*recorder.levels.lock().unwrap(), vec![level]);
        assert!(recorder.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_worker_drains_bus_until_closed() {
        let recorder = Arc::new(Recorder::default());
        let (bus, rx) = EventBus::new();
        let handle = worker(&recorder).spawn(rx);

        bus.publish([
            order_created(),
            DomainEvent::OrderCancelled {
                order_id: OrderId::new(10),
                user_id: UserId::new(3),
                order_number: "ORD1".to_owned(),
            },
        ]);
        drop(bus);
        handle.await.unwrap();

        let kinds: Vec<_> = recorder
            .notifications
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.kind)
            .collect();
        assert_eq!(kinds, vec!["order_created", "order_cancelled"]);
    }

    #[test]
    fn test_publish_after_worker_stopped_is_silent() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        bus.publish([order_created()]);
    }
}
