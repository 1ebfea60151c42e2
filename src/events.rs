use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, product_id: Uuid },
    CartCleared(Uuid),

    // Checkout events
    OrderPlaced { order_id: Uuid, customer_id: Uuid },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing the caller when the
    /// receiver is gone. Event delivery is best-effort.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            error!("Dropping event: {}", e);
        }
    }
}

/// Consumes events off the channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                customer_id,
            } => {
                info!(%order_id, %customer_id, "Order record created");
            }
            other => {
                info!(event = ?other, "Cart event");
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_events_in_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        let cart_id = Uuid::new_v4();
        sender.send(Event::CartCreated(cart_id)).await.unwrap();
        sender.send(Event::CartCleared(cart_id)).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Event::CartCreated(id)) if id == cart_id));
        assert!(matches!(rx.recv().await, Some(Event::CartCleared(id)) if id == cart_id));
    }

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let sender = EventSender::new(tx);
        // Must not panic or return an error to the caller.
        sender.send_or_log(Event::CartCreated(Uuid::new_v4())).await;
    }
}
