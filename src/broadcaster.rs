//! Fans out published tickers and arbitrage alerts to subscribed clients,
//! disconnecting any client whose send stalls past the per-send timeout.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::channel_manager::ChannelManager;
use crate::domain::{ArbitrageOpportunity, Event, TickerSnapshot};
use crate::event_bus::EventBus;

pub struct Broadcaster {
    channel_manager: Arc<ChannelManager>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(channel_manager: Arc<ChannelManager>, event_bus: &EventBus, send_timeout: Duration) -> Arc<Self> {
        let broadcaster = Arc::new(Self {
            channel_manager,
            send_timeout,
        });
        broadcaster.subscribe(event_bus);
        broadcaster
    }

    fn subscribe(self: &Arc<Self>, event_bus: &EventBus) {
        let this = self.clone();
        event_bus.subscribe(
            "ticker.published",
            Arc::new(move |event: Event| {
                let this = this.clone();
                Box::pin(async move {
                    if let Event::TickerPublished(ticker) = event {
                        this.broadcast_ticker(&ticker).await;
                    }
                    Ok(())
                })
            }),
        );

        let this = self.clone();
        event_bus.subscribe(
            "arbitrage.alert",
            Arc::new(move |event: Event| {
                let this = this.clone();
                Box::pin(async move {
                    if let Event::ArbitrageAlert(opportunity) = event {
                        this.broadcast_alert(&opportunity).await;
                    }
                    Ok(())
                })
            }),
        );
    }

    async fn broadcast_ticker(&self, ticker: &TickerSnapshot) {
        let recipients = self.channel_manager.recipients_for(ticker);
        if recipients.is_empty() {
            return;
        }
        let Ok(payload) = serde_json::to_string(ticker) else {
            return;
        };
        for client_id in recipients {
            self.send_to(&client_id, payload.clone()).await;
        }
    }

    async fn broadcast_alert(&self, opportunity: &ArbitrageOpportunity) {
        let mut payload = match serde_json::to_value(opportunity) {
            Ok(v) => v,
            Err(_) => return,
        };
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("type".to_string(), serde_json::Value::String("arbitrage_alert".to_string()));
        }
        let payload = payload.to_string();
        for client_id in self.channel_manager.all_client_ids() {
            self.send_to(&client_id, payload.clone()).await;
        }
    }

    async fn send_to(&self, client_id: &str, payload: String) {
        let Some(tx) = self.channel_manager.sender(client_id) else {
            return;
        };
        match tokio::time::timeout(self.send_timeout, tx.send(payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                warn!(client_id, "client send failed or timed out, disconnecting");
                self.channel_manager.unregister_client(client_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MarketSummary, MarketSummarySide, Subscription};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn subscribed_client_receives_exactly_one_frame() {
        let channel_manager = ChannelManager::new();
        let event_bus = EventBus::new();
        let _broadcaster = Broadcaster::new(channel_manager.clone(), &event_bus, Duration::from_secs(1));

        let (tx, mut rx) = mpsc::channel(8);
        channel_manager.register_client("c1".to_string(), tx);
        channel_manager.subscribe("c1", Subscription::Platform("k".to_string()));

        let ticker = TickerSnapshot {
            market_key: "M".to_string(),
            platform: "k".to_string(),
            summary: MarketSummary {
                yes: MarketSummarySide { bid: Some(0.5), ask: Some(0.6), volume: 1.0 },
                no: MarketSummarySide { bid: Some(0.4), ask: Some(0.5), volume: 1.0 },
            },
            timestamp: chrono::Utc::now(),
        };
        event_bus.publish("ticker.published", Event::TickerPublished(ticker)).await;

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(received.is_ok());
        assert!(received.unwrap().is_some());
    }

    #[tokio::test]
    async fn unresponsive_client_is_disconnected() {
        let channel_manager = ChannelManager::new();
        let event_bus = EventBus::new();
        let _broadcaster = Broadcaster::new(channel_manager.clone(), &event_bus, Duration::from_millis(10));

        let (tx, _rx) = mpsc::channel(1);
        channel_manager.register_client("slow".to_string(), tx.clone());
        channel_manager.subscribe("slow", Subscription::All);

        // Fill the channel so the next send blocks past the timeout.
        tx.send("filler".to_string()).await.unwrap();

        let ticker = TickerSnapshot {
            market_key: "M".to_string(),
            platform: "k".to_string(),
            summary: MarketSummary {
                yes: MarketSummarySide { bid: Some(0.5), ask: Some(0.6), volume: 1.0 },
                no: MarketSummarySide { bid: Some(0.4), ask: Some(0.5), volume: 1.0 },
            },
            timestamp: chrono::Utc::now(),
        };
        event_bus.publish("ticker.published", Event::TickerPublished(ticker)).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(channel_manager.sender("slow").is_none());
    }
}
