//! Simulated execution adapter
//!
//! Paper-mode venue used by the runner and the test suite. Market
//! entries fill at the last simulated price; protective stops become
//! visible to modification only after a configurable delay, which
//! exercises the caller's retry path the same way a real venue's
//! ack latency does.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::adapter::{
    AdapterCapabilities, AdapterError, AdapterEvent, ExecutionAdapter, OrderRef,
};
use super::intent::Direction;
use crate::types::ExecutionInstrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimOrderKind {
    Entry,
    Stop,
}

#[derive(Debug, Clone)]
struct SimOrder {
    order_ref: OrderRef,
    tag: String,
    side: Direction,
    quantity: i32,
    kind: SimOrderKind,
    stop_price: Option<f64>,
    visible_at: Instant,
    filled: bool,
}

#[derive(Debug)]
struct SimInner {
    last_price: Option<f64>,
    orders: Vec<SimOrder>,
    counter: u64,
}

impl SimInner {
    fn next_ref(&mut self) -> OrderRef {
        self.counter += 1;
        OrderRef(format!("SIM-{}", self.counter))
    }
}

/// In-process venue simulation.
pub struct SimAdapter {
    connected: bool,
    visibility_delay: Duration,
    inner: Arc<Mutex<SimInner>>,
    event_tx: mpsc::Sender<AdapterEvent>,
    event_rx: Option<mpsc::Receiver<AdapterEvent>>,
}

impl SimAdapter {
    pub fn new(visibility_delay: Duration) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);
        Self {
            connected: false,
            visibility_delay,
            inner: Arc::new(Mutex::new(SimInner {
                last_price: None,
                orders: Vec::new(),
                counter: 0,
            })),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Price-feed handle for the driver loop. Stop fills are generated
    /// here when the simulated price crosses a working stop.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            inner: self.inner.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    fn emit(&self, event: AdapterEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("sim adapter event channel full, callback dropped");
        }
    }
}

#[async_trait]
impl ExecutionAdapter for SimAdapter {
    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            version: 1,
            supports_stop_diagnostics: true,
        }
    }

    async fn connect(&mut self) -> Result<(), AdapterError> {
        debug!("sim adapter connected");
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.connected = false;
        self.emit(AdapterEvent::Disconnected {
            reason: "requested".to_string(),
        });
        Ok(())
    }

    async fn submit_entry(
        &mut self,
        instrument: &ExecutionInstrument,
        side: Direction,
        quantity: i32,
        tag: &str,
    ) -> Result<OrderRef, AdapterError> {
        if !self.connected {
            return Err(AdapterError::NotConnected);
        }

        let (order_ref, fill_price) = {
            let mut inner = self.inner.lock().expect("sim mutex poisoned");
            let price = inner
                .last_price
                .ok_or_else(|| AdapterError::Rejected("no market price".to_string()))?;
            let order_ref = inner.next_ref();
            inner.orders.push(SimOrder {
                order_ref: order_ref.clone(),
                tag: tag.to_string(),
                side,
                quantity,
                kind: SimOrderKind::Entry,
                stop_price: None,
                visible_at: Instant::now(),
                filled: true,
            });
            (order_ref, price)
        };

        debug!("SIM entry {} {} x{} @ {:.2}", side, instrument, quantity, fill_price);
        self.emit(AdapterEvent::OrderAccepted {
            tag: tag.to_string(),
            order_ref: order_ref.clone(),
        });
        self.emit(AdapterEvent::Fill {
            tag: tag.to_string(),
            order_ref: order_ref.clone(),
            price: fill_price,
            quantity,
        });
        Ok(order_ref)
    }

    async fn submit_protective_stop(
        &mut self,
        instrument: &ExecutionInstrument,
        side: Direction,
        quantity: i32,
        stop_price: f64,
        tag: &str,
    ) -> Result<OrderRef, AdapterError> {
        if !self.connected {
            return Err(AdapterError::NotConnected);
        }

        let order_ref = {
            let mut inner = self.inner.lock().expect("sim mutex poisoned");
            let order_ref = inner.next_ref();
            inner.orders.push(SimOrder {
                order_ref: order_ref.clone(),
                tag: tag.to_string(),
                side,
                quantity,
                kind: SimOrderKind::Stop,
                stop_price: Some(stop_price),
                visible_at: Instant::now() + self.visibility_delay,
                filled: false,
            });
            order_ref
        };

        debug!("SIM stop {} {} x{} @ {:.2}", side, instrument, quantity, stop_price);
        self.emit(AdapterEvent::OrderAccepted {
            tag: tag.to_string(),
            order_ref: order_ref.clone(),
        });
        Ok(order_ref)
    }

    async fn modify_stop(
        &mut self,
        order_ref: &OrderRef,
        new_price: f64,
    ) -> Result<(), AdapterError> {
        if !self.connected {
            return Err(AdapterError::NotConnected);
        }

        {
            let mut inner = self.inner.lock().expect("sim mutex poisoned");
            let order = inner
                .orders
                .iter_mut()
                .find(|o| &o.order_ref == order_ref && o.kind == SimOrderKind::Stop)
                .ok_or(AdapterError::StopNotVisible)?;
            if order.filled {
                return Err(AdapterError::Rejected("stop already filled".to_string()));
            }
            if Instant::now() < order.visible_at {
                return Err(AdapterError::StopNotVisible);
            }
            order.stop_price = Some(new_price);
        }

        debug!("SIM modify {} -> {:.2}", order_ref, new_price);
        self.emit(AdapterEvent::StopModifyAck {
            order_ref: order_ref.clone(),
            price: new_price,
        });
        Ok(())
    }

    async fn cancel(&mut self, order_ref: &OrderRef) -> Result<(), AdapterError> {
        if !self.connected {
            return Err(AdapterError::NotConnected);
        }
        let mut inner = self.inner.lock().expect("sim mutex poisoned");
        inner.orders.retain(|o| &o.order_ref != order_ref);
        Ok(())
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<AdapterEvent>> {
        self.event_rx.take()
    }
}

/// Cloneable price-feed side of the simulation.
#[derive(Clone)]
pub struct SimHandle {
    inner: Arc<Mutex<SimInner>>,
    event_tx: mpsc::Sender<AdapterEvent>,
}

impl SimHandle {
    /// Advance the simulated market and fill any crossed stops.
    pub fn on_price(&self, price: f64) {
        let fills: Vec<SimOrder> = {
            let mut inner = self.inner.lock().expect("sim mutex poisoned");
            inner.last_price = Some(price);

            let mut fills = Vec::new();
            for order in inner.orders.iter_mut() {
                if order.kind != SimOrderKind::Stop || order.filled {
                    continue;
                }
                let Some(stop) = order.stop_price else { continue };
                // Closing side: a Short closing order is a sell stop
                let crossed = match order.side {
                    Direction::Short => price <= stop,
                    Direction::Long => price >= stop,
                };
                if crossed {
                    order.filled = true;
                    fills.push(order.clone());
                }
            }
            fills
        };

        for order in fills {
            let event = AdapterEvent::Fill {
                tag: order.tag,
                order_ref: order.order_ref,
                price: order.stop_price.unwrap_or(price),
                quantity: order.quantity,
            };
            if self.event_tx.try_send(event).is_err() {
                warn!("sim adapter event channel full, stop fill dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mnq() -> ExecutionInstrument {
        ExecutionInstrument("MNQ".to_string())
    }

    #[tokio::test]
    async fn entry_fills_at_market() {
        let mut sim = SimAdapter::new(Duration::ZERO);
        let mut events = sim.take_event_receiver().unwrap();
        sim.connect().await.unwrap();
        sim.handle().on_price(4010.5);

        sim.submit_entry(&mnq(), Direction::Long, 1, "tag-1").await.unwrap();

        let accepted = events.recv().await.unwrap();
        assert!(matches!(accepted, AdapterEvent::OrderAccepted { .. }));
        match events.recv().await.unwrap() {
            AdapterEvent::Fill { tag, price, .. } => {
                assert_eq!(tag, "tag-1");
                assert_eq!(price, 4010.5);
            }
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_modify_before_visibility_is_retryable() {
        let mut sim = SimAdapter::new(Duration::from_millis(500));
        sim.connect().await.unwrap();
        sim.handle().on_price(4010.5);

        let stop_ref = sim
            .submit_protective_stop(&mnq(), Direction::Short, 1, 4000.0, "stop-1")
            .await
            .unwrap();

        let err = sim.modify_stop(&stop_ref, 4010.75).await.unwrap_err();
        assert_eq!(err, AdapterError::StopNotVisible);
        assert!(err.is_retryable());

        tokio::time::advance(Duration::from_millis(600)).await;
        sim.modify_stop(&stop_ref, 4010.75).await.unwrap();
    }

    #[tokio::test]
    async fn sell_stop_fills_on_cross() {
        let mut sim = SimAdapter::new(Duration::ZERO);
        let mut events = sim.take_event_receiver().unwrap();
        sim.connect().await.unwrap();
        let handle = sim.handle();
        handle.on_price(4010.5);

        sim.submit_protective_stop(&mnq(), Direction::Short, 1, 4000.0, "stop-1")
            .await
            .unwrap();
        // Drain the accept
        events.recv().await.unwrap();

        handle.on_price(4005.0);
        assert!(events.try_recv().is_err());

        handle.on_price(3999.5);
        match events.recv().await.unwrap() {
            AdapterEvent::Fill { tag, price, .. } => {
                assert_eq!(tag, "stop-1");
                assert_eq!(price, 4000.0);
            }
            other => panic!("expected stop fill, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn disconnected_adapter_refuses_orders() {
        let mut sim = SimAdapter::new(Duration::ZERO);
        let err = sim
            .submit_entry(&mnq(), Direction::Long, 1, "tag")
            .await
            .unwrap_err();
        assert_eq!(err, AdapterError::NotConnected);
    }
}
