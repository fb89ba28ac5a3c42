#![allow(dead_code)]

use apns_relay::adapters::push::{GatewayConnection, PushConnector};
use apns_relay::domain::gateway::{Environment, Purpose};
use apns_relay::domain::notification::{DeliveryResult, DeviceFailure, NotificationPayload};
use apns_relay::domain::registration::Invalidation;
use apns_relay::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(2);

pub fn setup_tracing() {
    apns_relay::telemetry::init_test_telemetry();
}

pub fn tokens(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

pub fn payload(targets: &[&str]) -> NotificationPayload {
    NotificationPayload::new(tokens(targets), "New Message Available", "alice: hi", 1).unwrap()
}

pub fn failure(code: u8, message: &str) -> DeviceFailure {
    DeviceFailure { code, message: message.to_string() }
}

/// Scripted reply to one `deliver` call.
#[derive(Debug)]
pub enum Delivery {
    Result(DeliveryResult),
    TransportFailure,
}

/// Scripted item of the feedback stream.
#[derive(Debug, Clone)]
pub enum FeedbackItem {
    Report(Invalidation),
    Failure(String),
    /// The stream stops producing items without closing.
    Stall,
}

/// In-process stand-in for the gateway. Every connection it opens shares this state.
#[derive(Debug, Default)]
pub struct FakeGateway {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub fail_open: AtomicBool,
    pub open_delay: Mutex<Duration>,
    pub deliver_delay: Mutex<Duration>,
    deliveries: Mutex<VecDeque<Delivery>>,
    delivered: Mutex<Vec<Vec<String>>>,
    feedback: Mutex<Vec<FeedbackItem>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn PushConnector> {
        Arc::new(FakeConnector { gateway: Arc::clone(self) })
    }

    pub fn script_delivery(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push_back(delivery);
    }

    pub fn script_feedback(&self, items: Vec<FeedbackItem>) {
        *self.feedback.lock().unwrap() = items;
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn set_deliver_delay(&self, delay: Duration) {
        *self.deliver_delay.lock().unwrap() = delay;
    }

    /// Target lists of every `deliver` call, in call order.
    pub fn delivered(&self) -> Vec<Vec<String>> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FakeConnector {
    gateway: Arc<FakeGateway>,
}

#[async_trait]
impl PushConnector for FakeConnector {
    async fn open(
        &self,
        _environment: Environment,
        _purpose: Purpose,
    ) -> Result<Box<dyn GatewayConnection>, TransportError> {
        let delay = *self.gateway.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.gateway.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("network is unreachable".to_string()));
        }
        self.gateway.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection { gateway: Arc::clone(&self.gateway) }))
    }
}

#[derive(Debug)]
struct FakeConnection {
    gateway: Arc<FakeGateway>,
}

#[async_trait]
impl GatewayConnection for FakeConnection {
    async fn deliver(&self, payload: &NotificationPayload) -> Result<DeliveryResult, TransportError> {
        let delay = *self.gateway.deliver_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.gateway.delivered.lock().unwrap().push(payload.targets().to_vec());
        let next = self.gateway.deliveries.lock().unwrap().pop_front();
        match next {
            Some(Delivery::Result(result)) => Ok(result),
            Some(Delivery::TransportFailure) => {
                Err(TransportError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset")))
            }
            None => Ok(DeliveryResult::default()),
        }
    }

    fn feedback(&self) -> BoxStream<'_, Result<Invalidation, TransportError>> {
        let items = self.gateway.feedback.lock().unwrap().clone();
        futures::stream::iter(items)
            .then(|item| async move {
                match item {
                    FeedbackItem::Report(invalidation) => Ok(invalidation),
                    FeedbackItem::Failure(reason) => Err(TransportError::Connect(reason)),
                    FeedbackItem::Stall => std::future::pending().await,
                }
            })
            .boxed()
    }

    async fn close(&self) {
        self.gateway.closed.fetch_add(1, Ordering::SeqCst);
    }
}
