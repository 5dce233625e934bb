use actix::{prelude::*, Actor, Addr};
use futures::prelude::*;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};
use thiserror::Error;
use tokio::sync::mpsc::{error::TrySendError, unbounded_channel, Sender, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{AlarmEvent, ClientId, Notifier};

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker event loop is not running")]
    Closed,
    #[error("Actix mailbox Error")]
    MailError(#[from] MailboxError),
}

/// Everything that reaches the [`Broker`] event loop goes through a single
/// queue, so a subscription made before a publish call is always seen by
/// that publish
enum BrokerCommand {
    Publish(AlarmEvent),
    Subscribe {
        id: ClientId,
        events: Sender<AlarmEvent>,
        active: Arc<AtomicBool>,
    },
    Unsubscribe {
        id: ClientId,
    },
}

struct Subscriber {
    events: Sender<AlarmEvent>,
    active: Arc<AtomicBool>,
}

/// Returned to a client on subscription, and needed to unsubscribe
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: ClientId,
    active: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// The [`Broker`] owns the subscriber set. It runs as a single task and is
/// only reachable through [`FanOut`] handles; it exits once every handle
/// has been dropped
struct Broker {
    subscribers: HashMap<ClientId, Subscriber>,
    commands: UnboundedReceiverStream<BrokerCommand>,
}

impl Broker {
    async fn event_loop(&mut self) {
        while let Some(cmd) = self.commands.next().await {
            match cmd {
                BrokerCommand::Publish(event) => self.deliver(event),
                BrokerCommand::Subscribe { id, events, active } => {
                    self.subscribers.insert(id, Subscriber { events, active });
                    log::debug!("Subscribed client ID {id:}");
                }
                BrokerCommand::Unsubscribe { id } => {
                    if self.subscribers.remove(&id).is_none() {
                        log::debug!("Client ID {id:} was already removed");
                    } else {
                        log::debug!("Unsubscribed client ID {id:}");
                    }
                }
            }
        }
    }

    /// Non-blocking send to each subscriber. A subscriber whose queue is
    /// full misses this event; one whose receiver is gone is dropped.
    /// Neither affects the others
    fn deliver(&mut self, event: AlarmEvent) {
        log::trace!("Routing event {event:?} to {} clients", self.subscribers.len());
        self.subscribers.retain(|id, sub| {
            if !sub.active.load(Ordering::Acquire) {
                return false;
            }
            match sub.events.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Event queue full for client ID {id:}, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    log::warn!(
                        "Client event receiver closed for client ID {id:}, dropping client"
                    );
                    false
                }
            }
        });
    }
}

/// Cloneable handle onto the broker event loop: the publish side used by
/// sensor sessions, and the subscribe side used by the monitor boundary
#[derive(Clone)]
pub struct FanOut {
    sender: UnboundedSender<BrokerCommand>,
    next_id: Arc<AtomicU32>,
}

impl FanOut {
    /// Spawn the broker event loop on the current tokio runtime
    pub fn start() -> Self {
        let (sender, receiver) = unbounded_channel();
        let mut broker = Broker {
            subscribers: HashMap::new(),
            commands: UnboundedReceiverStream::new(receiver),
        };

        tokio::spawn(async move {
            broker.event_loop().await;
            log::warn!("Broker exiting event loop");
        });

        Self {
            sender,
            next_id: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Every event published after this returns is delivered to `events`,
    /// until the subscription is removed or the receiver is dropped.
    /// Events published while `events` is full are dropped for this
    /// subscriber only, see [`crate::SUBSCRIBER_QUEUE_DEPTH`]
    pub fn subscribe(
        &self,
        events: Sender<AlarmEvent>,
    ) -> Result<SubscriptionHandle, BrokerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.sender
            .send(BrokerCommand::Subscribe {
                id,
                events,
                active: Arc::clone(&active),
            })
            .map_err(|_| BrokerError::Closed)?;
        Ok(SubscriptionHandle { id, active })
    }

    /// Once this returns, nothing more is delivered to the subscription,
    /// including publishes that were already queued
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), BrokerError> {
        handle.active.store(false, Ordering::Release);
        self.sender
            .send(BrokerCommand::Unsubscribe { id: handle.id })
            .map_err(|_| BrokerError::Closed)
    }
}

impl Notifier for FanOut {
    fn publish(&self, event: AlarmEvent) {
        if let Err(e) = self.sender.send(BrokerCommand::Publish(event)) {
            log::error!("Broker is gone, dropping event: {e:}");
        }
    }
}

/// Start the broker event loop and the actor handle exposing its client
/// subscription API. Must be called from within a running actix system
pub fn broker() -> (FanOut, Addr<BrokerHandle>) {
    let fanout = FanOut::start();
    let handle = BrokerHandle::new(fanout.clone()).start();
    (fanout, handle)
}

/// The [`BrokerHandle`] provides clients a minimal handle exposing only the
/// subscription API of the broker: clients can subscribe and unsubscribe
/// but never publish
pub struct BrokerHandle(FanOut);

impl BrokerHandle {
    pub fn new(fanout: FanOut) -> Self {
        Self(fanout)
    }
}

impl Actor for BrokerHandle {
    type Context = Context<Self>;
}

#[derive(Message)]
#[rtype(result = "ClientSubscribeResponse")]
pub struct ClientSubscribe {
    pub events: Sender<AlarmEvent>,
}
type ClientSubscribeResponse = Result<SubscriptionHandle, BrokerError>;

impl Handler<ClientSubscribe> for BrokerHandle {
    type Result = ClientSubscribeResponse;

    fn handle(&mut self, msg: ClientSubscribe, _ctx: &mut Self::Context) -> Self::Result {
        self.0.subscribe(msg.events).map_err(|e| {
            log::error!("Error sending sub to broker {e:}");
            e
        })
    }
}

#[derive(Message)]
#[rtype(result = "ClientUnsubscribeResponse")]
pub struct ClientUnsubscribe {
    pub handle: SubscriptionHandle,
}

type ClientUnsubscribeResponse = Result<(), BrokerError>;

impl Handler<ClientUnsubscribe> for BrokerHandle {
    type Result = ClientUnsubscribeResponse;

    fn handle(&mut self, msg: ClientUnsubscribe, _ctx: &mut Self::Context) -> Self::Result {
        self.0.unsubscribe(&msg.handle).map_err(|e| {
            log::error!("Error sending unsub to broker {e:}");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{
        sync::mpsc::channel,
        time::{timeout, Duration},
    };

    const DEPTH: usize = 16;

    fn stale(id: &str) -> AlarmEvent {
        AlarmEvent::SensorStale {
            sensor_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let fanout = FanOut::start();
        let (tx_a, mut rx_a) = channel(DEPTH);
        let (tx_b, mut rx_b) = channel(DEPTH);
        let a = fanout.subscribe(tx_a).unwrap();
        let b = fanout.subscribe(tx_b).unwrap();
        assert_ne!(a.id(), b.id());

        fanout.publish(stale("1"));
        fanout.publish(stale("2"));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await, Some(stale("1")));
            assert_eq!(rx.recv().await, Some(stale("2")));
        }
    }

    #[tokio::test]
    async fn closed_subscriber_does_not_block_others() {
        let fanout = FanOut::start();
        let (tx_gone, rx_gone) = channel(DEPTH);
        let (tx, mut rx) = channel(DEPTH);
        fanout.subscribe(tx_gone).unwrap();
        fanout.subscribe(tx).unwrap();
        drop(rx_gone);

        fanout.publish(stale("1"));
        fanout.publish(stale("2"));

        assert_eq!(rx.recv().await, Some(stale("1")));
        assert_eq!(rx.recv().await, Some(stale("2")));
    }

    #[tokio::test]
    async fn unsubscribe_drops_already_queued_publish() {
        let fanout = FanOut::start();
        let (tx, mut rx) = channel(DEPTH);
        let handle = fanout.subscribe(tx).unwrap();

        // Queued before the unsubscribe, but the broker has not run yet
        fanout.publish(stale("1"));
        fanout.unsubscribe(&handle).unwrap();
        assert!(!handle.is_active());

        // The broker drops its sender without delivering anything
        assert_eq!(rx.recv().await, None);

        // Unsubscribing twice is harmless
        fanout.unsubscribe(&handle).unwrap();
        fanout.publish(stale("2"));
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events() {
        let fanout = FanOut::start();
        fanout.publish(stale("early"));

        let (tx, mut rx) = channel(DEPTH);
        fanout.subscribe(tx).unwrap();
        fanout.publish(stale("late"));

        assert_eq!(rx.recv().await, Some(stale("late")));
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn full_subscriber_misses_events_without_stalling_others() {
        let fanout = FanOut::start();
        let (tx_small, mut rx_small) = channel(2);
        let (tx, mut rx) = channel(DEPTH);
        fanout.subscribe(tx_small).unwrap();
        let other = fanout.subscribe(tx).unwrap();

        for i in 1..=4 {
            fanout.publish(stale(&i.to_string()));
        }
        for i in 1..=4 {
            assert_eq!(rx.recv().await, Some(stale(&i.to_string())));
        }

        // Only the first two fit, the small subscriber stays subscribed
        assert_eq!(rx_small.recv().await, Some(stale("1")));
        assert_eq!(rx_small.recv().await, Some(stale("2")));
        fanout.publish(stale("5"));
        assert_eq!(rx_small.recv().await, Some(stale("5")));
        assert_eq!(rx.recv().await, Some(stale("5")));
        assert!(other.is_active());
    }

    #[actix::test]
    async fn actor_handle_subscribes_and_unsubscribes() {
        let (fanout, handle) = broker();
        let (tx, mut rx) = channel(DEPTH);

        let sub = handle
            .send(ClientSubscribe { events: tx })
            .await
            .expect("mailbox")
            .expect("subscribe");
        fanout.publish(stale("10-10"));
        assert_eq!(rx.recv().await, Some(stale("10-10")));

        handle
            .send(ClientUnsubscribe { handle: sub })
            .await
            .expect("mailbox")
            .expect("unsubscribe");
        fanout.publish(stale("10-10"));
        assert_eq!(rx.recv().await, None);
    }
}
