//! Per-operation event channel with buffering and replay.
//!
//! Events are `(id, payload)` pairs fanned out to any number of listeners.
//! A listener either knows the id it cares about or does not yet: the start
//! commands return an id only after the worker may already have published,
//! so an unbound listener keeps everything in order until [`EventListener::bind`]
//! is called, then drops the envelopes of other operations and replays the
//! rest. A listener created after the id is known replays the retained
//! history of that id before switching to live delivery.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

/// Payloads that can travel through an [`EventChannel`].
pub trait ChannelEvent: Clone + Send + Sync + 'static {
    /// The event ends its operation's stream.
    fn is_terminal(&self) -> bool;

    /// The event only carries cumulative counters; consecutive progress
    /// events collapse to the latest in the replay history.
    fn is_progress(&self) -> bool;
}

/// An event tagged with the id of the operation that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<I, E> {
    pub id: I,
    #[serde(flatten)]
    pub event: E,
}

struct History<I, E> {
    events: HashMap<I, Vec<E>>,
    finished: VecDeque<I>,
    retained: usize,
}

impl<I: Clone + Eq + Hash, E: ChannelEvent> History<I, E> {
    fn record(&mut self, id: &I, event: &E) {
        let events = self.events.entry(id.clone()).or_default();
        match events.last_mut() {
            Some(last) if last.is_progress() && event.is_progress() => *last = event.clone(),
            _ => events.push(event.clone()),
        }

        if event.is_terminal() {
            self.finished.push_back(id.clone());
            while self.finished.len() > self.retained {
                if let Some(old) = self.finished.pop_front() {
                    self.events.remove(&old);
                }
            }
        }
    }
}

struct ChannelInner<I, E> {
    tx: broadcast::Sender<Envelope<I, E>>,
    history: Mutex<History<I, E>>,
}

/// Ordered event stream shared by every operation of one kind.
pub struct EventChannel<I, E> {
    inner: Arc<ChannelInner<I, E>>,
}

impl<I, E> Clone for EventChannel<I, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, E> EventChannel<I, E>
where
    I: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    E: ChannelEvent,
{
    /// `capacity` sizes the live ring; `retained` is how many finished
    /// operations keep their history for late listeners.
    pub fn new(capacity: usize, retained: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(ChannelInner {
                tx,
                history: Mutex::new(History {
                    events: HashMap::new(),
                    finished: VecDeque::new(),
                    retained,
                }),
            }),
        }
    }

    /// Publish an event. Never blocks on listeners.
    pub fn publish(&self, id: I, event: E) {
        let mut history = self.history();
        history.record(&id, &event);
        // Sent under the history lock so `subscribe_to` sees every event
        // exactly once, either replayed or live.
        let _ = self.inner.tx.send(Envelope { id, event });
    }

    /// A listener for every operation, unbound.
    pub fn subscribe(&self) -> EventListener<I, E> {
        EventListener {
            rx: self.inner.tx.subscribe(),
            bound: None,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    /// A listener bound to `id` that first replays its retained history.
    pub fn subscribe_to(&self, id: I) -> EventListener<I, E> {
        let history = self.history();
        let rx = self.inner.tx.subscribe();
        let pending = history
            .events
            .get(&id)
            .into_iter()
            .flatten()
            .map(|event| Envelope {
                id: id.clone(),
                event: event.clone(),
            })
            .collect();

        EventListener {
            rx,
            bound: Some(id),
            pending,
            finished: false,
        }
    }

    /// Retained events of one operation.
    pub fn events_for(&self, id: &I) -> Vec<E> {
        self.history().events.get(id).cloned().unwrap_or_default()
    }

    /// Whether a terminal event has been published for `id`.
    pub fn is_finished(&self, id: &I) -> bool {
        self.history()
            .events
            .get(id)
            .and_then(|events| events.last())
            .is_some_and(ChannelEvent::is_terminal)
    }

    fn history(&self) -> MutexGuard<'_, History<I, E>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving end of an [`EventChannel`].
pub struct EventListener<I, E> {
    rx: broadcast::Receiver<Envelope<I, E>>,
    bound: Option<I>,
    pending: VecDeque<Envelope<I, E>>,
    finished: bool,
}

impl<I, E> EventListener<I, E>
where
    I: Clone + Eq + Debug + Send + Sync + 'static,
    E: ChannelEvent,
{
    /// Learn the operation id. Everything received so far is kept in
    /// order, minus envelopes for other ids; they are delivered before any
    /// live event.
    pub fn bind(&mut self, id: I) {
        self.drain_ready();
        self.pending.retain(|envelope| envelope.id == id);
        self.bound = Some(id);
    }

    /// The id this listener is bound to.
    pub fn bound(&self) -> Option<&I> {
        self.bound.as_ref()
    }

    /// Next event. A bound listener returns `None` after its operation's
    /// terminal event; an unbound one yields envelopes of every id.
    pub async fn recv(&mut self) -> Option<Envelope<I, E>> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(envelope) = self.pending.pop_front() {
                return Some(self.deliver(envelope));
            }
            match self.rx.recv().await {
                Ok(envelope) if self.accepts(&envelope) => return Some(self.deliver(envelope)),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, bound = ?self.bound, "Event listener lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Receive until the bound operation's terminal event and return it.
    pub async fn wait_terminal(&mut self) -> Option<E> {
        while let Some(envelope) = self.recv().await {
            if envelope.event.is_terminal() && self.bound.is_some() {
                return Some(envelope.event);
            }
        }
        None
    }

    fn accepts(&self, envelope: &Envelope<I, E>) -> bool {
        self.bound.as_ref().is_none_or(|id| *id == envelope.id)
    }

    fn deliver(&mut self, envelope: Envelope<I, E>) -> Envelope<I, E> {
        if self.bound.is_some() && envelope.event.is_terminal() {
            self.finished = true;
        }
        envelope
    }

    fn drain_ready(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => self.pending.push_back(envelope),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event listener lagged before bind");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ev {
        Progress(u64),
        Note(&'static str),
        Done,
    }

    impl ChannelEvent for Ev {
        fn is_terminal(&self) -> bool {
            matches!(self, Ev::Done)
        }

        fn is_progress(&self) -> bool {
            matches!(self, Ev::Progress(_))
        }
    }

    async fn collect(listener: &mut EventListener<u32, Ev>) -> Vec<Ev> {
        let mut out = Vec::new();
        while let Some(envelope) = listener.recv().await {
            out.push(envelope.event);
        }
        out
    }

    #[tokio::test]
    async fn test_bind_filters_buffered_events() {
        let channel = EventChannel::<u32, Ev>::new(16, 4);
        let mut listener = channel.subscribe();

        channel.publish(1, Ev::Progress(1));
        channel.publish(2, Ev::Progress(7));
        channel.publish(1, Ev::Note("a"));
        channel.publish(2, Ev::Done);
        channel.publish(1, Ev::Done);

        listener.bind(1);
        assert_eq!(
            collect(&mut listener).await,
            vec![Ev::Progress(1), Ev::Note("a"), Ev::Done]
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_history() {
        let channel = EventChannel::<u32, Ev>::new(16, 4);
        channel.publish(5, Ev::Progress(1));
        channel.publish(5, Ev::Progress(2));
        channel.publish(5, Ev::Done);

        let mut listener = channel.subscribe_to(5);
        // consecutive progress collapses to the latest
        assert_eq!(collect(&mut listener).await, vec![Ev::Progress(2), Ev::Done]);
        assert!(channel.is_finished(&5));
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let channel = EventChannel::<u32, Ev>::new(16, 4);
        channel.publish(3, Ev::Note("before"));

        let mut listener = channel.subscribe_to(3);
        channel.publish(4, Ev::Note("other"));
        channel.publish(3, Ev::Note("after"));
        channel.publish(3, Ev::Done);

        assert_eq!(
            collect(&mut listener).await,
            vec![Ev::Note("before"), Ev::Note("after"), Ev::Done]
        );
    }

    #[tokio::test]
    async fn test_history_eviction() {
        let channel = EventChannel::<u32, Ev>::new(16, 2);
        for id in 0..3 {
            channel.publish(id, Ev::Done);
        }
        assert!(channel.events_for(&0).is_empty());
        assert_eq!(channel.events_for(&2), vec![Ev::Done]);
    }

    #[tokio::test]
    async fn test_unbound_listener_sees_every_id() {
        let channel = EventChannel::<u32, Ev>::new(16, 2);
        let mut listener = channel.subscribe();
        channel.publish(1, Ev::Done);
        channel.publish(2, Ev::Done);

        assert_eq!(listener.recv().await.map(|e| e.id), Some(1));
        assert_eq!(listener.recv().await.map(|e| e.id), Some(2));
    }
}
