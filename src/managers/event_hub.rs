// EventHub: per-instance event subscription points
// Single Responsibility: fan out engine events to subscribers and listeners

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::engine::transport::PlayerState;
use crate::model::MixerDeviceList;
use crate::recorder::RecorderState;

/// Everything the engine reports to its caller.
///
/// All events are published from the control worker thread; none originate
/// on an audio callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum PlayerEvent {
    State(PlayerState),
    /// Fraction of the session duration, 0..1
    Progress(f64),
    Error { code: i32, message: String },
    RecorderState(RecorderState),
    /// Elapsed recording time in seconds
    RecorderProgress(f64),
    /// Peak input level, 0..1
    RecorderLevel(f32),
    DeviceList(MixerDeviceList),
    Export { path: String, error: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    State,
    Progress,
    Error,
    RecorderState,
    RecorderProgress,
    RecorderLevel,
    DeviceList,
    Export,
}

impl PlayerEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            PlayerEvent::State(_) => EventCategory::State,
            PlayerEvent::Progress(_) => EventCategory::Progress,
            PlayerEvent::Error { .. } => EventCategory::Error,
            PlayerEvent::RecorderState(_) => EventCategory::RecorderState,
            PlayerEvent::RecorderProgress(_) => EventCategory::RecorderProgress,
            PlayerEvent::RecorderLevel(_) => EventCategory::RecorderLevel,
            PlayerEvent::DeviceList(_) => EventCategory::DeviceList,
            PlayerEvent::Export { .. } => EventCategory::Export,
        }
    }
}

pub type ListenerFn = dyn Fn(&PlayerEvent) + Send + Sync;

struct Listener {
    id: u64,
    filter: Option<EventCategory>,
    callback: Arc<ListenerFn>,
}

/// Per-category broadcast channels plus synchronous listeners.
///
/// Broadcast receivers suit async consumers; listeners suit the C bridge,
/// which forwards each event to a function pointer. Listener callbacks run
/// without any hub lock held, so a callback may add or remove listeners.
pub struct EventHub {
    state: broadcast::Sender<PlayerState>,
    progress: broadcast::Sender<f64>,
    error: broadcast::Sender<(i32, String)>,
    recorder_state: broadcast::Sender<RecorderState>,
    recorder_progress: broadcast::Sender<f64>,
    recorder_level: broadcast::Sender<f32>,
    device_list: broadcast::Sender<MixerDeviceList>,
    export: broadcast::Sender<(String, Option<String>)>,
    all: broadcast::Sender<PlayerEvent>,
    listeners: Mutex<Arc<Vec<Listener>>>,
    next_listener: AtomicU64,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: broadcast::channel(capacity).0,
            progress: broadcast::channel(capacity).0,
            error: broadcast::channel(capacity).0,
            recorder_state: broadcast::channel(capacity).0,
            recorder_progress: broadcast::channel(capacity).0,
            recorder_level: broadcast::channel(capacity).0,
            device_list: broadcast::channel(capacity).0,
            export: broadcast::channel(capacity).0,
            all: broadcast::channel(capacity).0,
            listeners: Mutex::new(Arc::new(Vec::new())),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Deliver an event to every subscriber of its category.
    ///
    /// Sending to a channel without receivers is not an error.
    pub fn publish(&self, event: PlayerEvent) {
        match &event {
            PlayerEvent::State(s) => {
                let _ = self.state.send(*s);
            }
            PlayerEvent::Progress(p) => {
                let _ = self.progress.send(*p);
            }
            PlayerEvent::Error { code, message } => {
                let _ = self.error.send((*code, message.clone()));
            }
            PlayerEvent::RecorderState(s) => {
                let _ = self.recorder_state.send(*s);
            }
            PlayerEvent::RecorderProgress(p) => {
                let _ = self.recorder_progress.send(*p);
            }
            PlayerEvent::RecorderLevel(l) => {
                let _ = self.recorder_level.send(*l);
            }
            PlayerEvent::DeviceList(list) => {
                let _ = self.device_list.send(list.clone());
            }
            PlayerEvent::Export { path, error } => {
                let _ = self.export.send((path.clone(), error.clone()));
            }
        }

        let listeners = match self.listeners.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        let category = event.category();
        for listener in listeners.iter() {
            if listener.filter.map_or(true, |f| f == category) {
                (listener.callback)(&event);
            }
        }

        let _ = self.all.send(event);
    }

    /// Register a callback for one category, or all when `filter` is `None`.
    pub fn add_listener(
        &self,
        filter: Option<EventCategory>,
        callback: Arc<ListenerFn>,
    ) -> u64 {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.update_listeners(|list| {
            list.push(Listener {
                id,
                filter,
                callback: Arc::clone(&callback),
            })
        });
        id
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        let mut removed = false;
        self.update_listeners(|list| {
            let before = list.len();
            list.retain(|l| l.id != id);
            removed = list.len() != before;
        });
        removed
    }

    pub fn clear_listeners(&self) {
        self.update_listeners(|list| list.clear());
    }

    // Copy-on-write so publish never holds the lock while calling out.
    fn update_listeners<F: FnMut(&mut Vec<Listener>)>(&self, mut f: F) {
        let mut guard = match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next: Vec<Listener> = guard
            .iter()
            .map(|l| Listener {
                id: l.id,
                filter: l.filter,
                callback: Arc::clone(&l.callback),
            })
            .collect();
        f(&mut next);
        *guard = Arc::new(next);
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<PlayerState> {
        self.state.subscribe()
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<f64> {
        self.progress.subscribe()
    }

    pub fn subscribe_error(&self) -> broadcast::Receiver<(i32, String)> {
        self.error.subscribe()
    }

    pub fn subscribe_recorder_state(&self) -> broadcast::Receiver<RecorderState> {
        self.recorder_state.subscribe()
    }

    pub fn subscribe_recorder_progress(&self) -> broadcast::Receiver<f64> {
        self.recorder_progress.subscribe()
    }

    pub fn subscribe_recorder_level(&self) -> broadcast::Receiver<f32> {
        self.recorder_level.subscribe()
    }

    pub fn subscribe_device_list(&self) -> broadcast::Receiver<MixerDeviceList> {
        self.device_list.subscribe()
    }

    pub fn subscribe_export(&self) -> broadcast::Receiver<(String, Option<String>)> {
        self.export.subscribe()
    }

    /// Every event in publication order.
    pub fn subscribe_all(&self) -> broadcast::Receiver<PlayerEvent> {
        self.all.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_channel_multiple_subscribers() {
        let hub = EventHub::default();
        let mut rx1 = hub.subscribe_state();
        let mut rx2 = hub.subscribe_state();

        hub.publish(PlayerEvent::State(PlayerState::Ready));

        assert_eq!(rx1.try_recv().unwrap(), PlayerState::Ready);
        assert_eq!(rx2.try_recv().unwrap(), PlayerState::Ready);
    }

    #[test]
    fn test_categories_are_separate() {
        let hub = EventHub::default();
        let mut progress = hub.subscribe_progress();
        let mut state = hub.subscribe_state();

        hub.publish(PlayerEvent::Progress(0.5));

        assert_eq!(progress.try_recv().unwrap(), 0.5);
        assert!(state.try_recv().is_err());
    }

    #[test]
    fn test_filtered_listener() {
        let hub = EventHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.add_listener(
            Some(EventCategory::Error),
            Arc::new(move |e: &PlayerEvent| sink.lock().unwrap().push(e.clone())),
        );

        hub.publish(PlayerEvent::State(PlayerState::Playing));
        hub.publish(PlayerEvent::Error {
            code: 2001,
            message: "bad".to_string(),
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].category(), EventCategory::Error);
    }

    #[test]
    fn test_listener_can_remove_itself() {
        let hub = Arc::new(EventHub::default());
        let calls = Arc::new(AtomicU64::new(0));
        let id_slot = Arc::new(AtomicU64::new(0));

        let hub_ref = Arc::clone(&hub);
        let counter = Arc::clone(&calls);
        let slot = Arc::clone(&id_slot);
        let id = hub.add_listener(
            None,
            Arc::new(move |_: &PlayerEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
                hub_ref.remove_listener(slot.load(Ordering::SeqCst));
            }),
        );
        id_slot.store(id, Ordering::SeqCst);

        hub.publish(PlayerEvent::Progress(0.1));
        hub.publish(PlayerEvent::Progress(0.2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // the listener captured the hub; drop the cycle
        hub.clear_listeners();
    }

    #[test]
    fn test_subscribe_all_keeps_order() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe_all();
        hub.publish(PlayerEvent::State(PlayerState::Playing));
        hub.publish(PlayerEvent::Progress(1.0));
        hub.publish(PlayerEvent::State(PlayerState::Completed));

        assert_eq!(rx.try_recv().unwrap(), PlayerEvent::State(PlayerState::Playing));
        assert_eq!(rx.try_recv().unwrap(), PlayerEvent::Progress(1.0));
        assert_eq!(
            rx.try_recv().unwrap(),
            PlayerEvent::State(PlayerState::Completed)
        );
    }
}
