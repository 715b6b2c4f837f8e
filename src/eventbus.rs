use std::collections::HashMap;

use crate::event::{DeviceEvent, DeviceEventKind};

/// Trait for reacting to device arrivals and removals.
pub trait DeviceListener: Send {
    fn on_device(&mut self, event: &DeviceEvent);
}

/// Determines which kinds of events a listener wants to receive.
#[derive(Debug, Clone, Copy)]
pub enum EventFilter {
    All,
    ArrivalsOnly,
    RemovalsOnly,
    Custom(fn(&DeviceEvent) -> bool),
}

impl EventFilter {
    fn accepts(&self, event: &DeviceEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::ArrivalsOnly => event.kind == DeviceEventKind::Arrived,
            EventFilter::RemovalsOnly => event.kind == DeviceEventKind::Removed,
            EventFilter::Custom(f) => f(event),
        }
    }
}

/// Metadata-wrapped listener with filters and control flags.
struct ListenerEntry {
    listener: Box<dyn DeviceListener>,
    enabled: bool,
    filter: EventFilter,
    tag: Option<String>, // Device path this listener is restricted to
}

#[derive(Default)]
pub struct DeviceEventBus {
    next_id: u64,
    listeners: HashMap<u64, ListenerEntry>,
}

impl DeviceEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener with optional filtering and device tag.
    pub fn add_listener(
        &mut self,
        listener: impl DeviceListener + 'static,
        filter: EventFilter,
        tag: Option<String>,
    ) -> u64 {
        let id = self.next_id;
        self.listeners.insert(
            id,
            ListenerEntry {
                listener: Box::new(listener),
                enabled: true,
                filter,
                tag,
            },
        );
        self.next_id += 1;
        id
    }

    /// Enables a previously registered listener.
    pub fn enable(&mut self, id: u64) {
        if let Some(entry) = self.listeners.get_mut(&id) {
            entry.enabled = true;
        }
    }

    /// Disables (mutes) a listener without removing it.
    pub fn disable(&mut self, id: u64) {
        if let Some(entry) = self.listeners.get_mut(&id) {
            entry.enabled = false;
        }
    }

    /// Unregisters a listener entirely.
    pub fn remove_listener(&mut self, id: u64) {
        self.listeners.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn emit(&mut self, event: &DeviceEvent) {
        for entry in self.listeners.values_mut() {
            if !entry.enabled {
                continue;
            }
            if let Some(ref wanted) = entry.tag {
                if event.path() != wanted {
                    continue;
                }
            }
            if entry.filter.accepts(event) {
                entry.listener.on_device(event);
            }
        }
    }

    /// Emits a batch of events to matching listeners, in order.
    pub fn emit_all(&mut self, events: &[DeviceEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use std::sync::{Arc, Mutex};

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl DeviceListener for Collect {
        fn on_device(&mut self, event: &DeviceEvent) {
            self.0.lock().unwrap().push(format!("{}:{}", event.kind, event.path()));
        }
    }

    fn desc(path: &str) -> Arc<DeviceDescriptor> {
        Arc::new(DeviceDescriptor {
            path: path.into(),
            ..DeviceDescriptor::default()
        })
    }

    #[test]
    fn filters_tags_and_muting() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = DeviceEventBus::new();
        let all = bus.add_listener(Collect(seen.clone()), EventFilter::All, None);
        bus.add_listener(Collect(seen.clone()), EventFilter::RemovalsOnly, None);
        bus.add_listener(Collect(seen.clone()), EventFilter::All, Some("b".into()));

        bus.emit_all(&[DeviceEvent::arrived(desc("a")), DeviceEvent::removed(desc("b"))]);
        assert_eq!(
            seen.lock().unwrap().len(),
            4,
            "a: all; b: all + removals + tagged"
        );

        seen.lock().unwrap().clear();
        bus.disable(all);
        bus.emit_all(&[DeviceEvent::arrived(desc("a"))]);
        assert!(seen.lock().unwrap().is_empty());

        bus.enable(all);
        bus.remove_listener(all);
        bus.emit_all(&[DeviceEvent::arrived(desc("a"))]);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn custom_filter() {
        fn only_c(e: &DeviceEvent) -> bool {
            e.path().starts_with('c')
        }
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = DeviceEventBus::new();
        bus.add_listener(Collect(seen.clone()), EventFilter::Custom(only_c), None);
        bus.emit_all(&[DeviceEvent::arrived(desc("a")), DeviceEvent::arrived(desc("c1"))]);
        assert_eq!(*seen.lock().unwrap(), vec!["arrived:c1".to_string()]);
    }
}
