use crate::engine::feature::Feature;
use crate::engine::map::Map;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Nothing is animating or loading and the last change has been drawn
    Idle,
    /// A source finished receiving new data
    SourceData,
    /// A layer was added
    StyleData,
    MoveStart,
    Move,
    MoveEnd,
    MouseEnter,
    MouseLeave,
    MouseMove,
    Click,
}

#[derive(Clone, Debug)]
pub struct MapEvent {
    pub kind: EventKind,
    /// Set for layer-scoped pointer events
    pub layer: Option<String>,
    /// Set for `SourceData`
    pub source: Option<String>,
    /// Features under the pointer, topmost first
    pub features: Vec<Feature>,
    pub lnglat: Option<(f64, f64)>,
}

impl MapEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            layer: None,
            source: None,
            features: Vec::new(),
            lnglat: None,
        }
    }

    pub fn on_layer(kind: EventKind, layer: &str, features: Vec<Feature>, lnglat: (f64, f64)) -> Self {
        Self {
            kind,
            layer: Some(layer.to_string()),
            source: None,
            features,
            lnglat: Some(lnglat),
        }
    }

    pub fn source_data(source: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            ..Self::new(EventKind::SourceData)
        }
    }
}

/// Handle returned by `Map::on`/`Map::once`, needed to detach the listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Callback = Box<dyn FnMut(&mut Map, &MapEvent)>;

struct Registration {
    id: ListenerId,
    kind: EventKind,
    layer: Option<String>,
    once: bool,
    /// Taken out while the callback runs
    callback: Option<Callback>,
}

/// Listener registry. Callbacks receive `&mut Map`, so dispatch takes each
/// callback out of its slot for the duration of the call and puts it back
/// afterwards unless it was a one-shot or got removed meanwhile.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<Registration>,
}

impl Listeners {
    pub fn add(&mut self, kind: EventKind, layer: Option<&str>, once: bool, callback: Callback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Registration {
            id,
            kind,
            layer: layer.map(str::to_string),
            once,
            callback: Some(callback),
        });
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        before != self.entries.len()
    }

    /// Listeners for an event, in registration order
    pub fn matching(&self, kind: EventKind, layer: Option<&str>) -> Vec<ListenerId> {
        self.entries
            .iter()
            .filter(|r| r.kind == kind && r.layer.as_deref() == layer)
            .map(|r| r.id)
            .collect()
    }

    /// Take a callback out for invocation. One-shot registrations are removed here.
    pub fn take(&mut self, id: ListenerId) -> Option<Callback> {
        let pos = self.entries.iter().position(|r| r.id == id)?;
        if self.entries[pos].once {
            self.entries.remove(pos).callback
        } else {
            self.entries[pos].callback.take()
        }
    }

    /// Return a callback after invocation; dropped if the listener was removed
    pub fn restore(&mut self, id: ListenerId, callback: Callback) {
        if let Some(entry) = self.entries.iter_mut().find(|r| r.id == id) {
            entry.callback = Some(callback);
        }
    }

    pub fn count(&self, kind: EventKind, layer: Option<&str>) -> usize {
        self.entries
            .iter()
            .filter(|r| r.kind == kind && r.layer.as_deref() == layer)
            .count()
    }
}
