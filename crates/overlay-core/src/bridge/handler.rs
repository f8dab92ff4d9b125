use super::protocol::{ACTIONS, Command, Event, ItemView, item_views};
use crate::core::scene::SceneBackend;
use crate::engine::error::EngineError;
use crate::engine::lifecycle::{MapRequest, StructureRequest, Viewer};
use crate::engine::notify::Subscription;
use crate::engine::source::SourceProvider;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, warn};

/// Action reported in `error` events when the command had no readable tag.
pub const UNKNOWN_ACTION: &str = "unknown";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Viewer is not initialized; wait for the ready event before sending commands")]
    NotInitialized,
    #[error("Unknown action '{0}'")]
    UnknownAction(String),
    #[error("Command has no string 'action' field")]
    MissingAction,
    #[error("Malformed '{action}' command: {message}")]
    Malformed { action: String, message: String },
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl BridgeError {
    /// The action an `error` event for this failure should name, when known.
    pub fn action(&self) -> Option<&str> {
        match self {
            BridgeError::UnknownAction(action) | BridgeError::Malformed { action, .. } => {
                Some(action.as_str())
            }
            _ => None,
        }
    }
}

pub type EventCallback = Rc<dyn Fn(Event)>;

/// Delivers events to the host, or drops them when no callback is installed.
#[derive(Clone, Default)]
pub struct EventEmitter {
    callback: Option<EventCallback>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: impl Fn(Event) + 'static) -> Self {
        Self {
            callback: Some(Rc::new(callback)),
        }
    }

    #[inline]
    pub fn emit(&self, event: Event) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

/// Decodes one JSON command, distinguishing unknown actions from malformed
/// payloads of known ones.
pub fn decode_command(message: &str) -> Result<Command, BridgeError> {
    let value: Value = serde_json::from_str(message)?;
    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(BridgeError::MissingAction)?
        .to_string();
    if !ACTIONS.contains(&action.as_str()) {
        return Err(BridgeError::UnknownAction(action));
    }
    serde_json::from_value(value).map_err(|e| BridgeError::Malformed {
        action,
        message: e.to_string(),
    })
}

/// Dispatches host commands to a [`Viewer`] and reports results as events.
///
/// `start` must be called once before commands are accepted; it emits `ready`
/// and installs the passive `itemsChanged` subscription.
pub struct BridgeHandler<P: SourceProvider, B: SceneBackend> {
    viewer: Rc<Viewer<P, B>>,
    emitter: EventEmitter,
    ready: Cell<bool>,
    subscription: RefCell<Option<Subscription>>,
}

impl<P: SourceProvider, B: SceneBackend> BridgeHandler<P, B> {
    pub fn new(viewer: Rc<Viewer<P, B>>, emitter: EventEmitter) -> Self {
        Self {
            viewer,
            emitter,
            ready: Cell::new(false),
            subscription: RefCell::new(None),
        }
    }

    pub fn viewer(&self) -> &Rc<Viewer<P, B>> {
        &self.viewer
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// Emits `ready` and starts forwarding registry snapshots. Later calls do nothing.
    pub fn start(&self) {
        if self.ready.replace(true) {
            return;
        }
        let emitter = self.emitter.clone();
        let subscription = self.viewer.subscribe(move |items| {
            emitter.emit(Event::ItemsChanged {
                items: item_views(items),
            })
        });
        *self.subscription.borrow_mut() = Some(subscription);
        self.emitter.emit(Event::Ready);
    }

    /// Decodes and handles one JSON message.
    pub async fn handle_message(&self, message: &str) {
        match decode_command(message) {
            Ok(command) => self.handle(command).await,
            Err(err) => {
                let action = err.action().unwrap_or(UNKNOWN_ACTION).to_string();
                self.report(action, &err);
            }
        }
    }

    /// Runs one command. Failures become a single `error` event.
    pub async fn handle(&self, command: Command) {
        let action = command.action();
        debug!(action, "Handling command");
        match self.dispatch(command).await {
            Ok(Some(event)) => self.emitter.emit(event),
            Ok(None) => {}
            Err(err) => self.report(action.to_string(), &err),
        }
    }

    fn report(&self, action: String, err: &BridgeError) {
        warn!(action = %action, error = %err, "Command failed");
        self.emitter.emit(Event::Error {
            action,
            message: err.to_string(),
        });
    }

    async fn dispatch(&self, command: Command) -> Result<Option<Event>, BridgeError> {
        if !self.ready.get() {
            return Err(BridgeError::NotInitialized);
        }
        let viewer = &self.viewer;
        let event = match command {
            Command::LoadStructure { pdb_id } => {
                let item = viewer
                    .load_structure(StructureRequest::Pdb { pdb_id })
                    .await?;
                Some(Event::StructureLoaded {
                    item: ItemView::from(&item),
                })
            }
            Command::LoadStructureFromSource { url, format } => {
                let item = viewer
                    .load_structure(StructureRequest::Url { url, format })
                    .await?;
                Some(Event::StructureLoaded {
                    item: ItemView::from(&item),
                })
            }
            Command::LoadEmdbMap { emdb_id, iso_value } => {
                let item = viewer
                    .load_map(MapRequest::Emdb { emdb_id, iso_value })
                    .await?;
                Some(Event::MapLoaded {
                    item: ItemView::from(&item),
                })
            }
            Command::LoadVolumeFromSource { url, iso_value } => {
                let item = viewer.load_map(MapRequest::Url { url, iso_value }).await?;
                Some(Event::MapLoaded {
                    item: ItemView::from(&item),
                })
            }
            Command::SetVisibility { item_id, visible } => {
                viewer.set_visibility(&item_id, visible)?;
                None
            }
            Command::SetColor { item_id, color } => {
                viewer.set_color(&item_id, color)?;
                None
            }
            Command::SetIsoValue { item_id, iso_value } => {
                viewer.set_iso_value(&item_id, iso_value)?;
                None
            }
            Command::DeleteItem { item_id } => {
                viewer.delete(&item_id)?;
                None
            }
            Command::Clear => {
                viewer.clear();
                None
            }
            Command::GetItems => Some(Event::ItemsChanged {
                items: item_views(&viewer.items()),
            }),
        };
        Ok(event)
    }
}
