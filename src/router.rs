//! Action routing for JSON envelopes.
//!
//! Every application message is an [`Envelope`]:
//!
//! ```json
//! {"action": "sms_code", "data": {"phone": "13800000000"}}
//! ```
//!
//! The [`Router`] decodes the envelope and hands the undecoded `data` bytes
//! to the handler registered for `action`.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

/// Wire format of an application message.
///
/// `data` is kept as raw JSON so handlers decode it into whatever shape
/// their action expects. A missing `data` field reads as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default = "null_data")]
    pub data: Box<RawValue>,
}

fn null_data() -> Box<RawValue> {
    RawValue::NULL.to_owned()
}

impl Envelope {
    /// Build an envelope by serializing `data`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if `data` cannot be represented as JSON.
    pub fn new<T: Serialize + ?Sized>(action: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self {
            action: action.into(),
            data: serde_json::value::to_raw_value(data)?,
        })
    }

    /// Build an envelope around JSON text that is already encoded.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` if `raw` is not valid JSON.
    pub fn from_raw(action: impl Into<String>, raw: impl Into<String>) -> Result<Self> {
        Ok(Self {
            action: action.into(),
            data: RawValue::from_string(raw.into())?,
        })
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The `data` field exactly as it appeared on the wire.
    #[must_use]
    pub fn data_bytes(&self) -> &[u8] {
        self.data.get().as_bytes()
    }

    /// Decode `data` into a concrete type.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(self.data.get())?)
    }
}

type Handler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Table of action handlers.
///
/// Registering an action that already has a handler replaces it. Handlers
/// run on the caller's task, outside the table lock, so a handler may
/// register or remove routes itself.
#[derive(Default)]
pub struct Router {
    routes: RwLock<HashMap<String, Handler>>,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_route<F>(&self, action: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let action = action.into();
        if self.routes.write().insert(action.clone(), Arc::new(handler)).is_some() {
            debug!(action, "route replaced");
        }
    }

    /// Returns `true` if a handler was removed.
    pub fn remove_route(&self, action: &str) -> bool {
        self.routes.write().remove(action).is_some()
    }

    #[must_use]
    pub fn has_route(&self, action: &str) -> bool {
        self.routes.read().contains_key(action)
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Decode `raw` and run the matching handler.
    ///
    /// A handler that panics is logged and treated as handled.
    ///
    /// # Errors
    ///
    /// - `Error::Decode` if `raw` is not an envelope
    /// - `Error::UnroutedAction` if no handler is registered for the action
    pub fn dispatch(&self, raw: &[u8]) -> Result<()> {
        let envelope = Envelope::decode(raw)?;
        let handler = self
            .routes
            .read()
            .get(&envelope.action)
            .cloned()
            .ok_or_else(|| Error::UnroutedAction(envelope.action.clone()))?;

        if catch_unwind(AssertUnwindSafe(|| handler(envelope.data_bytes()))).is_err() {
            error!(action = %envelope.action, "route handler panicked");
        }
        Ok(())
    }

    /// Route one inbound message. Failures are logged and the message dropped.
    pub fn handle_message(&self, raw: &[u8]) {
        match self.dispatch(raw) {
            Ok(()) => {}
            Err(Error::UnroutedAction(action)) => {
                warn!(action, "no route for action, message dropped");
            }
            Err(e) => warn!(error = %e, "undecodable message dropped"),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.routes.read();
        let mut actions: Vec<&String> = routes.keys().collect();
        actions.sort();
        f.debug_struct("Router").field("routes", &actions).finish()
    }
}
