//! Per-event-type behaviour.
//!
//! The store never matches on event type strings directly. It asks the
//! registry, which maps a type tag to an [`EventTypeHandler`]; unknown types
//! fall through to a default handler. New types are added with
//! [`EventTypeRegistry::register`] without touching the store.

use roomline_protocol::{types, Event, EventValidationError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How an event type behaves inside the store.
pub trait EventTypeHandler: Send + Sync {
    /// Type tag this handler serves.
    fn event_type(&self) -> &str;

    /// Whether the event counts toward unread counts and `last_message`.
    fn is_countable(&self) -> bool {
        false
    }

    /// Content keys that survive redaction.
    fn preserved_keys(&self) -> &[&'static str] {
        &[]
    }

    /// Type-specific checks run before an event is stored.
    fn validate(&self, _event: &Event) -> Result<(), EventValidationError> {
        Ok(())
    }
}

/// Table-driven handler covering the built-in types.
#[derive(Debug, Clone)]
struct BuiltinHandler {
    event_type: &'static str,
    countable: bool,
    preserved: &'static [&'static str],
    requires_state_key: bool,
}

impl EventTypeHandler for BuiltinHandler {
    fn event_type(&self) -> &str {
        self.event_type
    }

    fn is_countable(&self) -> bool {
        self.countable
    }

    fn preserved_keys(&self) -> &[&'static str] {
        self.preserved
    }

    fn validate(&self, event: &Event) -> Result<(), EventValidationError> {
        if self.requires_state_key && event.state_key.is_none() {
            return Err(EventValidationError::MissingField("state_key"));
        }
        Ok(())
    }
}

/// Membership events must say which membership they set.
struct MemberHandler;

impl EventTypeHandler for MemberHandler {
    fn event_type(&self) -> &str {
        types::ROOM_MEMBER
    }

    fn preserved_keys(&self) -> &[&'static str] {
        &["membership", "join_authorised_via_users_server"]
    }

    fn validate(&self, event: &Event) -> Result<(), EventValidationError> {
        if event.state_key.is_none() {
            return Err(EventValidationError::MissingField("state_key"));
        }
        match event.content.get("membership").and_then(|m| m.as_str()) {
            Some(_) => Ok(()),
            None => Err(EventValidationError::MissingField("membership")),
        }
    }
}

struct FallbackHandler;

impl EventTypeHandler for FallbackHandler {
    fn event_type(&self) -> &str {
        "*"
    }
}

/// Lookup table from type tag to handler.
#[derive(Clone)]
pub struct EventTypeRegistry {
    handlers: HashMap<String, Arc<dyn EventTypeHandler>>,
    fallback: Arc<dyn EventTypeHandler>,
}

impl EventTypeRegistry {
    /// A registry with no handlers besides the fallback.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(FallbackHandler),
        }
    }

    /// Adds or replaces the handler for its type.
    pub fn register(&mut self, handler: Arc<dyn EventTypeHandler>) {
        self.handlers
            .insert(handler.event_type().to_string(), handler);
    }

    /// Handler for `event_type`, or the fallback.
    pub fn handler(&self, event_type: &str) -> &dyn EventTypeHandler {
        self.handlers
            .get(event_type)
            .map_or(self.fallback.as_ref(), |h| h.as_ref())
    }

    /// True when a dedicated handler exists.
    pub fn is_registered(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Runs envelope and type-specific validation.
    pub fn validate(&self, event: &Event) -> Result<(), EventValidationError> {
        event.validate()?;
        self.handler(&event.event_type).validate(event)
    }
}

impl Default for EventTypeRegistry {
    fn default() -> Self {
        let builtins = [
            BuiltinHandler {
                event_type: types::ROOM_MESSAGE,
                countable: true,
                preserved: &[],
                requires_state_key: false,
            },
            BuiltinHandler {
                event_type: types::ROOM_ENCRYPTED,
                countable: false,
                preserved: &[],
                requires_state_key: false,
            },
            BuiltinHandler {
                event_type: types::ROOM_ENCRYPTION,
                countable: false,
                preserved: &["algorithm"],
                requires_state_key: true,
            },
            BuiltinHandler {
                event_type: types::ROOM_NAME,
                countable: false,
                preserved: &[],
                requires_state_key: true,
            },
            BuiltinHandler {
                event_type: types::ROOM_CREATE,
                countable: false,
                preserved: &["creator", "room_version"],
                requires_state_key: true,
            },
            BuiltinHandler {
                event_type: types::ROOM_REDACTION,
                countable: false,
                preserved: &["redacts"],
                requires_state_key: false,
            },
            BuiltinHandler {
                event_type: types::REACTION,
                countable: false,
                preserved: &[],
                requires_state_key: false,
            },
        ];

        let mut registry = Self::empty();
        for handler in builtins {
            registry.register(Arc::new(handler));
        }
        registry.register(Arc::new(MemberHandler));
        registry
    }
}

impl fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("EventTypeRegistry")
            .field("types", &types)
            .finish()
    }
}
