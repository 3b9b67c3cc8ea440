//! In-memory remap rules consulted by event processing.
//!
//! [`EventManipulator`] is the authoritative copy of the three rule tables,
//! the last pushed [`SystemPreferencesValues`] and whether an event
//! dispatcher is attached.  It is only mutated through the explicit
//! operations below; the receiver calls them in response to protocol
//! messages and the daemon seeds them from a [`ProfileStore`] at startup.

use crate::key_code::KeyCode;
use crate::profile::ProfileStore;
use crate::protocol::SystemPreferencesValues;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// Handle shared between the receiver thread and event processing.
pub type SharedManipulator = Arc<Mutex<EventManipulator>>;

/// Ordered `(from, to)` remap pairs.
///
/// Both keys are [`KeyCode`]s, so only names that resolved against the
/// vocabulary can ever be inserted.  Lookup returns the first pair whose
/// `from` matches, i.e. insertion order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    pairs: Vec<(KeyCode, KeyCode)>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }

    pub fn push(&mut self, from: KeyCode, to: KeyCode) {
        self.pairs.push((from, to));
    }

    pub fn lookup(&self, from: KeyCode) -> Option<KeyCode> {
        self.pairs.iter().find(|(f, _)| *f == from).map(|&(_, to)| to)
    }

    pub fn pairs(&self) -> &[(KeyCode, KeyCode)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<(KeyCode, KeyCode)> for RuleTable {
    fn from_iter<I: IntoIterator<Item = (KeyCode, KeyCode)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Remap rule engine state.
#[derive(Debug, Default)]
pub struct EventManipulator {
    simple_modifications: RuleTable,
    fn_function_keys: RuleTable,
    standalone_modifiers: RuleTable,
    system_preferences: Option<SystemPreferencesValues>,
    event_dispatcher_connected: bool,
}

impl EventManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in the handle the receiver expects.
    pub fn shared(self) -> SharedManipulator {
        Arc::new(Mutex::new(self))
    }

    /// Record that an event dispatcher is attached.  Remapped events have
    /// somewhere to go from now on.
    pub fn attach_event_dispatcher(&mut self) {
        if !self.event_dispatcher_connected {
            info!("event dispatcher attached");
        }
        self.event_dispatcher_connected = true;
    }

    pub fn is_event_dispatcher_connected(&self) -> bool {
        self.event_dispatcher_connected
    }

    pub fn set_system_preferences_values(&mut self, values: SystemPreferencesValues) {
        self.system_preferences = Some(values);
    }

    /// Last pushed preference values, `None` until the first push.
    pub fn system_preferences_values(&self) -> Option<SystemPreferencesValues> {
        self.system_preferences
    }

    //  Simple modifications

    pub fn clear_simple_modifications(&mut self) {
        self.simple_modifications.clear();
    }

    pub fn add_simple_modification(&mut self, from: KeyCode, to: KeyCode) {
        debug!("simple_modification {} -> {}", from, to);
        self.simple_modifications.push(from, to);
    }

    pub fn simple_modifications(&self) -> &RuleTable {
        &self.simple_modifications
    }

    pub fn simple_modification_for(&self, from: KeyCode) -> Option<KeyCode> {
        self.simple_modifications.lookup(from)
    }

    //  Fn function keys

    pub fn clear_fn_function_keys(&mut self) {
        self.fn_function_keys.clear();
    }

    pub fn add_fn_function_key(&mut self, from: KeyCode, to: KeyCode) {
        debug!("fn_function_key {} -> {}", from, to);
        self.fn_function_keys.push(from, to);
    }

    pub fn fn_function_keys(&self) -> &RuleTable {
        &self.fn_function_keys
    }

    pub fn fn_function_key_for(&self, from: KeyCode) -> Option<KeyCode> {
        self.fn_function_keys.lookup(from)
    }

    //  Standalone modifiers

    pub fn clear_standalone_modifiers(&mut self) {
        self.standalone_modifiers.clear();
    }

    pub fn add_standalone_modifier(&mut self, from: KeyCode, to: KeyCode) {
        debug!("standalone_modifier {} -> {}", from, to);
        self.standalone_modifiers.push(from, to);
    }

    pub fn standalone_modifiers(&self) -> &RuleTable {
        &self.standalone_modifiers
    }

    pub fn standalone_modifier_for(&self, from: KeyCode) -> Option<KeyCode> {
        self.standalone_modifiers.lookup(from)
    }

    /// Empty all three tables.
    pub fn clear_all(&mut self) {
        self.clear_simple_modifications();
        self.clear_fn_function_keys();
        self.clear_standalone_modifiers();
    }

    /// Replace all three tables with the selected profile of `store`.
    ///
    /// Key names are resolved the same way the store resolves them, so an
    /// unknown name is logged and skipped here too.
    pub fn load_profile(&mut self, store: &ProfileStore) {
        self.simple_modifications = store.current_simple_modifications().into_iter().collect();
        self.fn_function_keys = store.current_fn_function_keys().into_iter().collect();
        self.standalone_modifiers = store.current_standalone_modifiers().into_iter().collect();
        info!(
            "loaded rules from {}: {} simple, {} fn, {} standalone",
            store.path().display(),
            self.simple_modifications.len(),
            self.fn_function_keys.len(),
            self.standalone_modifiers.len()
        );
    }
}
