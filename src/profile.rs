//! Persisted remap profiles.
//!
//! The document lives at `$XDG_CONFIG_HOME/keygrabd/keygrabd.json` and is
//! edited by the user (or a preferences front end).  The daemon only reads
//! the selected profile; it never creates profiles.
//!
//! # Example
//!
//! ```json
//! {
//!     "profiles": [
//!         {
//!             "name": "Default profile",
//!             "selected": true,
//!             "simple_modifications": {
//!                 "caps_lock": "delete_or_backspace",
//!                 "escape": "spacebar"
//!             },
//!             "fn_function_keys": {
//!                 "f1": "vk_consumer_brightness_down",
//!                 "f2": "vk_consumer_brightness_up"
//!             }
//!         },
//!         {
//!             "name": "Empty",
//!             "selected": false
//!         }
//!     ]
//! }
//! ```
//!
//! # Saving
//!
//! Profile entries that are not objects are skipped when choosing the
//! selected profile, but they stay in the document.
//!
//! [`ProfileStore::save`] rewrites the whole file from the in-memory
//! document.  Edits made to the file after it was loaded are **not**
//! merged: the last writer wins.  If the user is halfway through editing
//! the file in an editor, a save discards their edit.  Call it only when
//! the in-memory document really has to reach disk.

use crate::config::config_dir;
use crate::key_code::{resolve_pair, KeyCode};
use indexmap::IndexMap;
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// File name of the profile document inside [`config_dir`].
pub const PROFILE_FILE_NAME: &str = "keygrabd.json";

/// Name of the profile synthesized when nothing is selected.
pub const DEFAULT_PROFILE_NAME: &str = "Default profile";

/// The fn-key table of the synthesized default profile.
pub const DEFAULT_FN_FUNCTION_KEYS: [(&str, &str); 12] = [
    ("f1", "vk_consumer_brightness_down"),
    ("f2", "vk_consumer_brightness_up"),
    ("f3", "vk_mission_control"),
    ("f4", "vk_launchpad"),
    ("f5", "vk_consumer_illumination_down"),
    ("f6", "vk_consumer_illumination_up"),
    ("f7", "vk_consumer_previous"),
    ("f8", "vk_consumer_play"),
    ("f9", "vk_consumer_next"),
    ("f10", "mute"),
    ("f11", "volume_down"),
    ("f12", "volume_up"),
];

/// Errors from reading or writing the profile document.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize profiles: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A named, selectable set of remap tables.
///
/// Decoded from one entry of the document's `profiles` list.  A `name` or
/// `selected` of the wrong type reads as empty / `false` rather than
/// rejecting the entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple_modifications: Option<RuleMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fn_function_keys: Option<RuleMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone_modifiers: Option<RuleMap>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deserialize `T`, or fall back to its default when the value has the
/// wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// A rule table as written in the document: key name to key name, in file
/// order.
///
/// A table that is not an object is kept as `Malformed` and contributes no
/// rules.  Inside an object, entries whose value is not a string are
/// skipped one by one when the pairs are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleMap {
    Keys(IndexMap<String, Value>),
    Malformed(Value),
}

impl RuleMap {
    pub fn keys(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            RuleMap::Keys(map) => Some(map),
            RuleMap::Malformed(_) => None,
        }
    }
}

impl Profile {
    fn table(&self, which: Table) -> Option<&RuleMap> {
        match which {
            Table::SimpleModifications => self.simple_modifications.as_ref(),
            Table::FnFunctionKeys => self.fn_function_keys.as_ref(),
            Table::StandaloneModifiers => self.standalone_modifiers.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Table {
    SimpleModifications,
    FnFunctionKeys,
    StandaloneModifiers,
}

impl Table {
    fn key(self) -> &'static str {
        match self {
            Table::SimpleModifications => "simple_modifications",
            Table::FnFunctionKeys => "fn_function_keys",
            Table::StandaloneModifiers => "standalone_modifiers",
        }
    }
}

/// The profile used when the document is missing, broken, or has nothing
/// selected.  It is never written to disk on its own.
pub fn default_profile() -> Profile {
    let fn_keys = DEFAULT_FN_FUNCTION_KEYS
        .iter()
        .map(|&(from, to)| (from.to_string(), Value::String(to.to_string())))
        .collect();
    Profile {
        name: DEFAULT_PROFILE_NAME.to_string(),
        selected: true,
        simple_modifications: Some(RuleMap::Keys(IndexMap::new())),
        fn_function_keys: Some(RuleMap::Keys(fn_keys)),
        standalone_modifiers: None,
        extra: Map::new(),
    }
}

/// Canonical path of the per-user profile document.
pub fn default_profile_path() -> PathBuf {
    config_dir().join(PROFILE_FILE_NAME)
}

/// Loads, holds and saves the profile document.
///
/// The document is kept as read; [`profiles`](Self::profiles) is the
/// decoded view of its usable entries.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
    document: Value,
    profiles: Vec<Profile>,
    loaded: bool,
}

impl ProfileStore {
    /// Read the document at `path`.
    ///
    /// A missing or unparsable file is not an error: the store reports
    /// [`is_loaded`](Self::is_loaded) `false` and serves the default
    /// profile.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        match read_document(&path) {
            Ok(document) => {
                info!("loaded profiles from {}", path.display());
                let profiles = decode_profiles(&document, &path);
                Self {
                    path,
                    document,
                    profiles,
                    loaded: true,
                }
            }
            Err(ProfileError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!("no profile document at {}, using defaults", path.display());
                Self::unloaded(path)
            }
            Err(e) => {
                warn!("{}", e);
                Self::unloaded(path)
            }
        }
    }

    /// Open the document at [`default_profile_path`].
    pub fn open_default() -> Self {
        Self::open(default_profile_path())
    }

    fn unloaded(path: PathBuf) -> Self {
        Self {
            path,
            document: json!({ "profiles": [] }),
            profiles: Vec::new(),
            loaded: false,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The document exactly as read, including entries that did not
    /// decode and keys this crate does not know about.
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    /// The first profile with `selected: true`, in list order, or the
    /// synthesized default.
    ///
    /// When several profiles are selected the first one wins; the others
    /// are ignored, not rejected.
    pub fn current_profile(&self) -> Cow<'_, Profile> {
        self.profiles
            .iter()
            .find(|p| p.selected)
            .map(Cow::Borrowed)
            .unwrap_or_else(|| Cow::Owned(default_profile()))
    }

    /// The selected profile rendered as compact JSON.
    pub fn current_profile_json(&self) -> Result<String, ProfileError> {
        Ok(serde_json::to_string(self.current_profile().as_ref())?)
    }

    pub fn current_simple_modifications(&self) -> Vec<(KeyCode, KeyCode)> {
        self.current_pairs(Table::SimpleModifications)
    }

    /// Fn-key pairs of the selected profile.
    ///
    /// If that profile has no usable `fn_function_keys` table, the default
    /// profile's table is used instead.  Only this table falls back; the
    /// rest of the selected profile is left as is.
    pub fn current_fn_function_keys(&self) -> Vec<(KeyCode, KeyCode)> {
        let profile = self.current_profile();
        if profile.table(Table::FnFunctionKeys).and_then(RuleMap::keys).is_some() {
            return self.pairs_of(&profile, Table::FnFunctionKeys);
        }
        self.pairs_of(&default_profile(), Table::FnFunctionKeys)
    }

    pub fn current_standalone_modifiers(&self) -> Vec<(KeyCode, KeyCode)> {
        self.current_pairs(Table::StandaloneModifiers)
    }

    fn current_pairs(&self, which: Table) -> Vec<(KeyCode, KeyCode)> {
        self.pairs_of(&self.current_profile(), which)
    }

    fn pairs_of(&self, profile: &Profile, which: Table) -> Vec<(KeyCode, KeyCode)> {
        let Some(table) = profile.table(which) else {
            return Vec::new();
        };
        let Some(map) = table.keys() else {
            warn!(
                "{} of profile {:?} is not an object of key names in {}",
                which.key(),
                profile.name,
                self.path.display()
            );
            return Vec::new();
        };
        let source = self.path.display();
        map.iter()
            .filter_map(|(from, to)| match to.as_str() {
                Some(to) => resolve_pair(from, to, &source),
                None => {
                    warn!("{}.{} is {}, not a key name, in {}", which.key(), from, to, source);
                    None
                }
            })
            .collect()
    }

    /// Rewrite the whole document, pretty-printed.
    ///
    /// What was read is written back, entries this crate skipped included.
    /// Last writer wins; see the module documentation.
    pub fn save(&self) -> Result<(), ProfileError> {
        let text = to_pretty_json(&self.document)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ProfileError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        std::fs::write(&self.path, text).map_err(|source| ProfileError::Write {
            path: self.path.clone(),
            source,
        })?;
        info!("saved profiles to {}", self.path.display());
        Ok(())
    }
}

fn read_document(path: &Path) -> Result<Value, ProfileError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ProfileError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// The usable entries of the `profiles` list, in order.
///
/// Entries that are not objects or do not decode are skipped.
fn decode_profiles(document: &Value, path: &Path) -> Vec<Profile> {
    let Some(entries) = document.get("profiles") else {
        return Vec::new();
    };
    let Some(entries) = entries.as_array() else {
        warn!("\"profiles\" in {} is not a list", path.display());
        return Vec::new();
    };
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            if !entry.is_object() {
                warn!("skipping profile #{} in {}: not an object", index, path.display());
                return None;
            }
            match Profile::deserialize(entry) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!("skipping profile #{} in {}: {}", index, path.display(), e);
                    None
                }
            }
        })
        .collect()
}

/// Four-space indentation with a trailing newline.
fn to_pretty_json(document: &Value) -> Result<String, ProfileError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut ser)?;
    buf.push(b'\n');
    // serde_json only emits UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
