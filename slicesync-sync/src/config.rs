//! Slice definitions.
//!
//! A [`SliceConfig`] is built once, validated in full by its builder, and
//! never mutated afterwards. Everything the controller later relies on
//! (parsed expiration, serialized defaults, the fingerprint) is computed
//! here so that a config which exists is a config which is valid.
//!
//! Slices can also be declared as data through [`SliceDescriptor`], which
//! carries the serializable fields only; behaviour (schema, reducers,
//! selectors, events) is attached on the builder it produces.

use crate::error::ConfigError;
use crate::fingerprint;
use crate::validator::SchemaValidator;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use slicesync_types::{ExecutionMode, ExpireOffset, SliceKey};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Bound satisfied by every type that can be held in a slice.
pub trait SliceValue:
    Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

impl<T> SliceValue for T where
    T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{
}

/// A pure transform of the current value and a payload into a new value.
pub type Reducer<T> = Arc<dyn Fn(&T, &Value) -> T + Send + Sync>;

/// A pure projection of the current value and a payload.
pub type Selector<T> = Arc<dyn Fn(&T, &Value) -> Value + Send + Sync>;

/// A slice event callback.
pub type SliceCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callbacks invoked by the controller.
pub struct SliceEvents<T> {
    /// Called with the incoming value when another context changes it.
    pub on_change: Option<SliceCallback<T>>,
    /// Called with the client default when a non-default value expires.
    pub on_expire: Option<SliceCallback<T>>,
}

impl<T> Default for SliceEvents<T> {
    fn default() -> Self {
        Self {
            on_change: None,
            on_expire: None,
        }
    }
}

/// An immutable, validated slice definition.
pub struct SliceConfig<T: SliceValue> {
    key: SliceKey,
    default_client: T,
    default_server: Option<T>,
    expire: Option<ExpireOffset>,
    encrypt: bool,
    schema: Option<Arc<dyn SchemaValidator<T>>>,
    reducers: BTreeMap<String, Reducer<T>>,
    selectors: BTreeMap<String, Selector<T>>,
    events: SliceEvents<T>,
    fingerprint: String,
}

impl<T: SliceValue> SliceConfig<T> {
    /// Starts a definition for slice `key` with the given client default.
    pub fn builder(key: impl Into<String>, default_client: T) -> SliceConfigBuilder<T> {
        SliceConfigBuilder {
            key: key.into(),
            default_client,
            default_server: None,
            expire: None,
            encrypt: false,
            schema: None,
            reducers: Vec::new(),
            selectors: Vec::new(),
            events: SliceEvents::default(),
        }
    }

    pub fn key(&self) -> &SliceKey {
        &self.key
    }

    pub fn default_client(&self) -> &T {
        &self.default_client
    }

    pub fn default_server(&self) -> Option<&T> {
        self.default_server.as_ref()
    }

    /// Whether the slice is first rendered from its server default and
    /// reconciled with the store afterwards.
    pub fn is_server_rendered(&self) -> bool {
        self.default_server.is_some()
    }

    pub fn expire(&self) -> Option<ExpireOffset> {
        self.expire
    }

    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    pub fn schema(&self) -> Option<&dyn SchemaValidator<T>> {
        self.schema.as_deref()
    }

    pub fn reducer(&self, name: &str) -> Option<&Reducer<T>> {
        self.reducers.get(name)
    }

    pub fn reducer_names(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }

    pub fn selector(&self, name: &str) -> Option<&Selector<T>> {
        self.selectors.get(name)
    }

    pub fn selector_names(&self) -> impl Iterator<Item = &str> {
        self.selectors.keys().map(String::as_str)
    }

    pub fn events(&self) -> &SliceEvents<T> {
        &self.events
    }

    /// Checksum of the structural fields, see [`crate::fingerprint`].
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The value to fall back to in `mode`.
    pub fn default_for(&self, mode: ExecutionMode) -> T {
        crate::defaults::resolve(self, mode)
    }
}

impl<T: SliceValue> fmt::Debug for SliceConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceConfig")
            .field("key", &self.key)
            .field("server_rendered", &self.is_server_rendered())
            .field("expire", &self.expire)
            .field("encrypt", &self.encrypt)
            .field("schema", &self.schema.is_some())
            .field("reducers", &self.reducers.keys().collect::<Vec<_>>())
            .field("selectors", &self.selectors.keys().collect::<Vec<_>>())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Builder for [`SliceConfig`]. Nothing is checked until [`build`].
///
/// [`build`]: SliceConfigBuilder::build
pub struct SliceConfigBuilder<T: SliceValue> {
    key: String,
    default_client: T,
    default_server: Option<T>,
    expire: Option<String>,
    encrypt: bool,
    schema: Option<Arc<dyn SchemaValidator<T>>>,
    reducers: Vec<(String, Reducer<T>)>,
    selectors: Vec<(String, Selector<T>)>,
    events: SliceEvents<T>,
}

impl<T: SliceValue> SliceConfigBuilder<T> {
    /// Enables server rendering with `default_server` as the first value.
    pub fn server_rendered(mut self, default_server: T) -> Self {
        self.default_server = Some(default_server);
        self
    }

    /// Expires the value `offset` after it is seeded, e.g. `"0d-1h-0m-0s"`.
    pub fn expire(mut self, offset: impl Into<String>) -> Self {
        self.expire = Some(offset.into());
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn schema(mut self, schema: impl SchemaValidator<T> + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn reducer(
        mut self,
        name: impl Into<String>,
        reducer: impl Fn(&T, &Value) -> T + Send + Sync + 'static,
    ) -> Self {
        self.reducers.push((name.into(), Arc::new(reducer)));
        self
    }

    pub fn selector(
        mut self,
        name: impl Into<String>,
        selector: impl Fn(&T, &Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.selectors.push((name.into(), Arc::new(selector)));
        self
    }

    pub fn on_change(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.events.on_change = Some(Arc::new(callback));
        self
    }

    pub fn on_expire(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.events.on_expire = Some(Arc::new(callback));
        self
    }

    /// Validates every field and freezes the definition.
    pub fn build(self) -> Result<SliceConfig<T>, ConfigError> {
        let key = SliceKey::parse(self.key.clone()).map_err(|source| ConfigError::InvalidKey {
            key: self.key.clone(),
            source,
        })?;

        let expire = self
            .expire
            .as_deref()
            .map(str::parse::<ExpireOffset>)
            .transpose()
            .map_err(|source| ConfigError::InvalidExpire {
                key: self.key.clone(),
                source,
            })?;

        let reducers = named_map(&self.key, "reducers", self.reducers)?;
        let selectors = named_map(&self.key, "selectors", self.selectors)?;

        let fingerprint = fingerprint::compute(
            &self.default_client,
            self.default_server.as_ref(),
            expire,
            self.encrypt,
        )
        .map_err(|source| ConfigError::Serialization {
            key: self.key.clone(),
            source,
        })?;

        Ok(SliceConfig {
            key,
            default_client: self.default_client,
            default_server: self.default_server,
            expire,
            encrypt: self.encrypt,
            schema: self.schema,
            reducers,
            selectors,
            events: self.events,
            fingerprint,
        })
    }
}

fn named_map<F>(
    key: &str,
    field: &'static str,
    entries: Vec<(String, F)>,
) -> Result<BTreeMap<String, F>, ConfigError> {
    let mut map = BTreeMap::new();
    for (name, f) in entries {
        if name.is_empty() {
            return Err(ConfigError::EmptyName {
                key: key.to_string(),
                field,
            });
        }
        if map.contains_key(&name) {
            return Err(ConfigError::DuplicateName {
                key: key.to_string(),
                field,
                name,
            });
        }
        map.insert(name, f);
    }
    Ok(map)
}

// ── Declarative descriptors ──────────────────────────────────────

const DESCRIPTOR_FIELDS: [&str; 6] = [
    "key",
    "defaultClient",
    "defaultServer",
    "ssr",
    "expire",
    "encrypt",
];

/// The serializable part of a slice definition.
///
/// Field names follow the camelCase convention of configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SliceDescriptor {
    pub key: String,
    pub default_client: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<Value>,
    #[serde(default)]
    pub ssr: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<String>,
    #[serde(default)]
    pub encrypt: bool,
}

impl SliceDescriptor {
    /// Parses a descriptor from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ConfigError::InvalidField {
            key: "<unknown>".to_string(),
            field: "config",
            reason: format!("is not valid JSON: {e}"),
        })?;
        Self::from_value(value)
    }

    /// Validates the shape of a JSON object and converts it.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::InvalidField {
                key: "<unknown>".to_string(),
                field: "config",
                reason: "is not an object".to_string(),
            });
        };

        let key = match map.get("key") {
            None => {
                return Err(ConfigError::MissingField {
                    key: "<unknown>".to_string(),
                    field: "key",
                });
            }
            Some(Value::String(key)) => key.clone(),
            Some(other) => {
                return Err(ConfigError::InvalidField {
                    key: other.to_string(),
                    field: "key",
                    reason: "is not a string".to_string(),
                });
            }
        };

        let unknown: Vec<String> = map
            .keys()
            .filter(|k| !DESCRIPTOR_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownFields {
                key,
                fields: unknown,
            });
        }

        if !map.contains_key("defaultClient") {
            return Err(ConfigError::MissingField {
                key,
                field: "defaultClient",
            });
        }

        for field in ["ssr", "encrypt"] {
            if map.get(field).is_some_and(|v| !v.is_boolean()) {
                return Err(ConfigError::InvalidField {
                    key,
                    field,
                    reason: "is not boolean".to_string(),
                });
            }
        }
        if map.get("expire").is_some_and(|v| !v.is_string()) {
            return Err(ConfigError::InvalidField {
                key,
                field: "expire",
                reason: "is not a string".to_string(),
            });
        }

        let descriptor: Self =
            serde_json::from_value(Value::Object(map)).map_err(|e| ConfigError::InvalidField {
                key: key.clone(),
                field: "config",
                reason: e.to_string(),
            })?;

        if descriptor.ssr != descriptor.default_server.is_some() {
            return Err(ConfigError::ServerRenderingMismatch { key });
        }
        if let Some(server) = &descriptor.default_server {
            if json_kind(server) != json_kind(&descriptor.default_client) {
                return Err(ConfigError::InvalidField {
                    key,
                    field: "defaultServer",
                    reason: format!(
                        "is {} but `defaultClient` is {}",
                        json_kind(server),
                        json_kind(&descriptor.default_client)
                    ),
                });
            }
        }

        Ok(descriptor)
    }

    /// Converts the data fields into a typed builder. Behaviour can be
    /// attached to the returned builder before calling `build`.
    pub fn into_builder<T: SliceValue>(self) -> Result<SliceConfigBuilder<T>, ConfigError> {
        let key = self.key;
        let typed = |field: &'static str, value: Value| {
            serde_json::from_value::<T>(value).map_err(|e| ConfigError::InvalidField {
                key: key.clone(),
                field,
                reason: format!("does not match the slice type: {e}"),
            })
        };

        let default_client = typed("defaultClient", self.default_client)?;
        let default_server = self
            .default_server
            .map(|v| typed("defaultServer", v))
            .transpose()?;

        let mut builder = SliceConfig::builder(key.clone(), default_client).encrypt(self.encrypt);
        if let Some(server) = default_server {
            builder = builder.server_rendered(server);
        }
        if let Some(expire) = self.expire {
            builder = builder.expire(expire);
        }
        Ok(builder)
    }
}

/// The JSON analogue of a runtime type tag. `null` counts as an object.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Object(_) => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
    }
}
