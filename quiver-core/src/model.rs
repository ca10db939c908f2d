//! Model registry and schema records.
//!
//! Behavior that varies by resource type is looked up in an explicit
//! registry mapping a type name to a [`ModelDescriptor`]. Unregistered types
//! resolve to the generic `resource` descriptor.

use crate::headers::Headers;
use crate::normalize_type;
use crate::record::{Record, RecordHandle};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Read access to the cache, handed to `mangle_in` hooks.
pub trait CacheLookup {
    fn lookup_id(&self, record_type: &str, id: &str) -> Option<RecordHandle>;
    fn lookup_record(&self, handle: RecordHandle) -> Option<&Record>;
}

/// Pre-normalization hook: rewrites a raw payload before it becomes a record.
pub type MangleFn = Arc<dyn Fn(Map<String, Value>, &dyn CacheLookup) -> Map<String, Value> + Send + Sync>;

/// Per-type behavior.
#[derive(Clone, Default)]
pub struct ModelDescriptor {
    pub name: String,
    /// Headers sent with every find of this type.
    pub headers: Headers,
    pub mangle_in: Option<MangleFn>,
    pub default_limit: Option<u32>,
    pub default_sort_by: Option<String>,
    pub default_sort_order: Option<String>,
}

impl ModelDescriptor {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: normalize_type(name.as_ref()),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_mangle_in<F>(mut self, hook: F) -> Self
    where
        F: Fn(Map<String, Value>, &dyn CacheLookup) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.mangle_in = Some(Arc::new(hook));
        self
    }

    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn with_default_sort(mut self, by: impl Into<String>, order: Option<&str>) -> Self {
        self.default_sort_by = Some(by.into());
        self.default_sort_order = order.map(str::to_string);
        self
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("name", &self.name)
            .field("headers", &self.headers)
            .field("mangle_in", &self.mangle_in.as_ref().map(|_| "<fn>"))
            .field("default_limit", &self.default_limit)
            .field("default_sort_by", &self.default_sort_by)
            .field("default_sort_order", &self.default_sort_order)
            .finish()
    }
}

/// Registry of model descriptors.
/// Models must be explicitly registered - no auto-discovery.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<ModelDescriptor>>,
    fallback: Arc<ModelDescriptor>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            fallback: Arc::new(ModelDescriptor::new("resource")),
        }
    }

    /// Register a descriptor. Replaces any previous one of the same name.
    pub fn register(&mut self, descriptor: ModelDescriptor) {
        self.models
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn lookup(&self, record_type: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.get(&normalize_type(record_type)).cloned()
    }

    /// Descriptor for a type, falling back to the generic `resource` model.
    pub fn class_for(&self, record_type: &str) -> Arc<ModelDescriptor> {
        self.lookup(record_type)
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

const PRIMITIVE_FIELD_TYPES: &[&str] = &[
    "base64",
    "blob",
    "boolean",
    "date",
    "dnslabel",
    "enum",
    "float",
    "hostname",
    "int",
    "json",
    "masked",
    "multiline",
    "password",
    "string",
];

fn unwrap_container(field_type: &str) -> &str {
    let mut inner = field_type;
    loop {
        let stripped = inner
            .strip_prefix("array[")
            .or_else(|| inner.strip_prefix("map["))
            .and_then(|rest| rest.strip_suffix(']'));
        match stripped {
            Some(next) => inner = next,
            None => return inner,
        }
    }
}

fn is_nested_type(field_type: &str) -> bool {
    let inner = unwrap_container(field_type).to_ascii_lowercase();
    !inner.is_empty()
        && !inner.starts_with("reference[")
        && !PRIMITIVE_FIELD_TYPES.contains(&inner.as_str())
}

/// Read-only view of a schema record.
#[derive(Debug, Clone, Copy)]
pub struct SchemaView<'a> {
    record: &'a Record,
}

impl<'a> SchemaView<'a> {
    pub fn new(record: &'a Record) -> Self {
        Self { record }
    }

    /// URL of a schema link, e.g. `collection`.
    pub fn link_for(&self, relation: &str) -> Option<&'a str> {
        self.record
            .get_plain("links")
            .and_then(|links| links.get(relation))
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }

    fn resource_fields(&self) -> Option<&'a Map<String, Value>> {
        self.record
            .get_plain("resourceFields")
            .and_then(Value::as_object)
    }

    /// Fill fields absent from `data` with the schema's declared defaults.
    pub fn create_defaults(&self, mut data: Map<String, Value>) -> Map<String, Value> {
        if let Some(fields) = self.resource_fields() {
            for (name, def) in fields {
                let Some(default) = def.get("default") else {
                    continue;
                };
                if default.is_null() || data.contains_key(name) {
                    continue;
                }
                data.insert(name.clone(), default.clone());
            }
        }
        data
    }

    /// Fields whose values must be normalized recursively, in declaration order.
    ///
    /// An explicit `typeifyFields` list wins; otherwise every resource field
    /// whose type names another resource (directly or inside `array[..]` /
    /// `map[..]`) is a target.
    pub fn typeify_fields(&self) -> Vec<String> {
        if let Some(explicit) = self
            .record
            .get_plain("typeifyFields")
            .and_then(Value::as_array)
        {
            return explicit
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
        }

        self.resource_fields()
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, def)| {
                        def.get("type")
                            .and_then(Value::as_str)
                            .is_some_and(is_nested_type)
                    })
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
