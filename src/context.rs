use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

use crate::error::ContextError;

/// Kind used when a builder is not given one.
pub const DEFAULT_KIND: &str = "user";

const MULTI_KIND: &str = "multi";

fn kind_pattern() -> &'static Regex {
    static KIND: OnceLock<Regex> = OnceLock::new();
    KIND.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid kind pattern"))
}

/// One kind of evaluation subject: a key plus arbitrary attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleContext {
    kind: String,
    key: String,
    attributes: BTreeMap<String, Value>,
}

impl SingleContext {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    fn serialize_fields<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        map.serialize_entry("key", &self.key)?;
        for (name, value) in &self.attributes {
            map.serialize_entry(name, value)?;
        }
        Ok(())
    }
}

/// The subject of a flag evaluation, either a single kind or several at once.
#[derive(Debug, Clone, PartialEq)]
pub enum Context {
    Single(SingleContext),
    Multi(Vec<SingleContext>),
}

impl Context {
    /// Shorthand for a `user` context with no attributes.
    pub fn new(key: &str) -> Result<Self, ContextError> {
        ContextBuilder::new(key).build()
    }

    pub fn kind(&self) -> &str {
        match self {
            Context::Single(single) => single.kind(),
            Context::Multi(_) => MULTI_KIND,
        }
    }

    /// The individual context of the given kind, if present.
    pub fn individual(&self, kind: &str) -> Option<&SingleContext> {
        match self {
            Context::Single(single) => (single.kind == kind).then_some(single),
            Context::Multi(all) => all.iter().find(|c| c.kind == kind),
        }
    }
}

impl Serialize for Context {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            Context::Single(single) => {
                map.serialize_entry("kind", &single.kind)?;
                single.serialize_fields(&mut map)?;
            }
            Context::Multi(all) => {
                map.serialize_entry("kind", MULTI_KIND)?;
                for single in all {
                    map.serialize_entry(&single.kind, &Fields(single))?;
                }
            }
        }
        map.end()
    }
}

/// A single context's fields without its kind, as nested in a multi-context.
struct Fields<'a>(&'a SingleContext);

impl Serialize for Fields<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        self.0.serialize_fields(&mut map)?;
        map.end()
    }
}

/// Builds a [`Context`] of one kind.
pub struct ContextBuilder {
    kind: String,
    key: String,
    attributes: BTreeMap<String, Value>,
}

impl ContextBuilder {
    pub fn new(key: &str) -> Self {
        Self {
            kind: DEFAULT_KIND.to_string(),
            key: key.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn set_string(self, name: &str, value: &str) -> Self {
        self.set_value(name, Value::String(value.to_string()))
    }

    /// Set an attribute. `kind` and `key` are reserved and ignored here.
    pub fn set_value(mut self, name: &str, value: Value) -> Self {
        if name == "kind" || name == "key" {
            return self;
        }
        self.attributes.insert(name.to_string(), value);
        self
    }

    pub fn build_single(self) -> Result<SingleContext, ContextError> {
        if self.key.is_empty() {
            return Err(ContextError::EmptyKey);
        }
        if self.kind == "kind" || self.kind == MULTI_KIND || !kind_pattern().is_match(&self.kind) {
            return Err(ContextError::InvalidKind(self.kind));
        }
        Ok(SingleContext {
            kind: self.kind,
            key: self.key,
            attributes: self.attributes,
        })
    }

    pub fn build(self) -> Result<Context, ContextError> {
        self.build_single().map(Context::Single)
    }
}

/// Combines contexts of different kinds into one multi-context.
#[derive(Default)]
pub struct MultiContextBuilder {
    contexts: Vec<Context>,
}

impl MultiContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, context: Context) -> Self {
        self.contexts.push(context);
        self
    }

    /// A builder holding exactly one context returns it unchanged.
    pub fn build(mut self) -> Result<Context, ContextError> {
        if self.contexts.len() == 1 {
            if let Some(Context::Single(single)) = self.contexts.pop() {
                return Ok(Context::Single(single));
            }
            return Err(ContextError::NestedMulti);
        }
        if self.contexts.is_empty() {
            return Err(ContextError::EmptyMulti);
        }

        let mut all: Vec<SingleContext> = Vec::with_capacity(self.contexts.len());
        for context in self.contexts {
            let Context::Single(single) = context else {
                return Err(ContextError::NestedMulti);
            };
            if all.iter().any(|c| c.kind == single.kind) {
                return Err(ContextError::DuplicateKind(single.kind));
            }
            all.push(single);
        }
        all.sort_by(|a, b| a.kind.cmp(&b.kind));
        Ok(Context::Multi(all))
    }
}
