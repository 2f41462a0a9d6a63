//! Argument coercion against a tool's input schema.
//!
//! A tool's `inputSchema` is compiled once into an [`ArgumentSchema`]: a
//! table of field name to [`FieldKind`] plus constraints. Calling
//! [`ArgumentSchema::coerce`] walks the caller's arguments against that
//! table and produces an [`ArgValue`] tree, or a validation error naming the
//! first offending field. Nothing is sent when coercion fails.
//!
//! Coercion is lenient where the intent is unambiguous:
//!
//! | Kind                | Accepts                                              |
//! |---------------------|------------------------------------------------------|
//! | integer / number    | numbers, digit strings (`"42"`, `"2.5"`)             |
//! | boolean             | booleans, `"true"`/`"false"`, `"1"`/`"0"`, `0`/`1`   |
//! | uuid                | hyphenated or simple UUID strings                    |
//! | path                | strings, lexically normalized (`a/./b/../c` → `a/c`) |
//! | literal (`enum`)    | exact, case-sensitive matches only                   |
//! | record / map        | objects, or strings holding a JSON object            |
//! | list / tuple / set  | arrays, or strings holding a JSON array              |
//!
//! Field paths in errors use dots for nesting and brackets for positions,
//! e.g. `filters.limit` or `tags[1]`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use regex::Regex;
use serde_json::{Map, Number, Value};
use switchboard_protocol::types::PromptArgument;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Schemas nested deeper than this are treated as unconstrained.
const MAX_SCHEMA_DEPTH: usize = 32;

static UNCONSTRAINED: Value = Value::Bool(true);

/// Compiled argument schema of one tool.
#[derive(Debug, Clone, Default)]
pub struct ArgumentSchema {
    fields: Vec<FieldSpec>,
    additional: Additional,
    /// Compiled `$ref` targets; [`FieldKind::Ref`] points into these.
    definitions: Vec<Arc<OnceLock<FieldKind>>>,
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name
    pub name: String,
    /// Expected kind
    pub kind: FieldKind,
    /// Whether the caller must supply it
    pub required: bool,
}

/// Policy for fields the schema does not declare.
#[derive(Debug, Clone, Default)]
enum Additional {
    #[default]
    Allow,
    Deny,
    Schema(Box<FieldKind>),
}

/// Bounds for numeric fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberBounds {
    /// Inclusive lower bound
    pub minimum: Option<f64>,
    /// Inclusive upper bound
    pub maximum: Option<f64>,
    /// Exclusive lower bound
    pub exclusive_minimum: Option<f64>,
    /// Exclusive upper bound
    pub exclusive_maximum: Option<f64>,
}

/// Constraints for string fields.
#[derive(Debug, Clone, Default)]
pub struct StringRules {
    /// Minimum length in characters
    pub min_length: Option<usize>,
    /// Maximum length in characters
    pub max_length: Option<usize>,
    /// Pattern the value must contain a match for
    pub pattern: Option<Regex>,
}

/// The expected shape of one value.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Anything; passed through untouched
    Any,
    /// JSON null
    Null,
    /// Text
    String(StringRules),
    /// Whole number
    Integer(NumberBounds),
    /// Any number
    Number(NumberBounds),
    /// Boolean
    Boolean,
    /// UUID (`format: uuid`)
    Uuid,
    /// Filesystem path (`format: path`)
    Path,
    /// One of a fixed set of values (`enum` or `const`)
    Literal(Vec<Value>),
    /// Object with declared fields
    Record(ArgumentSchema),
    /// Homogeneous sequence
    List {
        /// Item kind
        item: Box<FieldKind>,
        /// Minimum item count
        min_items: Option<usize>,
        /// Maximum item count
        max_items: Option<usize>,
    },
    /// Fixed-arity sequence
    Tuple(Vec<FieldKind>),
    /// Sequence without duplicates
    Set(Box<FieldKind>),
    /// Object whose values all share one kind
    Map(Box<FieldKind>),
    /// First alternative that fits
    OneOf(Vec<FieldKind>),
    /// Null, or the inner kind
    Nullable(Box<FieldKind>),
    /// A named definition, shared by every place that refers to it
    Ref(DefinitionRef),
}

/// Link from a `$ref` to its compiled definition.
///
/// Definitions are owned by the top-level [`ArgumentSchema`]; a reference
/// that outlives it accepts anything.
#[derive(Clone)]
pub struct DefinitionRef {
    pointer: String,
    target: Weak<OnceLock<FieldKind>>,
}

impl DefinitionRef {
    /// The `$ref` as written, e.g. `#/$defs/Node`.
    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    fn with_kind<T>(&self, f: impl FnOnce(&FieldKind) -> T) -> Option<T> {
        let target = self.target.upgrade()?;
        target.get().map(f)
    }
}

impl fmt::Debug for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DefinitionRef").field(&self.pointer).finish()
    }
}

/// A coerced argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Null
    Null,
    /// Boolean
    Bool(bool),
    /// Whole number
    Int(i64),
    /// Floating point number
    Float(f64),
    /// Text
    Str(String),
    /// Parsed UUID
    Uuid(Uuid),
    /// Normalized path
    Path(PathBuf),
    /// A matched literal
    Literal(Value),
    /// Sequence
    List(Vec<ArgValue>),
    /// Fixed-arity sequence
    Tuple(Vec<ArgValue>),
    /// Deduplicated sequence, first occurrence wins
    Set(Vec<ArgValue>),
    /// Object with uniform values
    Map(Vec<(String, ArgValue)>),
    /// Object with declared fields
    Record(Vec<(String, ArgValue)>),
    /// Unconstrained value
    Raw(Value),
}

impl ArgValue {
    /// Field of a record or map.
    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        match self {
            Self::Record(fields) | Self::Map(fields) => {
                fields.iter().find(|(name, _)| name == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    /// Wire form of this value.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::Str(s) => Value::String(s.clone()),
            Self::Uuid(u) => Value::String(u.hyphenated().to_string()),
            Self::Path(p) => Value::String(p.to_string_lossy().into_owned()),
            Self::Literal(v) | Self::Raw(v) => v.clone(),
            Self::List(items) | Self::Tuple(items) | Self::Set(items) => {
                Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(fields) | Self::Record(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl ArgumentSchema {
    /// A schema that accepts any object unchanged.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Compile a JSON Schema object. Never fails: constructs it does not
    /// understand are treated as unconstrained.
    pub fn from_json_schema(schema: &Value) -> Self {
        let compiler = Compiler {
            root: schema,
            definitions: RefCell::new(HashMap::new()),
        };
        let resolved = compiler.resolve(schema, 0);
        let mut compiled = compiler.record(resolved, 0);
        compiled.definitions = compiler.definitions.into_inner().into_values().collect();
        compiled
    }

    /// Schema of a prompt's declared arguments. Values are left untyped;
    /// only presence of required arguments is checked.
    pub fn from_prompt_arguments(arguments: &[PromptArgument]) -> Self {
        Self {
            fields: arguments
                .iter()
                .map(|arg| FieldSpec {
                    name: arg.name.clone(),
                    kind: FieldKind::Any,
                    required: arg.required,
                })
                .collect(),
            additional: Additional::Allow,
            definitions: Vec::new(),
        }
    }

    /// Declared fields, in schema order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Coerce a tool's `arguments` object.
    ///
    /// `null` counts as an empty object. A string holding a JSON object is
    /// parsed first.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] naming the first field that does not fit.
    pub fn coerce(&self, arguments: &Value) -> Result<ArgValue> {
        let empty = Value::Object(Map::new());
        let arguments = if arguments.is_null() { &empty } else { arguments };
        match arguments {
            Value::Object(object) => self.coerce_object(object, ""),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(object)) => self.coerce_object(&object, ""),
                _ => Err(Error::validation("arguments", "expected an object")),
            },
            other => Err(Error::validation(
                "arguments",
                format!("expected an object, got {}", type_name(other)),
            )),
        }
    }

    fn coerce_object(&self, object: &Map<String, Value>, path: &str) -> Result<ArgValue> {
        let mut out = Vec::with_capacity(object.len());
        for field in &self.fields {
            let field_path = join_field(path, &field.name);
            match object.get(&field.name) {
                Some(value) => out.push((field.name.clone(), field.kind.coerce(value, &field_path)?)),
                None if field.required => {
                    return Err(Error::validation(field_path, "field required"));
                }
                None => {}
            }
        }
        for (key, value) in object {
            if self.field(key).is_some() {
                continue;
            }
            let field_path = join_field(path, key);
            let coerced = match &self.additional {
                Additional::Allow => ArgValue::Raw(value.clone()),
                Additional::Deny => {
                    return Err(Error::validation(field_path, "unexpected field"));
                }
                Additional::Schema(kind) => kind.coerce(value, &field_path)?,
            };
            out.push((key.clone(), coerced));
        }
        Ok(ArgValue::Record(out))
    }
}

impl FieldKind {
    /// Coerce one value; `path` names it in errors.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if the value does not fit this kind.
    pub fn coerce(&self, value: &Value, path: &str) -> Result<ArgValue> {
        match self {
            Self::Any => Ok(ArgValue::Raw(value.clone())),
            Self::Null => match value {
                Value::Null => Ok(ArgValue::Null),
                other => Err(mismatch(path, "null", other)),
            },
            Self::Nullable(inner) => match value {
                Value::Null => Ok(ArgValue::Null),
                other => inner.coerce(other, path),
            },
            Self::Boolean => coerce_bool(value, path),
            Self::Integer(bounds) => {
                let int = coerce_int(value, path)?;
                #[allow(clippy::cast_precision_loss)]
                check_bounds(int as f64, bounds, path)?;
                Ok(ArgValue::Int(int))
            }
            Self::Number(bounds) => {
                let number = coerce_float(value, path)?;
                check_bounds(number, bounds, path)?;
                Ok(ArgValue::Float(number))
            }
            Self::String(rules) => {
                let Value::String(text) = value else {
                    return Err(mismatch(path, "a string", value));
                };
                check_string(text, rules, path)?;
                Ok(ArgValue::Str(text.clone()))
            }
            Self::Uuid => {
                let Value::String(text) = value else {
                    return Err(mismatch(path, "a UUID string", value));
                };
                Uuid::parse_str(text.trim())
                    .map(ArgValue::Uuid)
                    .map_err(|_| Error::validation(path, format!("'{text}' is not a valid UUID")))
            }
            Self::Path => {
                let Value::String(text) = value else {
                    return Err(mismatch(path, "a path string", value));
                };
                if text.is_empty() {
                    return Err(Error::validation(path, "path cannot be empty"));
                }
                Ok(ArgValue::Path(normalize_path(Path::new(text))))
            }
            Self::Literal(allowed) => {
                if allowed.contains(value) {
                    Ok(ArgValue::Literal(value.clone()))
                } else {
                    Err(Error::validation(
                        path,
                        format!(
                            "{value} is not one of {}",
                            Value::Array(allowed.clone())
                        ),
                    ))
                }
            }
            Self::Record(schema) => {
                let object = as_object(value, path)?;
                schema.coerce_object(&object, path)
            }
            Self::Map(inner) => {
                let object = as_object(value, path)?;
                object
                    .iter()
                    .map(|(key, v)| Ok((key.clone(), inner.coerce(v, &join_field(path, key))?)))
                    .collect::<Result<Vec<_>>>()
                    .map(ArgValue::Map)
            }
            Self::List {
                item,
                min_items,
                max_items,
            } => {
                let items = as_array(value, path)?;
                if let Some(min) = min_items.filter(|min| items.len() < *min) {
                    return Err(Error::validation(path, format!("expected at least {min} items")));
                }
                if let Some(max) = max_items.filter(|max| items.len() > *max) {
                    return Err(Error::validation(path, format!("expected at most {max} items")));
                }
                coerce_items(&items, path, |_| item.as_ref()).map(ArgValue::List)
            }
            Self::Tuple(kinds) => {
                let items = as_array(value, path)?;
                if items.len() != kinds.len() {
                    return Err(Error::validation(
                        path,
                        format!("expected exactly {} items, got {}", kinds.len(), items.len()),
                    ));
                }
                coerce_items(&items, path, |index| &kinds[index]).map(ArgValue::Tuple)
            }
            Self::Set(item) => {
                let items = as_array(value, path)?;
                let coerced = coerce_items(&items, path, |_| item.as_ref())?;
                let mut seen = HashSet::new();
                Ok(ArgValue::Set(
                    coerced
                        .into_iter()
                        .filter(|v| seen.insert(v.to_json().to_string()))
                        .collect(),
                ))
            }
            Self::OneOf(kinds) => {
                let native = kinds.iter().filter(|kind| kind.accepts_natively(value));
                let lax = kinds.iter().filter(|kind| !kind.accepts_natively(value));
                for kind in native.chain(lax) {
                    if let Ok(coerced) = kind.coerce(value, path) {
                        return Ok(coerced);
                    }
                }
                Err(Error::validation(
                    path,
                    format!("{} does not match any allowed type", type_name(value)),
                ))
            }
            Self::Ref(definition) => definition
                .with_kind(|kind| kind.coerce(value, path))
                .unwrap_or_else(|| Ok(ArgValue::Raw(value.clone()))),
        }
    }

    /// Whether `value` already has this kind's JSON type.
    fn accepts_natively(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Null => value.is_null(),
            Self::Nullable(inner) => value.is_null() || inner.accepts_natively(value),
            Self::Boolean => value.is_boolean(),
            Self::Integer(_) => value.is_i64() || value.is_u64(),
            Self::Number(_) => value.is_number(),
            Self::String(_) | Self::Uuid | Self::Path => value.is_string(),
            Self::Literal(allowed) => allowed.contains(value),
            Self::Record(_) | Self::Map(_) => value.is_object(),
            Self::List { .. } | Self::Tuple(_) | Self::Set(_) => value.is_array(),
            Self::OneOf(kinds) => kinds.iter().any(|kind| kind.accepts_natively(value)),
            Self::Ref(definition) => definition
                .with_kind(|kind| kind.accepts_natively(value))
                .unwrap_or(true),
        }
    }
}

// ============================================================================
// SCHEMA COMPILATION
// ============================================================================

struct Compiler<'a> {
    root: &'a Value,
    /// Each `$ref` is compiled once; later uses share the result.
    definitions: RefCell<HashMap<String, Arc<OnceLock<FieldKind>>>>,
}

impl<'a> Compiler<'a> {
    /// Follow local `$ref`s (`#/$defs/...`, `#/definitions/...`). A chain
    /// that never reaches a schema is unconstrained.
    fn resolve(&self, schema: &'a Value, depth: usize) -> &'a Value {
        let mut current = schema;
        for _ in depth..MAX_SCHEMA_DEPTH {
            let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
                return current;
            };
            current = self.lookup(reference);
        }
        if current.get("$ref").is_some() {
            warn!("schema reference chain does not terminate, treating as unconstrained");
            return &UNCONSTRAINED;
        }
        current
    }

    fn reference(&self, reference: &str, depth: usize) -> FieldKind {
        let shared = self.definitions.borrow().get(reference).cloned();
        let cell = match shared {
            Some(cell) => cell,
            None => {
                let cell = Arc::new(OnceLock::new());
                self.definitions
                    .borrow_mut()
                    .insert(reference.to_string(), Arc::clone(&cell));
                let target = self.resolve(self.lookup(reference), depth);
                let _ = cell.set(self.kind(target, depth + 1));
                cell
            }
        };
        FieldKind::Ref(DefinitionRef {
            pointer: reference.to_string(),
            target: Arc::downgrade(&cell),
        })
    }

    /// Target of a local `$ref`, which may itself be a `$ref`.
    fn lookup(&self, reference: &str) -> &'a Value {
        match reference
            .strip_prefix('#')
            .and_then(|pointer| self.root.pointer(pointer))
        {
            Some(target) => target,
            None => {
                warn!(reference, "unresolvable schema reference, treating as unconstrained");
                &UNCONSTRAINED
            }
        }
    }

    fn record(&self, schema: &'a Value, depth: usize) -> ArgumentSchema {
        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| FieldSpec {
                        name: name.clone(),
                        kind: self.kind(property, depth + 1),
                        required: required.contains(name.as_str()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let additional = match schema.get("additionalProperties") {
            Some(Value::Bool(false)) => Additional::Deny,
            Some(extra @ Value::Object(_)) => {
                Additional::Schema(Box::new(self.kind(extra, depth + 1)))
            }
            _ => Additional::Allow,
        };

        ArgumentSchema {
            fields,
            additional,
            definitions: Vec::new(),
        }
    }

    fn kind(&self, schema: &'a Value, depth: usize) -> FieldKind {
        if depth > MAX_SCHEMA_DEPTH {
            return FieldKind::Any;
        }
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return self.reference(reference, depth);
        }
        let Value::Object(object) = schema else {
            return FieldKind::Any;
        };

        if let Some(constant) = object.get("const") {
            return FieldKind::Literal(vec![constant.clone()]);
        }
        if let Some(Value::Array(values)) = object.get("enum") {
            return FieldKind::Literal(values.clone());
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(Value::Array(variants)) = object.get(keyword) {
                let kinds = variants.iter().map(|v| self.kind(v, depth + 1)).collect();
                return combine(kinds);
            }
        }
        if let Some(Value::Array(parts)) = object.get("allOf")
            && let [single] = parts.as_slice()
        {
            return self.kind(single, depth + 1);
        }

        match object.get("type") {
            Some(Value::String(ty)) => self.kind_for_type(ty, schema, depth),
            Some(Value::Array(types)) => combine(
                types
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|ty| self.kind_for_type(ty, schema, depth))
                    .collect(),
            ),
            _ if object.contains_key("properties") => self.kind_for_type("object", schema, depth),
            _ if object.contains_key("items") || object.contains_key("prefixItems") => {
                self.kind_for_type("array", schema, depth)
            }
            _ => FieldKind::Any,
        }
    }

    fn kind_for_type(&self, ty: &str, schema: &'a Value, depth: usize) -> FieldKind {
        match ty {
            "null" => FieldKind::Null,
            "boolean" => FieldKind::Boolean,
            "integer" => FieldKind::Integer(bounds(schema)),
            "number" => FieldKind::Number(bounds(schema)),
            "string" => match schema.get("format").and_then(Value::as_str) {
                Some("uuid") => FieldKind::Uuid,
                Some("path" | "file-path" | "directory-path") => FieldKind::Path,
                _ => FieldKind::String(string_rules(schema)),
            },
            "array" => {
                let tuple = schema
                    .get("prefixItems")
                    .or_else(|| schema.get("items").filter(|items| items.is_array()));
                if let Some(Value::Array(positions)) = tuple {
                    return FieldKind::Tuple(
                        positions.iter().map(|p| self.kind(p, depth + 1)).collect(),
                    );
                }
                let item = Box::new(
                    schema
                        .get("items")
                        .map_or(FieldKind::Any, |items| self.kind(items, depth + 1)),
                );
                if schema.get("uniqueItems").and_then(Value::as_bool) == Some(true) {
                    FieldKind::Set(item)
                } else {
                    FieldKind::List {
                        item,
                        min_items: usize_keyword(schema, "minItems"),
                        max_items: usize_keyword(schema, "maxItems"),
                    }
                }
            }
            "object" => {
                let has_properties = schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .is_some_and(|p| !p.is_empty());
                match schema.get("additionalProperties") {
                    Some(extra @ Value::Object(_)) if !has_properties => {
                        FieldKind::Map(Box::new(self.kind(extra, depth + 1)))
                    }
                    _ => FieldKind::Record(self.record(schema, depth)),
                }
            }
            _ => FieldKind::Any,
        }
    }
}

/// Merge alternatives; a `null` alternative makes the rest nullable.
fn combine(kinds: Vec<FieldKind>) -> FieldKind {
    let nullable = kinds.iter().any(|k| matches!(k, FieldKind::Null));
    let mut rest: Vec<FieldKind> = kinds
        .into_iter()
        .filter(|k| !matches!(k, FieldKind::Null))
        .collect();
    let inner = match rest.len() {
        0 => return FieldKind::Null,
        1 => rest.remove(0),
        _ => FieldKind::OneOf(rest),
    };
    if nullable {
        FieldKind::Nullable(Box::new(inner))
    } else {
        inner
    }
}

fn bounds(schema: &Value) -> NumberBounds {
    let get = |key: &str| schema.get(key).and_then(Value::as_f64);
    NumberBounds {
        minimum: get("minimum"),
        maximum: get("maximum"),
        exclusive_minimum: get("exclusiveMinimum"),
        exclusive_maximum: get("exclusiveMaximum"),
    }
}

fn string_rules(schema: &Value) -> StringRules {
    let pattern = schema
        .get("pattern")
        .and_then(Value::as_str)
        .and_then(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(pattern, "ignoring invalid schema pattern: {e}");
                None
            }
        });
    StringRules {
        min_length: usize_keyword(schema, "minLength"),
        max_length: usize_keyword(schema, "maxLength"),
        pattern,
    }
}

fn usize_keyword(schema: &Value, key: &str) -> Option<usize> {
    schema
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

// ============================================================================
// VALUE COERCION
// ============================================================================

fn coerce_bool(value: &Value, path: &str) -> Result<ArgValue> {
    match value {
        Value::Bool(b) => Ok(ArgValue::Bool(*b)),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(ArgValue::Bool(false)),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(ArgValue::Bool(true)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(ArgValue::Bool(true)),
            "false" | "0" => Ok(ArgValue::Bool(false)),
            _ => Err(Error::validation(path, format!("'{text}' is not a boolean"))),
        },
        other => Err(mismatch(path, "a boolean", other)),
    }
}

fn coerce_int(value: &Value, path: &str) -> Result<i64> {
    match value {
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                return Ok(int);
            }
            match n.as_f64() {
                #[allow(clippy::cast_possible_truncation)]
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(f as i64),
                _ => Err(Error::validation(path, format!("{n} is not an integer"))),
            }
        }
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::validation(path, format!("'{text}' is not an integer"))),
        other => Err(mismatch(path, "an integer", other)),
    }
}

fn coerce_float(value: &Value, path: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        other => return Err(mismatch(path, "a number", other)),
    };
    parsed
        .filter(|f| f.is_finite())
        .ok_or_else(|| Error::validation(path, format!("{value} is not a number")))
}

fn check_bounds(number: f64, bounds: &NumberBounds, path: &str) -> Result<()> {
    if let Some(min) = bounds.minimum.filter(|min| number < *min) {
        return Err(Error::validation(path, format!("must be >= {min}")));
    }
    if let Some(max) = bounds.maximum.filter(|max| number > *max) {
        return Err(Error::validation(path, format!("must be <= {max}")));
    }
    if let Some(min) = bounds.exclusive_minimum.filter(|min| number <= *min) {
        return Err(Error::validation(path, format!("must be > {min}")));
    }
    if let Some(max) = bounds.exclusive_maximum.filter(|max| number >= *max) {
        return Err(Error::validation(path, format!("must be < {max}")));
    }
    Ok(())
}

fn check_string(text: &str, rules: &StringRules, path: &str) -> Result<()> {
    let length = text.chars().count();
    if let Some(min) = rules.min_length.filter(|min| length < *min) {
        return Err(Error::validation(path, format!("must be at least {min} characters")));
    }
    if let Some(max) = rules.max_length.filter(|max| length > *max) {
        return Err(Error::validation(path, format!("must be at most {max} characters")));
    }
    if let Some(pattern) = rules.pattern.as_ref().filter(|p| !p.is_match(text)) {
        return Err(Error::validation(
            path,
            format!("'{text}' does not match pattern '{}'", pattern.as_str()),
        ));
    }
    Ok(())
}

fn coerce_items<'k>(
    items: &[Value],
    path: &str,
    kind_at: impl Fn(usize) -> &'k FieldKind,
) -> Result<Vec<ArgValue>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| kind_at(index).coerce(item, &format!("{path}[{index}]")))
        .collect()
}

fn as_object(value: &Value, path: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => Ok(object),
            _ => Err(Error::validation(path, "expected an object")),
        },
        other => Err(mismatch(path, "an object", other)),
    }
}

fn as_array(value: &Value, path: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => Ok(items),
            _ => Err(Error::validation(path, "expected an array")),
        },
        other => Err(mismatch(path, "an array", other)),
    }
}

/// Resolve `.` and `..` lexically; leading `..` on relative paths is kept.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = out.components().next_back();
                match last {
                    Some(Component::Normal(_)) => {
                        out.pop();
                    }
                    Some(Component::RootDir | Component::Prefix(_)) => {}
                    _ => out.push(".."),
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn join_field(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn mismatch(path: &str, expected: &str, got: &Value) -> Error {
    Error::validation(path, format!("expected {expected}, got {}", type_name(got)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
