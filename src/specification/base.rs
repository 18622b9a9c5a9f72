/// Core specification protocol and the generic construction engine.
///
/// Every configuration object in this crate is a `Specification`: a named
/// bag of typed fields plus an open `properties` map that preserves any
/// unrecognized keys verbatim. Construction accepts loosely-typed input —
/// an existing instance, a JSON value, a JSON string, UTF-8 bytes, a byte
/// stream, or a sequence of any of those — normalizes it to a closed set of
/// variants, and dispatches on that set rather than probing input for
/// capabilities.
///
/// Instead of reflecting over constructors, each concrete type publishes a
/// static schema descriptor table (`FieldDescriptor`) and a `from_fields`
/// builder. The engine checks required fields against the table, routes
/// template references through the `TemplateManager`, applies overlays after
/// construction, and sweeps unclaimed keys into `properties`.
///
/// Error handling is dual-moded: `create` aggregates every collected problem
/// into a single `SpecificationError`, while `check` returns the same
/// messages as plain strings so validation UIs can enumerate all problems in
/// one pass.

use serde_json::{Map, Value};
use std::io::Read;

use crate::errors::SpecificationError;
use crate::logging::{self, Component};
use crate::specification::template::TemplateManager;

/// The open-ended extra-key catch-all carried by every specification.
pub type PropertyMap = Map<String, Value>;

/// Keys that reference templates rather than describing fields.
const TEMPLATE_KEYS: [&str; 3] = ["template_name", "template", "templates"];

// ---------------------------------------------------------------------------
// Schema descriptors
// ---------------------------------------------------------------------------

/// Declared shape of one constructor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    /// A path normalized to ordered segments.
    Segments,
    TextList,
    /// A nested specification.
    Spec,
    /// A list of nested specifications.
    SpecList,
}

impl FieldDescriptor {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        FieldDescriptor {
            name,
            required: true,
            kind,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        FieldDescriptor {
            name,
            required: false,
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Input normalization
// ---------------------------------------------------------------------------

/// Closed set of construction inputs. `From` conversions cover the common
/// caller shapes; instances and streams use the explicit constructors.
pub enum SpecSource<T> {
    /// An already-typed instance: construction is idempotent.
    Instance(T),
    Instances(Vec<T>),
    Text(String),
    Bytes(Vec<u8>),
    Reader(Box<dyn Read>),
    Value(Value),
}

impl<T> SpecSource<T> {
    pub fn instance(value: T) -> Self {
        SpecSource::Instance(value)
    }

    pub fn instances(values: Vec<T>) -> Self {
        SpecSource::Instances(values)
    }

    pub fn reader(reader: impl Read + 'static) -> Self {
        SpecSource::Reader(Box::new(reader))
    }
}

impl<T> From<Value> for SpecSource<T> {
    fn from(value: Value) -> Self {
        SpecSource::Value(value)
    }
}

impl<T> From<Map<String, Value>> for SpecSource<T> {
    fn from(map: Map<String, Value>) -> Self {
        SpecSource::Value(Value::Object(map))
    }
}

impl<T> From<&str> for SpecSource<T> {
    fn from(text: &str) -> Self {
        SpecSource::Text(text.to_string())
    }
}

impl<T> From<String> for SpecSource<T> {
    fn from(text: String) -> Self {
        SpecSource::Text(text)
    }
}

impl<T> From<&[u8]> for SpecSource<T> {
    fn from(bytes: &[u8]) -> Self {
        SpecSource::Bytes(bytes.to_vec())
    }
}

impl<T> From<Vec<u8>> for SpecSource<T> {
    fn from(bytes: Vec<u8>) -> Self {
        SpecSource::Bytes(bytes)
    }
}

/// Construction output: a single instance or one per input element.
#[derive(Debug, Clone, PartialEq)]
pub enum Constructed<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Constructed<T> {
    pub fn members(&self) -> impl Iterator<Item = &T> {
        match self {
            Constructed::One(value) => std::slice::from_ref(value).iter(),
            Constructed::Many(values) => values.iter(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Constructed::One(value) => vec![value],
            Constructed::Many(values) => values,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Constructed::One(_) => 1,
            Constructed::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Specification> Constructed<T> {
    /// Unwrap a single instance; a list input is a caller error here.
    pub fn into_one(self) -> Result<T, SpecificationError> {
        match self {
            Constructed::One(value) => Ok(value),
            Constructed::Many(mut values) if values.len() == 1 => Ok(values.remove(0)),
            Constructed::Many(values) => Err(SpecificationError::invalid(
                T::SPECIFICATION_TYPE,
                vec![format!(
                    "expected a single instance but input produced {}",
                    values.len()
                )],
            )),
        }
    }
}

/// Shared construction context.
pub struct BuildContext<'a> {
    pub templates: Option<&'a TemplateManager>,
}

impl<'a> BuildContext<'a> {
    pub fn new(templates: Option<&'a TemplateManager>) -> Self {
        BuildContext { templates }
    }
}

// ---------------------------------------------------------------------------
// Specification traits
// ---------------------------------------------------------------------------

pub trait Specification: Sized + Clone + PartialEq + std::fmt::Debug {
    /// Stable type name used in template manifests and error messages.
    const SPECIFICATION_TYPE: &'static str;

    /// Static descriptor table for this type's constructor fields.
    fn schema() -> &'static [FieldDescriptor];

    /// Build from a field reader whose map already passed the required-field
    /// check. Errors abort this instance with a single message.
    fn from_fields(fields: &mut FieldReader, ctx: &BuildContext) -> Result<Self, String>;

    /// Serialize to the JSON shape `create` accepts; round-trippable.
    fn to_value(&self) -> Value;

    /// Validation messages for this object alone.
    fn validate_self(&self) -> Vec<String>;

    /// Validation messages for this object and everything nested in it.
    fn validate(&self) -> Vec<String> {
        self.validate_self()
    }

    fn properties(&self) -> &PropertyMap;

    fn properties_mut(&mut self) -> &mut PropertyMap;

    /// Identity used to match entries when overlaying list fields.
    fn identity(&self) -> Option<&str> {
        None
    }

    /// Construction from a bare scalar string, for types that allow it
    /// (a unit name, a metric name). Default: not allowed.
    fn from_scalar(_text: &str) -> Option<Self> {
        None
    }
}

pub trait TemplatedSpecification: Specification {
    fn template_name(&self) -> Option<&str>;

    fn set_template_name(&mut self, name: Option<String>);

    /// Update typed fields from a partial configuration: present key wins,
    /// absent key keeps the old value.
    fn apply_configuration(&mut self, cfg: &Map<String, Value>, ctx: &BuildContext)
    -> Result<(), String>;

    /// Full overlay: merge the `properties` sub-map, then apply typed fields.
    fn overlay_configuration(
        &mut self,
        cfg: &Map<String, Value>,
        ctx: &BuildContext,
    ) -> Result<(), String> {
        if let Some(Value::Object(extra)) = cfg.get("properties") {
            merge_maps(self.properties_mut(), extra);
        }
        self.apply_configuration(cfg, ctx)
    }

    /// Whether a raw overlay entry refers to this instance.
    fn identities_match(&self, cfg: &Map<String, Value>) -> bool {
        let declared = cfg
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| cfg.get("field").and_then(Value::as_str))
            .or_else(|| cfg.get("template_name").and_then(Value::as_str));
        match (self.identity(), declared) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => false,
        }
    }

    /// Build one or many instances, failing with a single aggregated error
    /// that names every collected problem.
    fn create(
        data: impl Into<SpecSource<Self>>,
        templates: Option<&TemplateManager>,
    ) -> Result<Constructed<Self>, SpecificationError> {
        let ctx = BuildContext::new(templates);
        let mut messages = Vec::new();
        let built = create_from_source(data.into(), &ctx, &mut messages);

        if let Some(constructed) = &built {
            for member in constructed.members() {
                messages.extend(member.validate());
            }
        }

        match built {
            Some(constructed) if messages.is_empty() => Ok(constructed),
            _ => {
                if messages.is_empty() {
                    messages.push("construction produced no value".to_string());
                }
                Err(SpecificationError::invalid(
                    Self::SPECIFICATION_TYPE,
                    messages,
                ))
            }
        }
    }

    /// Validate-mode construction: collect every problem instead of failing
    /// on the first. An empty result means the input is valid.
    fn check(
        data: impl Into<SpecSource<Self>>,
        templates: Option<&TemplateManager>,
    ) -> Vec<String> {
        let ctx = BuildContext::new(templates);
        let mut messages = Vec::new();
        if let Some(constructed) = create_from_source(data.into(), &ctx, &mut messages) {
            for member in constructed.members() {
                messages.extend(member.validate());
            }
        }
        messages
    }
}

// ---------------------------------------------------------------------------
// Construction engine
// ---------------------------------------------------------------------------

/// Normalize the input and dispatch. Failed elements push messages and yield
/// `None` (or drop out of the produced list) rather than panicking.
pub(crate) fn create_from_source<T: TemplatedSpecification>(
    source: SpecSource<T>,
    ctx: &BuildContext,
    messages: &mut Vec<String>,
) -> Option<Constructed<T>> {
    match source {
        SpecSource::Instance(value) => Some(Constructed::One(value)),
        SpecSource::Instances(values) => Some(Constructed::Many(values)),
        SpecSource::Reader(mut reader) => {
            let mut bytes = Vec::new();
            if let Err(error) = reader.read_to_end(&mut bytes) {
                messages.push(format!("could not read input stream: {}", error));
                return None;
            }
            create_from_source(SpecSource::Bytes(bytes), ctx, messages)
        }
        SpecSource::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => create_from_source(SpecSource::Text(text), ctx, messages),
            Err(_) => {
                messages.push("input bytes are not valid UTF-8".to_string());
                None
            }
        },
        SpecSource::Text(text) => {
            let value = decode_text::<T>(&text, messages)?;
            create_from_source(SpecSource::Value(value), ctx, messages)
        }
        SpecSource::Value(value) => build_value(value, ctx, messages),
    }
}

/// Text that looks like a JSON object/array is parsed; on failure the
/// problem is logged and the text degrades to scalar handling.
fn decode_text<T: Specification>(text: &str, _messages: &mut [String]) -> Option<Value> {
    let trimmed = text.trim();
    let looks_like_json = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));

    if looks_like_json {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => return Some(value),
            Err(error) => {
                logging::warn(
                    Component::Specification,
                    Some(T::SPECIFICATION_TYPE),
                    &format!(
                        "input looked like JSON but could not be parsed ({}); \
                         treating it as plain text",
                        error
                    ),
                );
            }
        }
    }

    Some(Value::String(trimmed.to_string()))
}

fn build_value<T: TemplatedSpecification>(
    value: Value,
    ctx: &BuildContext,
    messages: &mut Vec<String>,
) -> Option<Constructed<T>> {
    match value {
        Value::Object(map) => build_from_map(&map, ctx, messages).map(Constructed::One),
        Value::Array(elements) => {
            let mut built = Vec::new();
            for element in elements {
                match build_value(element, ctx, messages) {
                    Some(Constructed::One(instance)) => built.push(instance),
                    Some(Constructed::Many(instances)) => built.extend(instances),
                    None => {}
                }
            }
            Some(Constructed::Many(built))
        }
        Value::String(text) => match T::from_scalar(&text) {
            Some(instance) => Some(Constructed::One(instance)),
            None => {
                messages.push(format!(
                    "a {} cannot be built from the scalar value '{}'",
                    T::SPECIFICATION_TYPE,
                    text
                ));
                None
            }
        },
        other => {
            messages.push(format!(
                "a {} cannot be built from the value '{}'",
                T::SPECIFICATION_TYPE,
                other
            ));
            None
        }
    }
}

/// Build one instance from a mapping, resolving template references first.
pub(crate) fn build_from_map<T: TemplatedSpecification>(
    map: &Map<String, Value>,
    ctx: &BuildContext,
    messages: &mut Vec<String>,
) -> Option<T> {
    let template_names = template_names(map);

    if !template_names.is_empty() {
        if let Some(manager) = ctx.templates {
            // Multiple templates merge left to right, later names overriding
            // earlier ones, before the caller's own keys are overlaid.
            let mut base = Map::new();
            for name in &template_names {
                match manager.get_template(T::SPECIFICATION_TYPE, name) {
                    Some(template) => merge_maps(&mut base, template),
                    None => {
                        messages.push(format!(
                            "'{}' is not a known {} template",
                            name,
                            T::SPECIFICATION_TYPE
                        ));
                        return None;
                    }
                }
            }

            let mut instance = build_plain::<T>(&base, ctx, messages)?;
            instance.set_template_name(Some(template_names.join(",")));

            let mut overlay = map.clone();
            for key in TEMPLATE_KEYS {
                overlay.remove(key);
            }
            if let Err(message) = instance.overlay_configuration(&overlay, ctx) {
                messages.push(message);
                return None;
            }
            return Some(instance);
        }

        // No manager available: keep the reference verbatim and construct
        // from the remaining keys alone.
        logging::debug(
            Component::Template,
            Some(T::SPECIFICATION_TYPE),
            &format!(
                "no template manager supplied; '{}' kept unresolved",
                template_names.join(",")
            ),
        );
        let mut instance = build_plain::<T>(map, ctx, messages)?;
        instance.set_template_name(Some(template_names.join(",")));
        return Some(instance);
    }

    build_plain(map, ctx, messages)
}

fn build_plain<T: Specification>(
    map: &Map<String, Value>,
    ctx: &BuildContext,
    messages: &mut Vec<String>,
) -> Option<T> {
    let missing: Vec<&str> = T::schema()
        .iter()
        .filter(|descriptor| descriptor.required && !map.contains_key(descriptor.name))
        .map(|descriptor| descriptor.name)
        .collect();

    if !missing.is_empty() {
        messages.push(format!(
            "{} is missing required fields: {}",
            T::SPECIFICATION_TYPE,
            missing.join(", ")
        ));
        return None;
    }

    let mut reader = FieldReader::new(map);
    match T::from_fields(&mut reader, ctx) {
        Ok(instance) => Some(instance),
        Err(message) => {
            messages.push(message);
            None
        }
    }
}

/// Build exactly one nested instance; used by field takes and overlays.
/// Validation is deferred to the enclosing object's `validate`.
pub(crate) fn build_single<C: TemplatedSpecification>(
    value: &Value,
    ctx: &BuildContext,
) -> Result<C, String> {
    let mut messages = Vec::new();
    match create_from_source::<C>(SpecSource::Value(value.clone()), ctx, &mut messages) {
        Some(Constructed::One(instance)) if messages.is_empty() => Ok(instance),
        Some(_) if messages.is_empty() => {
            Err(format!("expected a single {}", C::SPECIFICATION_TYPE))
        }
        _ => Err(messages.join("; ")),
    }
}

fn template_names(map: &Map<String, Value>) -> Vec<String> {
    let mut names = Vec::new();
    for key in TEMPLATE_KEYS {
        match map.get(key) {
            Some(Value::String(name)) => names.push(name.clone()),
            Some(Value::Array(elements)) => {
                for element in elements {
                    if let Value::String(name) = element {
                        names.push(name.clone());
                    }
                }
            }
            _ => {}
        }
    }
    names
}

/// Non-expanding dictionary merge: nested maps merge recursively, everything
/// else is replaced by the overlay's value.
pub fn merge_maps(base: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Normalize a raw path to ordered segments: a "/"-joined string splits,
/// a list passes through, empty segments drop out.
pub fn to_segments(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::String(text) => Ok(text
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(String::from)
            .collect()),
        Value::Array(elements) => {
            let mut segments = Vec::with_capacity(elements.len());
            for element in elements {
                match element {
                    Value::String(text) if !text.trim().is_empty() => {
                        segments.push(text.trim().to_string());
                    }
                    Value::Number(number) => segments.push(number.to_string()),
                    other => return Err(format!("'{}' is not a valid path segment", other)),
                }
            }
            Ok(segments)
        }
        other => Err(format!("'{}' is not a valid path", other)),
    }
}

// ---------------------------------------------------------------------------
// Field reader
// ---------------------------------------------------------------------------

/// Typed access to a configuration mapping, tracking which keys have been
/// claimed so the remainder can be swept into `properties`.
pub struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    claimed: std::collections::BTreeSet<String>,
}

impl<'a> FieldReader<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        let mut claimed = std::collections::BTreeSet::new();
        for key in TEMPLATE_KEYS {
            claimed.insert(key.to_string());
        }
        claimed.insert("properties".to_string());
        FieldReader { map, claimed }
    }

    fn claim(&mut self, key: &str) -> Option<&'a Value> {
        self.claimed.insert(key.to_string());
        match self.map.get(key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    pub fn take_text(&mut self, key: &str) -> Result<Option<String>, String> {
        match self.claim(key) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(other) => Err(format!("field '{}': '{}' is not text", key, other)),
        }
    }

    pub fn take_required_text(&mut self, key: &str) -> Result<String, String> {
        self.take_text(key)?
            .ok_or_else(|| format!("missing required field '{}'", key))
    }

    /// Numbers, or numeric-looking strings coerced to float.
    pub fn take_number(&mut self, key: &str) -> Result<Option<f64>, String> {
        match self.claim(key) {
            None => Ok(None),
            Some(Value::Number(number)) => Ok(number.as_f64()),
            Some(Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| format!("field '{}': '{}' is not numeric", key, text)),
            Some(other) => Err(format!("field '{}': '{}' is not numeric", key, other)),
        }
    }

    pub fn take_required_number(&mut self, key: &str) -> Result<f64, String> {
        self.take_number(key)?
            .ok_or_else(|| format!("missing required field '{}'", key))
    }

    pub fn take_bool(&mut self, key: &str) -> Result<Option<bool>, String> {
        match self.claim(key) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::String(text)) => match text.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" => Ok(Some(false)),
                _ => Err(format!("field '{}': '{}' is not a boolean", key, text)),
            },
            Some(other) => Err(format!("field '{}': '{}' is not a boolean", key, other)),
        }
    }

    /// A path field, normalized to segments; absent means empty.
    pub fn take_segments(&mut self, key: &str) -> Result<Vec<String>, String> {
        match self.claim(key) {
            None => Ok(Vec::new()),
            Some(value) => to_segments(value).map_err(|error| format!("field '{}': {}", key, error)),
        }
    }

    pub fn take_text_list(&mut self, key: &str) -> Result<Vec<String>, String> {
        match self.claim(key) {
            None => Ok(Vec::new()),
            Some(Value::String(text)) => Ok(vec![text.clone()]),
            Some(Value::Array(elements)) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    match element {
                        Value::String(text) => values.push(text.clone()),
                        Value::Number(number) => values.push(number.to_string()),
                        other => {
                            return Err(format!(
                                "field '{}': '{}' is not a text value",
                                key, other
                            ));
                        }
                    }
                }
                Ok(values)
            }
            Some(other) => Err(format!("field '{}': '{}' is not a list", key, other)),
        }
    }

    pub fn take_spec<C: TemplatedSpecification>(
        &mut self,
        key: &str,
        ctx: &BuildContext,
    ) -> Result<Option<C>, String> {
        match self.claim(key) {
            None => Ok(None),
            Some(value) => build_single(value, ctx)
                .map(Some)
                .map_err(|error| format!("field '{}': {}", key, error)),
        }
    }

    pub fn take_required_spec<C: TemplatedSpecification>(
        &mut self,
        key: &str,
        ctx: &BuildContext,
    ) -> Result<C, String> {
        self.take_spec(key, ctx)?
            .ok_or_else(|| format!("missing required field '{}'", key))
    }

    /// A list of nested specifications; a bare mapping counts as one entry.
    pub fn take_spec_list<C: TemplatedSpecification>(
        &mut self,
        key: &str,
        ctx: &BuildContext,
    ) -> Result<Vec<C>, String> {
        match self.claim(key) {
            None => Ok(Vec::new()),
            Some(Value::Array(elements)) => {
                let mut built = Vec::with_capacity(elements.len());
                for element in elements {
                    built.push(
                        build_single(element, ctx)
                            .map_err(|error| format!("field '{}': {}", key, error))?,
                    );
                }
                Ok(built)
            }
            Some(value) => build_single(value, ctx)
                .map(|instance| vec![instance])
                .map_err(|error| format!("field '{}': {}", key, error)),
        }
    }

    /// Sweep every unclaimed key, plus an explicit `properties` sub-map,
    /// into the catch-all. Call last in `from_fields`.
    pub fn finish_properties(&mut self) -> PropertyMap {
        let mut properties = Map::new();
        if let Some(Value::Object(declared)) = self.map.get("properties") {
            properties = declared.clone();
        }
        for (key, value) in self.map {
            if !self.claimed.contains(key) {
                properties.insert(key.clone(), value.clone());
            }
        }
        properties
    }
}

// ---------------------------------------------------------------------------
// Overlay helpers
// ---------------------------------------------------------------------------

pub fn overlay_text(slot: &mut String, cfg: &Map<String, Value>, key: &str) {
    if let Some(Value::String(text)) = cfg.get(key) {
        *slot = text.clone();
    }
}

pub fn overlay_opt_text(slot: &mut Option<String>, cfg: &Map<String, Value>, key: &str) {
    if let Some(Value::String(text)) = cfg.get(key) {
        *slot = Some(text.clone());
    }
}

pub fn overlay_number(slot: &mut f64, cfg: &Map<String, Value>, key: &str) {
    match cfg.get(key) {
        Some(Value::Number(number)) => {
            if let Some(value) = number.as_f64() {
                *slot = value;
            }
        }
        Some(Value::String(text)) => {
            if let Ok(value) = text.trim().parse() {
                *slot = value;
            }
        }
        _ => {}
    }
}

pub fn overlay_bool(slot: &mut bool, cfg: &Map<String, Value>, key: &str) {
    if let Some(Value::Bool(flag)) = cfg.get(key) {
        *slot = *flag;
    }
}

pub fn overlay_segments(
    slot: &mut Vec<String>,
    cfg: &Map<String, Value>,
    key: &str,
) -> Result<(), String> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(value) => {
            *slot = to_segments(value).map_err(|error| format!("field '{}': {}", key, error))?;
            Ok(())
        }
    }
}

pub fn overlay_text_list(slot: &mut Vec<String>, cfg: &Map<String, Value>, key: &str) {
    match cfg.get(key) {
        Some(Value::String(text)) => *slot = vec![text.clone()],
        Some(Value::Array(elements)) => {
            *slot = elements
                .iter()
                .filter_map(|element| element.as_str().map(String::from))
                .collect();
        }
        _ => {}
    }
}

/// Overlay a nested specification field: recurse into the existing value,
/// or construct fresh when none exists yet.
pub fn overlay_opt_spec<C: TemplatedSpecification>(
    slot: &mut Option<C>,
    cfg: &Map<String, Value>,
    key: &str,
    ctx: &BuildContext,
) -> Result<(), String> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(sub)) => match slot {
            Some(existing) => existing
                .overlay_configuration(sub, ctx)
                .map_err(|error| format!("field '{}': {}", key, error)),
            None => {
                *slot = Some(
                    build_single(&Value::Object(sub.clone()), ctx)
                        .map_err(|error| format!("field '{}': {}", key, error))?,
                );
                Ok(())
            }
        },
        Some(value) => {
            *slot = Some(
                build_single(value, ctx).map_err(|error| format!("field '{}': {}", key, error))?,
            );
            Ok(())
        }
    }
}

pub fn overlay_spec<C: TemplatedSpecification>(
    slot: &mut C,
    cfg: &Map<String, Value>,
    key: &str,
    ctx: &BuildContext,
) -> Result<(), String> {
    match cfg.get(key) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Object(sub)) => slot
            .overlay_configuration(sub, ctx)
            .map_err(|error| format!("field '{}': {}", key, error)),
        Some(value) => {
            *slot =
                build_single(value, ctx).map_err(|error| format!("field '{}': {}", key, error))?;
            Ok(())
        }
    }
}

/// Overlay a list field by identity: matched entries are overlaid in place,
/// unmatched entries are appended. Existing entries are never removed or
/// reordered.
pub fn overlay_spec_list<C: TemplatedSpecification>(
    list: &mut Vec<C>,
    cfg: &Map<String, Value>,
    key: &str,
    ctx: &BuildContext,
) -> Result<(), String> {
    let entries: Vec<&Value> = match cfg.get(key) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(elements)) => elements.iter().collect(),
        Some(single) => vec![single],
    };

    for entry in entries {
        if let Value::Object(sub) = entry {
            if let Some(existing) = list.iter_mut().find(|item| item.identities_match(sub)) {
                existing
                    .overlay_configuration(sub, ctx)
                    .map_err(|error| format!("field '{}': {}", key, error))?;
                continue;
            }
        }
        list.push(build_single(entry, ctx).map_err(|error| format!("field '{}': {}", key, error))?);
    }

    Ok(())
}

/// Serialize a list of nested specifications, omitted entirely when empty.
pub fn push_spec_list<T: Specification>(map: &mut Map<String, Value>, key: &str, list: &[T]) {
    if !list.is_empty() {
        map.insert(
            key.to_string(),
            Value::Array(list.iter().map(Specification::to_value).collect()),
        );
    }
}

/// Serialize path segments, omitted when empty.
pub fn push_segments(map: &mut Map<String, Value>, key: &str, segments: &[String]) {
    if !segments.is_empty() {
        map.insert(
            key.to_string(),
            Value::Array(
                segments
                    .iter()
                    .map(|segment| Value::String(segment.clone()))
                    .collect(),
            ),
        );
    }
}

/// Serialize the properties catch-all, omitted when empty.
pub fn push_properties(map: &mut Map<String, Value>, properties: &PropertyMap) {
    if !properties.is_empty() {
        map.insert("properties".to_string(), Value::Object(properties.clone()));
    }
}
