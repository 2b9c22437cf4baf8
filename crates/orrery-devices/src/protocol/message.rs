/*!
 * INDI message model.
 *
 * Every frame on an INDI stream is one of the variants of [`IndiMessage`].
 * Property vectors are a single [`Vector`] type tagged by operation
 * ([`VectorOp`]) and carrying a kind-specific list of elements
 * ([`Elements`]), so handlers can match exhaustively on both axes.
 */
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Operation status of a vector
///
/// A `Busy` to `Ok`/`Alert` transition signals completion of an
/// asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PropertyState {
    /// Nothing in progress
    #[default]
    Idle,
    /// Last operation succeeded
    Ok,
    /// Operation in progress
    Busy,
    /// Last operation failed
    Alert,
}

impl PropertyState {
    /// Wire literal
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyState::Idle => "Idle",
            PropertyState::Ok => "Ok",
            PropertyState::Busy => "Busy",
            PropertyState::Alert => "Alert",
        }
    }
}

impl FromStr for PropertyState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Idle" => Ok(PropertyState::Idle),
            "Ok" => Ok(PropertyState::Ok),
            "Busy" => Ok(PropertyState::Busy),
            "Alert" => Ok(PropertyState::Alert),
            other => Err(ProtocolError::invalid_literal("state", other)),
        }
    }
}

impl fmt::Display for PropertyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client access to a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PropertyPermission {
    /// `ro`
    ReadOnly,
    /// `rw`
    #[default]
    ReadWrite,
    /// `wo`
    WriteOnly,
}

impl PropertyPermission {
    /// Wire literal
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyPermission::ReadOnly => "ro",
            PropertyPermission::ReadWrite => "rw",
            PropertyPermission::WriteOnly => "wo",
        }
    }
}

impl FromStr for PropertyPermission {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ro" => Ok(PropertyPermission::ReadOnly),
            "rw" => Ok(PropertyPermission::ReadWrite),
            "wo" => Ok(PropertyPermission::WriteOnly),
            other => Err(ProtocolError::invalid_literal("permission", other)),
        }
    }
}

/// Selection rule of a switch vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SwitchRule {
    /// Exactly one switch is on
    #[default]
    OneOfMany,
    /// At most one switch is on
    AtMostOne,
    /// Any combination
    AnyOfMany,
}

impl SwitchRule {
    /// Wire literal
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchRule::OneOfMany => "OneOfMany",
            SwitchRule::AtMostOne => "AtMostOne",
            SwitchRule::AnyOfMany => "AnyOfMany",
        }
    }
}

impl FromStr for SwitchRule {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OneOfMany" => Ok(SwitchRule::OneOfMany),
            "AtMostOne" => Ok(SwitchRule::AtMostOne),
            "AnyOfMany" => Ok(SwitchRule::AnyOfMany),
            other => Err(ProtocolError::invalid_literal("rule", other)),
        }
    }
}

/// What a vector frame does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorOp {
    /// `def*Vector`: the driver declares a property
    Def,
    /// `set*Vector`: the driver updates a property
    Set,
    /// `new*Vector`: the client commands the driver
    New,
}

impl VectorOp {
    /// Tag prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            VectorOp::Def => "def",
            VectorOp::Set => "set",
            VectorOp::New => "new",
        }
    }
}

/// Value kind of a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorKind {
    /// Numbers
    Number,
    /// Text
    Text,
    /// Switches
    Switch,
    /// Read-only status lights
    Light,
    /// Binary payloads
    Blob,
}

impl VectorKind {
    /// Tag infix (`defNumberVector` → `Number`)
    pub fn tag_name(&self) -> &'static str {
        match self {
            VectorKind::Number => "Number",
            VectorKind::Text => "Text",
            VectorKind::Switch => "Switch",
            VectorKind::Light => "Light",
            VectorKind::Blob => "BLOB",
        }
    }

    /// Parse a tag infix
    pub fn from_tag_name(name: &str) -> Option<Self> {
        match name {
            "Number" => Some(VectorKind::Number),
            "Text" => Some(VectorKind::Text),
            "Switch" => Some(VectorKind::Switch),
            "Light" => Some(VectorKind::Light),
            "BLOB" => Some(VectorKind::Blob),
            _ => None,
        }
    }
}

/// Number element
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NumberElement {
    /// Element name
    pub name: String,
    /// Display label
    pub label: String,
    /// Current value
    pub value: f64,
    /// printf-style display format
    pub format: String,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
    /// Step, 0 when unconstrained
    pub step: f64,
}

impl NumberElement {
    /// Create a number element with the given value
    pub fn new<S: Into<String>>(name: S, value: f64) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            value,
            format: "%g".to_string(),
            ..Default::default()
        }
    }

    /// Set the allowed range
    pub fn with_range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = min;
        self.max = max;
        self.step = step;
        self
    }
}

/// Text element
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextElement {
    /// Element name
    pub name: String,
    /// Display label
    pub label: String,
    /// Current value
    pub value: String,
}

impl TextElement {
    /// Create a text element
    pub fn new<S: Into<String>, V: Into<String>>(name: S, value: V) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            value: value.into(),
        }
    }
}

/// Switch element
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwitchElement {
    /// Element name
    pub name: String,
    /// Display label
    pub label: String,
    /// `On` when true
    pub value: bool,
}

impl SwitchElement {
    /// Create a switch element
    pub fn new<S: Into<String>>(name: S, value: bool) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            value,
        }
    }
}

/// Light element
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LightElement {
    /// Element name
    pub name: String,
    /// Display label
    pub label: String,
    /// Current status
    pub value: PropertyState,
}

impl LightElement {
    /// Create a light element
    pub fn new<S: Into<String>>(name: S, value: PropertyState) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            value,
        }
    }
}

/// BLOB element
///
/// The payload is kept base64 encoded as received; [`BlobElement::decode`]
/// yields the raw bytes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlobElement {
    /// Element name
    pub name: String,
    /// Display label
    pub label: String,
    /// File suffix such as `.fits`
    pub format: String,
    /// Decoded size in bytes
    pub size: usize,
    /// Base64 payload
    pub value: String,
}

impl BlobElement {
    /// Create a BLOB element from raw bytes
    pub fn new<S: Into<String>, F: Into<String>>(name: S, format: F, data: &[u8]) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            format: format.into(),
            size: data.len(),
            value: STANDARD.encode(data),
        }
    }

    /// Decode the payload
    pub fn decode(&self) -> Result<Bytes, ProtocolError> {
        STANDARD
            .decode(self.value.as_bytes())
            .map(Bytes::from)
            .map_err(|e| ProtocolError::InvalidBlob(e.to_string()))
    }
}

/// Kind-tagged element list of a vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Elements {
    /// Number elements
    Number(Vec<NumberElement>),
    /// Text elements
    Text(Vec<TextElement>),
    /// Switch elements
    Switch(Vec<SwitchElement>),
    /// Light elements
    Light(Vec<LightElement>),
    /// BLOB elements
    Blob(Vec<BlobElement>),
}

impl Elements {
    /// Value kind
    pub fn kind(&self) -> VectorKind {
        match self {
            Elements::Number(_) => VectorKind::Number,
            Elements::Text(_) => VectorKind::Text,
            Elements::Switch(_) => VectorKind::Switch,
            Elements::Light(_) => VectorKind::Light,
            Elements::Blob(_) => VectorKind::Blob,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Elements::Number(e) => e.len(),
            Elements::Text(e) => e.len(),
            Elements::Switch(e) => e.len(),
            Elements::Light(e) => e.len(),
            Elements::Blob(e) => e.len(),
        }
    }

    /// Whether the vector has no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element names in declaration order
    pub fn names(&self) -> Vec<&str> {
        match self {
            Elements::Number(e) => e.iter().map(|e| e.name.as_str()).collect(),
            Elements::Text(e) => e.iter().map(|e| e.name.as_str()).collect(),
            Elements::Switch(e) => e.iter().map(|e| e.name.as_str()).collect(),
            Elements::Light(e) => e.iter().map(|e| e.name.as_str()).collect(),
            Elements::Blob(e) => e.iter().map(|e| e.name.as_str()).collect(),
        }
    }

    /// Copy values from an update into the declared elements
    ///
    /// Every element of `update` must already exist here; nothing is
    /// modified when any of them is unknown.
    pub fn merge(&mut self, vector: &str, update: &Elements) -> Result<(), ProtocolError> {
        fn merge_into<T, F>(
            vector: &str,
            target: &mut [T],
            source: &[T],
            name: F,
            copy: fn(&mut T, &T),
        ) -> Result<(), ProtocolError>
        where
            F: Fn(&T) -> &str,
        {
            let mut indexes = Vec::with_capacity(source.len());
            for element in source {
                match target.iter().position(|t| name(t) == name(element)) {
                    Some(index) => indexes.push(index),
                    None => {
                        return Err(ProtocolError::UnknownElement {
                            vector: vector.to_string(),
                            element: name(element).to_string(),
                        })
                    }
                }
            }
            for (index, element) in indexes.into_iter().zip(source) {
                copy(&mut target[index], element);
            }
            Ok(())
        }

        match (self, update) {
            (Elements::Number(target), Elements::Number(source)) => {
                merge_into(vector, target, source, |e| &e.name, |t, s| t.value = s.value)
            }
            (Elements::Text(target), Elements::Text(source)) => {
                merge_into(vector, target, source, |e| &e.name, |t, s| t.value = s.value.clone())
            }
            (Elements::Switch(target), Elements::Switch(source)) => {
                merge_into(vector, target, source, |e| &e.name, |t, s| t.value = s.value)
            }
            (Elements::Light(target), Elements::Light(source)) => {
                merge_into(vector, target, source, |e| &e.name, |t, s| t.value = s.value)
            }
            (Elements::Blob(target), Elements::Blob(source)) => {
                merge_into(vector, target, source, |e| &e.name, |t, s| {
                    t.format = s.format.clone();
                    t.size = s.size;
                    t.value = s.value.clone();
                })
            }
            _ => Err(ProtocolError::KindMismatch(vector.to_string())),
        }
    }
}

/// A property vector frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// Operation
    pub op: VectorOp,
    /// Device name
    pub device: String,
    /// Vector name
    pub name: String,
    /// Display label
    pub label: String,
    /// Display group
    pub group: String,
    /// Client access
    pub perm: PropertyPermission,
    /// Operation status
    pub state: PropertyState,
    /// Selection rule, meaningful for switch vectors only
    pub rule: SwitchRule,
    /// Worst-case completion time in seconds
    pub timeout: f64,
    /// ISO 8601 timestamp set by the driver
    pub timestamp: Option<String>,
    /// Commentary attached by the driver
    pub message: Option<String>,
    /// Elements
    pub elements: Elements,
}

impl Vector {
    /// Create a vector with default attributes
    pub fn new<D: Into<String>, N: Into<String>>(
        op: VectorOp,
        device: D,
        name: N,
        elements: Elements,
    ) -> Self {
        let name = name.into();
        Self {
            op,
            device: device.into(),
            label: name.clone(),
            name,
            group: String::new(),
            perm: PropertyPermission::ReadWrite,
            state: PropertyState::Idle,
            rule: SwitchRule::OneOfMany,
            timeout: 0.0,
            timestamp: None,
            message: None,
            elements,
        }
    }

    /// Number command (`newNumberVector`)
    pub fn new_number<D, N>(device: D, name: N, values: &[(&str, f64)]) -> Self
    where
        D: Into<String>,
        N: Into<String>,
    {
        let elements = values.iter().map(|(n, v)| NumberElement::new(*n, *v)).collect();
        Self::new(VectorOp::New, device, name, Elements::Number(elements))
    }

    /// Switch command (`newSwitchVector`)
    pub fn new_switch<D, N>(device: D, name: N, values: &[(&str, bool)]) -> Self
    where
        D: Into<String>,
        N: Into<String>,
    {
        let elements = values.iter().map(|(n, v)| SwitchElement::new(*n, *v)).collect();
        Self::new(VectorOp::New, device, name, Elements::Switch(elements))
    }

    /// Text command (`newTextVector`)
    pub fn new_text<D, N>(device: D, name: N, values: &[(&str, &str)]) -> Self
    where
        D: Into<String>,
        N: Into<String>,
    {
        let elements = values.iter().map(|(n, v)| TextElement::new(*n, *v)).collect();
        Self::new(VectorOp::New, device, name, Elements::Text(elements))
    }

    /// Set the state
    pub fn with_state(mut self, state: PropertyState) -> Self {
        self.state = state;
        self
    }

    /// Set the permission
    pub fn with_perm(mut self, perm: PropertyPermission) -> Self {
        self.perm = perm;
        self
    }

    /// Set the switch rule
    pub fn with_rule(mut self, rule: SwitchRule) -> Self {
        self.rule = rule;
        self
    }

    /// Set the group
    pub fn with_group<S: Into<String>>(mut self, group: S) -> Self {
        self.group = group.into();
        self
    }

    /// Set the driver message
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Value kind
    pub fn kind(&self) -> VectorKind {
        self.elements.kind()
    }

    /// Whether this frame declares the property
    pub fn is_def(&self) -> bool {
        self.op == VectorOp::Def
    }

    /// Wire tag, e.g. `setNumberVector`
    pub fn tag(&self) -> String {
        format!("{}{}Vector", self.op.prefix(), self.kind().tag_name())
    }

    /// Number element by name
    pub fn number_element(&self, name: &str) -> Option<&NumberElement> {
        match &self.elements {
            Elements::Number(elements) => elements.iter().find(|e| e.name == name),
            _ => None,
        }
    }

    /// Number value by name
    pub fn number(&self, name: &str) -> Option<f64> {
        self.number_element(name).map(|e| e.value)
    }

    /// Text value by name
    pub fn text(&self, name: &str) -> Option<&str> {
        match &self.elements {
            Elements::Text(elements) => elements
                .iter()
                .find(|e| e.name == name)
                .map(|e| e.value.as_str()),
            _ => None,
        }
    }

    /// Switch value by name
    pub fn switch(&self, name: &str) -> Option<bool> {
        match &self.elements {
            Elements::Switch(elements) => elements.iter().find(|e| e.name == name).map(|e| e.value),
            _ => None,
        }
    }

    /// Name of the first switch that is on
    pub fn first_on_switch(&self) -> Option<&str> {
        match &self.elements {
            Elements::Switch(elements) => {
                elements.iter().find(|e| e.value).map(|e| e.name.as_str())
            }
            _ => None,
        }
    }

    /// Light value by name
    pub fn light(&self, name: &str) -> Option<PropertyState> {
        match &self.elements {
            Elements::Light(elements) => elements.iter().find(|e| e.name == name).map(|e| e.value),
            _ => None,
        }
    }

    /// BLOB element by name
    pub fn blob(&self, name: &str) -> Option<&BlobElement> {
        match &self.elements {
            Elements::Blob(elements) => elements.iter().find(|e| e.name == name),
            _ => None,
        }
    }

    /// Apply a `Set` update on top of this declaration
    pub fn apply(&mut self, update: &Vector) -> Result<(), ProtocolError> {
        self.elements.merge(&self.name, &update.elements)?;
        self.state = update.state;
        self.timeout = update.timeout;
        self.timestamp = update.timestamp.clone();
        self.message = update.message.clone();
        self.op = update.op;
        Ok(())
    }
}

/// Free-form driver message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Originating device, `None` for server-wide messages
    pub device: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: Option<String>,
    /// Text
    pub text: String,
}

/// `delProperty`: removes one vector, or the whole device when `name` is absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelProperty {
    /// Device name
    pub device: String,
    /// Vector name
    pub name: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: Option<String>,
    /// Commentary
    pub message: Option<String>,
}

/// `getProperties` handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetProperties {
    /// Protocol version
    pub version: String,
    /// Restrict to one device
    pub device: Option<String>,
    /// Restrict to one vector
    pub name: Option<String>,
}

impl Default for GetProperties {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            device: None,
            name: None,
        }
    }
}

/// When a client wants BLOB frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlobPolicy {
    /// No BLOBs
    Never,
    /// BLOBs along with everything else
    Also,
    /// BLOBs only
    Only,
}

impl BlobPolicy {
    /// Wire literal
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobPolicy::Never => "Never",
            BlobPolicy::Also => "Also",
            BlobPolicy::Only => "Only",
        }
    }
}

impl FromStr for BlobPolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Never" => Ok(BlobPolicy::Never),
            "Also" => Ok(BlobPolicy::Also),
            "Only" => Ok(BlobPolicy::Only),
            other => Err(ProtocolError::invalid_literal("BLOB policy", other)),
        }
    }
}

/// `enableBLOB`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableBlob {
    /// Device name
    pub device: String,
    /// Restrict to one vector
    pub name: Option<String>,
    /// Policy
    pub policy: BlobPolicy,
}

/// INDI protocol version sent in `getProperties`
pub const PROTOCOL_VERSION: &str = "1.7";

/// One frame of an INDI stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndiMessage {
    /// `def*Vector`, `set*Vector` or `new*Vector`
    Vector(Vector),
    /// `message`
    Message(Message),
    /// `delProperty`
    DelProperty(DelProperty),
    /// `getProperties`
    GetProperties(GetProperties),
    /// `enableBLOB`
    EnableBlob(EnableBlob),
}

impl IndiMessage {
    /// Device the frame refers to
    pub fn device(&self) -> Option<&str> {
        match self {
            IndiMessage::Vector(v) => Some(v.device.as_str()),
            IndiMessage::Message(m) => m.device.as_deref(),
            IndiMessage::DelProperty(d) => Some(d.device.as_str()),
            IndiMessage::GetProperties(g) => g.device.as_deref(),
            IndiMessage::EnableBlob(e) => Some(e.device.as_str()),
        }
    }

    /// Whether the frame removes a whole device
    pub fn is_device_removal(&self) -> bool {
        matches!(self, IndiMessage::DelProperty(DelProperty { name: None, .. }))
    }

    /// The vector carried by the frame, if any
    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            IndiMessage::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Vector> for IndiMessage {
    fn from(vector: Vector) -> Self {
        IndiMessage::Vector(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot_vector() -> Vector {
        Vector::new(
            VectorOp::Def,
            "Wheel",
            "FILTER_SLOT",
            Elements::Number(vec![
                NumberElement::new("FILTER_SLOT_VALUE", 1.0).with_range(1.0, 5.0, 1.0)
            ]),
        )
    }

    #[test]
    fn test_literals() {
        assert_eq!("Busy".parse::<PropertyState>().unwrap(), PropertyState::Busy);
        assert!("busy".parse::<PropertyState>().is_err());
        assert_eq!("ro".parse::<PropertyPermission>().unwrap(), PropertyPermission::ReadOnly);
        assert_eq!("AtMostOne".parse::<SwitchRule>().unwrap(), SwitchRule::AtMostOne);
        assert_eq!("Also".parse::<BlobPolicy>().unwrap(), BlobPolicy::Also);
    }

    #[test]
    fn test_apply_merges_values_and_keeps_range() {
        let mut declared = slot_vector();
        let update = Vector::new(
            VectorOp::Set,
            "Wheel",
            "FILTER_SLOT",
            Elements::Number(vec![NumberElement::new("FILTER_SLOT_VALUE", 3.0)]),
        )
        .with_state(PropertyState::Busy);

        declared.apply(&update).unwrap();

        let element = declared.number_element("FILTER_SLOT_VALUE").unwrap();
        assert_eq!(element.value, 3.0);
        assert_eq!(element.max, 5.0);
        assert_eq!(declared.state, PropertyState::Busy);
        assert_eq!(declared.op, VectorOp::Set);
    }

    #[test]
    fn test_apply_rejects_unknown_element() {
        let mut declared = slot_vector();
        let update = Vector::new(
            VectorOp::Set,
            "Wheel",
            "FILTER_SLOT",
            Elements::Number(vec![NumberElement::new("BOGUS", 3.0)]),
        );

        let err = declared.apply(&update).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownElement { .. }));
        assert_eq!(declared.number("FILTER_SLOT_VALUE"), Some(1.0));
    }

    #[test]
    fn test_apply_rejects_kind_change() {
        let mut declared = slot_vector();
        let update = Vector::new_switch("Wheel", "FILTER_SLOT", &[("FILTER_SLOT_VALUE", true)]);
        assert!(matches!(declared.apply(&update), Err(ProtocolError::KindMismatch(_))));
    }

    #[test]
    fn test_blob_decode() {
        let blob = BlobElement::new("CCD1", ".fits", b"SIMPLE  =");
        assert_eq!(blob.size, 9);
        assert_eq!(blob.decode().unwrap().as_ref(), b"SIMPLE  =");

        let broken = BlobElement {
            value: "***".to_string(),
            ..blob
        };
        assert!(broken.decode().is_err());
    }

    #[test]
    fn test_accessors() {
        let vector = Vector::new_switch(
            "Focuser",
            "FOCUS_MOTION",
            &[("FOCUS_INWARD", false), ("FOCUS_OUTWARD", true)],
        );
        assert_eq!(vector.tag(), "newSwitchVector");
        assert_eq!(vector.first_on_switch(), Some("FOCUS_OUTWARD"));
        assert_eq!(vector.switch("FOCUS_INWARD"), Some(false));
        assert_eq!(vector.number("FOCUS_INWARD"), None);
    }

    #[test]
    fn test_device_removal() {
        let removal = IndiMessage::DelProperty(DelProperty {
            device: "CCD".to_string(),
            name: None,
            timestamp: None,
            message: None,
        });
        assert!(removal.is_device_removal());
        assert_eq!(removal.device(), Some("CCD"));
    }
}
