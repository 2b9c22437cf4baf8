/*!
 * XML codec for INDI streams.
 *
 * An INDI stream is an unrooted sequence of XML elements. [`IndiReader`]
 * pulls one top-level element at a time from any [`AsyncBufRead`],
 * turns it into an [`XmlNode`] tree and decodes that into an
 * [`IndiMessage`]. Frames that fail to decode are logged and skipped;
 * only an I/O failure ends the stream.
 */
use std::io;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, trace, warn};

use crate::error::ProtocolError;
use crate::protocol::message::{
    BlobElement, BlobPolicy, DelProperty, Elements, EnableBlob, GetProperties, IndiMessage,
    LightElement, Message, NumberElement, PropertyPermission, PropertyState, SwitchElement,
    SwitchRule, TextElement, Vector, VectorKind, VectorOp,
};
use crate::protocol::number::{format_number, parse_number};

/// A parsed XML element with its attributes, text and children
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    /// Tag name
    pub tag: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Concatenated text content
    pub text: String,
    /// Child elements
    pub children: Vec<XmlNode>,
    invalid: Option<String>,
}

impl XmlNode {
    /// Create a node with the given tag
    pub fn new<S: Into<String>>(tag: S) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Self {
        let mut node = XmlNode::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());

        for attribute in start.attributes() {
            match attribute {
                Ok(attribute) => {
                    let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
                    match attribute.unescape_value() {
                        Ok(value) => node.attributes.push((key, value.into_owned())),
                        Err(e) => node.invalid = Some(e.to_string()),
                    }
                }
                Err(e) => node.invalid = Some(e.to_string()),
            }
        }

        node
    }

    /// Attribute value by name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn required(&self, name: &'static str) -> Result<&str, ProtocolError> {
        self.attr(name)
            .ok_or_else(|| ProtocolError::missing_attribute(&self.tag, name))
    }

    fn owned(&self, name: &str) -> Option<String> {
        self.attr(name).map(str::to_string)
    }

    fn first_invalid(&self) -> Option<&str> {
        self.invalid
            .as_deref()
            .or_else(|| self.children.iter().find_map(XmlNode::first_invalid))
    }
}

fn vector_tag(tag: &str) -> Option<(VectorOp, VectorKind)> {
    let body = tag.strip_suffix("Vector")?;
    let (op, kind) = if let Some(kind) = body.strip_prefix("def") {
        (VectorOp::Def, kind)
    } else if let Some(kind) = body.strip_prefix("set") {
        (VectorOp::Set, kind)
    } else if let Some(kind) = body.strip_prefix("new") {
        (VectorOp::New, kind)
    } else {
        return None;
    };
    Some((op, VectorKind::from_tag_name(kind)?))
}

fn element_tag(op: VectorOp, kind: VectorKind) -> String {
    let prefix = if op == VectorOp::Def { "def" } else { "one" };
    format!("{}{}", prefix, kind.tag_name())
}

fn optional_number(node: &XmlNode, name: &str) -> Result<f64, ProtocolError> {
    node.attr(name).map(parse_number).transpose().map(|v| v.unwrap_or(0.0))
}

fn parse_switch(text: &str) -> Result<bool, ProtocolError> {
    match text.trim() {
        "On" => Ok(true),
        "Off" => Ok(false),
        other => Err(ProtocolError::invalid_literal("switch", other)),
    }
}

fn decode_elements(
    node: &XmlNode,
    op: VectorOp,
    kind: VectorKind,
    vector: &str,
) -> Result<Elements, ProtocolError> {
    let expected = element_tag(op, kind);
    let mut seen: Vec<&str> = Vec::with_capacity(node.children.len());

    for child in &node.children {
        if child.tag != expected {
            return Err(ProtocolError::UnexpectedElement {
                vector: node.tag.clone(),
                element: child.tag.clone(),
            });
        }
        let name = child.required("name")?;
        if seen.contains(&name) {
            return Err(ProtocolError::DuplicateElement {
                vector: vector.to_string(),
                element: name.to_string(),
            });
        }
        seen.push(name);
    }

    let label = |child: &XmlNode, name: &str| child.attr("label").unwrap_or(name).to_string();

    let elements = match kind {
        VectorKind::Number => Elements::Number(
            node.children
                .iter()
                .map(|child| -> Result<NumberElement, ProtocolError> {
                    let name = child.required("name")?;
                    Ok(NumberElement {
                        name: name.to_string(),
                        label: label(child, name),
                        value: parse_number(&child.text)?,
                        format: child.attr("format").unwrap_or("%g").to_string(),
                        min: optional_number(child, "min")?,
                        max: optional_number(child, "max")?,
                        step: optional_number(child, "step")?,
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        VectorKind::Text => Elements::Text(
            node.children
                .iter()
                .map(|child| -> Result<TextElement, ProtocolError> {
                    let name = child.required("name")?;
                    Ok(TextElement {
                        name: name.to_string(),
                        label: label(child, name),
                        value: child.text.clone(),
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        VectorKind::Switch => Elements::Switch(
            node.children
                .iter()
                .map(|child| -> Result<SwitchElement, ProtocolError> {
                    let name = child.required("name")?;
                    Ok(SwitchElement {
                        name: name.to_string(),
                        label: label(child, name),
                        value: parse_switch(&child.text)?,
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        VectorKind::Light => Elements::Light(
            node.children
                .iter()
                .map(|child| -> Result<LightElement, ProtocolError> {
                    let name = child.required("name")?;
                    Ok(LightElement {
                        name: name.to_string(),
                        label: label(child, name),
                        value: child.text.parse()?,
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
        VectorKind::Blob => Elements::Blob(
            node.children
                .iter()
                .map(|child| -> Result<BlobElement, ProtocolError> {
                    let name = child.required("name")?;
                    let size = match child.attr("size") {
                        Some(size) => size
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| ProtocolError::InvalidNumber(size.to_string()))?,
                        None => 0,
                    };
                    Ok(BlobElement {
                        name: name.to_string(),
                        label: label(child, name),
                        format: child.attr("format").unwrap_or_default().to_string(),
                        size,
                        value: child.text.chars().filter(|c| !c.is_whitespace()).collect(),
                    })
                })
                .collect::<Result<_, _>>()?,
        ),
    };

    Ok(elements)
}

fn decode_vector(node: &XmlNode, op: VectorOp, kind: VectorKind) -> Result<Vector, ProtocolError> {
    let device = node.required("device")?;
    let name = node.required("name")?;

    let state = match node.attr("state") {
        Some(state) => state.parse()?,
        None => PropertyState::Idle,
    };
    let perm = match node.attr("perm") {
        Some(perm) => perm.parse()?,
        None if kind == VectorKind::Light => PropertyPermission::ReadOnly,
        None => PropertyPermission::ReadWrite,
    };
    let rule = match node.attr("rule") {
        Some(rule) => rule.parse()?,
        None => SwitchRule::OneOfMany,
    };
    let timeout = optional_number(node, "timeout")?;

    Ok(Vector {
        op,
        device: device.to_string(),
        name: name.to_string(),
        label: node.attr("label").unwrap_or(name).to_string(),
        group: node.attr("group").unwrap_or_default().to_string(),
        perm,
        state,
        rule,
        timeout,
        timestamp: node.owned("timestamp"),
        message: node.owned("message"),
        elements: decode_elements(node, op, kind, name)?,
    })
}

/// Decode one top-level element
pub fn decode_frame(node: &XmlNode) -> Result<IndiMessage, ProtocolError> {
    if let Some(error) = node.first_invalid() {
        return Err(ProtocolError::Xml(error.to_string()));
    }

    if let Some((op, kind)) = vector_tag(&node.tag) {
        return decode_vector(node, op, kind).map(IndiMessage::Vector);
    }

    match node.tag.as_str() {
        "message" => Ok(IndiMessage::Message(Message {
            device: node.owned("device"),
            timestamp: node.owned("timestamp"),
            text: node.attr("message").unwrap_or_default().to_string(),
        })),
        "delProperty" => Ok(IndiMessage::DelProperty(DelProperty {
            device: node.required("device")?.to_string(),
            name: node.owned("name"),
            timestamp: node.owned("timestamp"),
            message: node.owned("message"),
        })),
        "getProperties" => Ok(IndiMessage::GetProperties(GetProperties {
            version: node.attr("version").unwrap_or_default().to_string(),
            device: node.owned("device"),
            name: node.owned("name"),
        })),
        "enableBLOB" => Ok(IndiMessage::EnableBlob(EnableBlob {
            device: node.required("device")?.to_string(),
            name: node.owned("name"),
            policy: node.text.parse()?,
        })),
        other => Err(ProtocolError::UnknownTag(other.to_string())),
    }
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), ProtocolError> {
    writer
        .write_event(event)
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn write_leaf(
    writer: &mut Writer<Vec<u8>>,
    start: BytesStart<'_>,
    text: &str,
) -> Result<(), ProtocolError> {
    let end = start.to_end().into_owned();
    write(writer, Event::Start(start))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(end))
}

fn push_optional(start: &mut BytesStart<'_>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        start.push_attribute((key, value));
    }
}

fn encode_vector(writer: &mut Writer<Vec<u8>>, vector: &Vector) -> Result<(), ProtocolError> {
    let tag = vector.tag();
    let kind = vector.kind();
    let is_def = vector.is_def();

    let mut start = BytesStart::new(tag.as_str());
    start.push_attribute(("device", vector.device.as_str()));
    start.push_attribute(("name", vector.name.as_str()));

    if is_def {
        start.push_attribute(("label", vector.label.as_str()));
        start.push_attribute(("group", vector.group.as_str()));
    }
    if vector.op != VectorOp::New {
        start.push_attribute(("state", vector.state.as_str()));
    }
    if is_def && kind != VectorKind::Light {
        start.push_attribute(("perm", vector.perm.as_str()));
    }
    if is_def && kind == VectorKind::Switch {
        start.push_attribute(("rule", vector.rule.as_str()));
    }
    if vector.op != VectorOp::New && (is_def || vector.timeout > 0.0) {
        start.push_attribute(("timeout", format_number(vector.timeout).as_str()));
    }
    push_optional(&mut start, "timestamp", vector.timestamp.as_deref());
    push_optional(&mut start, "message", vector.message.as_deref());

    write(writer, Event::Start(start))?;

    let element = element_tag(vector.op, kind);

    match &vector.elements {
        Elements::Number(elements) => {
            for e in elements {
                let mut start = BytesStart::new(element.as_str());
                start.push_attribute(("name", e.name.as_str()));
                if is_def {
                    start.push_attribute(("label", e.label.as_str()));
                    start.push_attribute(("format", e.format.as_str()));
                    start.push_attribute(("min", format_number(e.min).as_str()));
                    start.push_attribute(("max", format_number(e.max).as_str()));
                    start.push_attribute(("step", format_number(e.step).as_str()));
                }
                write_leaf(writer, start, &format_number(e.value))?;
            }
        }
        Elements::Text(elements) => {
            for e in elements {
                let mut start = BytesStart::new(element.as_str());
                start.push_attribute(("name", e.name.as_str()));
                if is_def {
                    start.push_attribute(("label", e.label.as_str()));
                }
                write_leaf(writer, start, &e.value)?;
            }
        }
        Elements::Switch(elements) => {
            for e in elements {
                let mut start = BytesStart::new(element.as_str());
                start.push_attribute(("name", e.name.as_str()));
                if is_def {
                    start.push_attribute(("label", e.label.as_str()));
                }
                write_leaf(writer, start, if e.value { "On" } else { "Off" })?;
            }
        }
        Elements::Light(elements) => {
            for e in elements {
                let mut start = BytesStart::new(element.as_str());
                start.push_attribute(("name", e.name.as_str()));
                if is_def {
                    start.push_attribute(("label", e.label.as_str()));
                }
                write_leaf(writer, start, e.value.as_str())?;
            }
        }
        Elements::Blob(elements) => {
            for e in elements {
                let mut start = BytesStart::new(element.as_str());
                start.push_attribute(("name", e.name.as_str()));
                if is_def {
                    start.push_attribute(("label", e.label.as_str()));
                } else {
                    start.push_attribute(("size", e.size.to_string().as_str()));
                    start.push_attribute(("format", e.format.as_str()));
                }
                write_leaf(writer, start, &e.value)?;
            }
        }
    }

    write(writer, Event::End(BytesEnd::new(tag.as_str())))
}

/// Serialize a message as one INDI frame followed by a newline
pub fn encode(message: &IndiMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut writer = Writer::new(Vec::new());

    match message {
        IndiMessage::Vector(vector) => encode_vector(&mut writer, vector)?,
        IndiMessage::Message(m) => {
            let mut start = BytesStart::new("message");
            push_optional(&mut start, "device", m.device.as_deref());
            push_optional(&mut start, "timestamp", m.timestamp.as_deref());
            start.push_attribute(("message", m.text.as_str()));
            write(&mut writer, Event::Empty(start))?;
        }
        IndiMessage::DelProperty(d) => {
            let mut start = BytesStart::new("delProperty");
            start.push_attribute(("device", d.device.as_str()));
            push_optional(&mut start, "name", d.name.as_deref());
            push_optional(&mut start, "timestamp", d.timestamp.as_deref());
            push_optional(&mut start, "message", d.message.as_deref());
            write(&mut writer, Event::Empty(start))?;
        }
        IndiMessage::GetProperties(g) => {
            let mut start = BytesStart::new("getProperties");
            start.push_attribute(("version", g.version.as_str()));
            push_optional(&mut start, "device", g.device.as_deref());
            push_optional(&mut start, "name", g.name.as_deref());
            write(&mut writer, Event::Empty(start))?;
        }
        IndiMessage::EnableBlob(e) => {
            let mut start = BytesStart::new("enableBLOB");
            start.push_attribute(("device", e.device.as_str()));
            push_optional(&mut start, "name", e.name.as_deref());
            write_leaf(&mut writer, start, e.policy.as_str())?;
        }
    }

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

/// Serialize a message as a string
pub fn encode_to_string(message: &IndiMessage) -> Result<String, ProtocolError> {
    let bytes = encode(message)?;
    String::from_utf8(bytes).map_err(|e| ProtocolError::Encode(e.to_string()))
}

enum Step {
    Open(XmlNode),
    Leaf(XmlNode),
    Close(String),
    Text(Result<String, String>),
    Malformed(String, bool),
    Eof,
    Skip,
}

/// Incremental frame decoder over an async byte stream
pub struct IndiReader<R> {
    reader: Option<Reader<R>>,
    buf: Vec<u8>,
    stack: Vec<XmlNode>,
}

fn configured<R>(inner: R) -> Reader<R> {
    let mut reader = Reader::from_reader(inner);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;
    reader
}

/// Discard input up to the next `<`, or one byte when nothing was consumed
async fn skip_to_markup<R: AsyncBufRead + Unpin>(inner: &mut R, stalled: bool) -> io::Result<()> {
    let mut first = stalled;
    loop {
        let (found, len) = {
            let available = inner.fill_buf().await?;
            let from = usize::from(first).min(available.len());
            let found = available[from..].iter().position(|b| *b == b'<').map(|at| at + from);
            (found, available.len())
        };
        first = false;

        match found {
            Some(at) => {
                inner.consume(at);
                return Ok(());
            }
            None if len == 0 => return Ok(()),
            None => inner.consume(len),
        }
    }
}

impl<R: AsyncBufRead + Unpin> IndiReader<R> {
    /// Wrap a buffered reader
    pub fn new(inner: R) -> Self {
        Self {
            reader: Some(configured(inner)),
            buf: Vec::with_capacity(4096),
            stack: Vec::new(),
        }
    }

    /// Restart the XML reader after a syntax error at the next tag
    async fn resync(&mut self, stalled: bool) -> io::Result<()> {
        if let Some(reader) = self.reader.take() {
            let mut inner = reader.into_inner();
            skip_to_markup(&mut inner, stalled).await?;
            self.reader = Some(configured(inner));
        }
        Ok(())
    }

    /// Read the next well-formed frame
    ///
    /// Returns `Ok(None)` at end of stream. Malformed frames, including XML
    /// syntax errors, are skipped.
    pub async fn next_message(&mut self) -> io::Result<Option<IndiMessage>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            let position = reader.buffer_position();
            let step = match reader.read_event_into_async(&mut self.buf).await {
                Ok(Event::Start(start)) => Step::Open(XmlNode::from_start(&start)),
                Ok(Event::Empty(start)) => Step::Leaf(XmlNode::from_start(&start)),
                Ok(Event::End(end)) => {
                    Step::Close(String::from_utf8_lossy(end.name().as_ref()).into_owned())
                }
                Ok(Event::Text(text)) => Step::Text(
                    text.unescape()
                        .map(|t| t.into_owned())
                        .map_err(|e| e.to_string()),
                ),
                Ok(Event::CData(data)) => {
                    Step::Text(Ok(String::from_utf8_lossy(&data).into_owned()))
                }
                Ok(Event::Eof) => Step::Eof,
                Ok(_) => Step::Skip,
                Err(quick_xml::Error::Io(e)) => return Err(io::Error::new(e.kind(), e.to_string())),
                Err(e) => Step::Malformed(e.to_string(), reader.buffer_position() == position),
            };
            self.buf.clear();

            let frame = match step {
                Step::Open(node) => {
                    self.stack.push(node);
                    None
                }
                Step::Leaf(node) => self.close(node),
                Step::Close(tag) => match self.stack.pop() {
                    Some(node) if node.tag == tag => self.close(node),
                    Some(node) => {
                        warn!("Skipping malformed INDI frame: </{}> closes <{}>", tag, node.tag);
                        self.stack.clear();
                        None
                    }
                    None => None,
                },
                Step::Text(Ok(text)) => {
                    if let Some(node) = self.stack.last_mut() {
                        node.text.push_str(&text);
                    }
                    None
                }
                Step::Text(Err(error)) => {
                    if let Some(node) = self.stack.last_mut() {
                        node.invalid = Some(error);
                    }
                    None
                }
                Step::Malformed(error, stalled) => {
                    warn!("Skipping malformed INDI frame: {}", error);
                    self.stack.clear();
                    self.resync(stalled).await?;
                    None
                }
                Step::Eof => {
                    if !self.stack.is_empty() {
                        debug!("INDI stream ended inside <{}>", self.stack[0].tag);
                    }
                    return Ok(None);
                }
                Step::Skip => None,
            };

            if let Some(node) = frame {
                match decode_frame(&node) {
                    Ok(message) => {
                        trace!(tag = %node.tag, "Decoded INDI frame");
                        return Ok(Some(message));
                    }
                    Err(ProtocolError::UnknownTag(tag)) => {
                        debug!("Ignoring unknown INDI tag <{}>", tag);
                    }
                    Err(e) => {
                        warn!(tag = %node.tag, "Skipping malformed INDI frame: {}", e);
                    }
                }
            }
        }
    }

    fn close(&mut self, node: XmlNode) -> Option<XmlNode> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(node);
                None
            }
            None => Some(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_all(text: &str) -> Vec<IndiMessage> {
        let mut reader = IndiReader::new(text.as_bytes());
        let mut messages = Vec::new();
        while let Some(message) = reader.next_message().await.unwrap() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_decode_def_number_vector() {
        let messages = decode_all(
            r#"<defNumberVector device="Wheel" name="FILTER_SLOT" label="Filter Slot"
                   group="Main" state="Idle" perm="rw" timeout="60">
                 <defNumber name="FILTER_SLOT_VALUE" label="Slot" format="%3.0f"
                   min="1" max="5" step="1">1</defNumber>
               </defNumberVector>"#,
        )
        .await;

        assert_eq!(messages.len(), 1);
        let vector = messages[0].as_vector().unwrap();
        assert_eq!(vector.op, VectorOp::Def);
        assert_eq!(vector.device, "Wheel");
        assert_eq!(vector.group, "Main");
        assert_eq!(vector.timeout, 60.0);
        let element = vector.number_element("FILTER_SLOT_VALUE").unwrap();
        assert_eq!((element.min, element.max, element.value), (1.0, 5.0, 1.0));
    }

    #[tokio::test]
    async fn test_decode_sequence_with_declaration_and_unknown_tags() {
        let messages = decode_all(
            r#"<?xml version="1.0"?>
               <setSwitchVector device="CCD" name="CONNECTION" state="Ok">
                 <oneSwitch name="CONNECT">On</oneSwitch>
                 <oneSwitch name="DISCONNECT">Off</oneSwitch>
               </setSwitchVector>
               <pingRequest uid="1"/>
               <message device="CCD" timestamp="2024-01-01T00:00:00" message="Cooler on"/>
               <delProperty device="CCD"/>"#,
        )
        .await;

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].as_vector().unwrap().switch("CONNECT"), Some(true));
        assert!(matches!(&messages[1], IndiMessage::Message(m) if m.text == "Cooler on"));
        assert!(messages[2].is_device_removal());
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let messages = decode_all(
            r#"<setNumberVector device="F" name="ABS_FOCUS_POSITION" state="Moving">
                 <oneNumber name="FOCUS_ABSOLUTE_POSITION">10</oneNumber>
               </setNumberVector>
               <setNumberVector device="F" name="ABS_FOCUS_POSITION" state="Ok">
                 <oneNumber name="A">1</oneNumber>
                 <oneNumber name="A">2</oneNumber>
               </setNumberVector>
               <setNumberVector device="F" name="ABS_FOCUS_POSITION" state="Ok">
                 <oneText name="A">1</oneText>
               </setNumberVector>
               <setNumberVector device="F" name="ABS_FOCUS_POSITION" state="Ok">
                 <oneNumber name="A">twelve</oneNumber>
               </setNumberVector>
               <setNumberVector device="F" name="ABS_FOCUS_POSITION" state="Busy">
                 <oneNumber name="FOCUS_ABSOLUTE_POSITION">20</oneNumber>
               </setNumberVector>"#,
        )
        .await;

        assert_eq!(messages.len(), 1);
        let vector = messages[0].as_vector().unwrap();
        assert_eq!(vector.state, PropertyState::Busy);
        assert_eq!(vector.number("FOCUS_ABSOLUTE_POSITION"), Some(20.0));
    }

    #[tokio::test]
    async fn test_xml_syntax_error_recovers() {
        let slot = |value: u32| {
            format!(
                r#"<setNumberVector device="Wheel" name="FILTER_SLOT" state="Ok">
                     <oneNumber name="FILTER_SLOT_VALUE">{}</oneNumber>
                   </setNumberVector>"#,
                value
            )
        };
        let text = format!(
            "{}\n<!bogus stuff>\n{}\n{}\n<!bogus>{}",
            slot(1),
            slot(2),
            slot(3),
            slot(4)
        );

        let values: Vec<f64> = decode_all(&text)
            .await
            .iter()
            .filter_map(|message| message.as_vector()?.number("FILTER_SLOT_VALUE"))
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_mismatched_end_tag_recovers() {
        let messages = decode_all(
            r#"<setTextVector device="D" name="T"><oneText name="X">a</oneNumber></setTextVector>
               <setTextVector device="D" name="T">
                 <oneText name="X">b &amp; c</oneText>
               </setTextVector>"#,
        )
        .await;

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].as_vector().unwrap().text("X"), Some("b & c"));
    }

    #[tokio::test]
    async fn test_truncated_stream_ends_cleanly() {
        let messages =
            decode_all(r#"<setNumberVector device="D" name="N"><oneNumber name="A">1"#).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_encoded_frames_decode_to_same_message() {
        let def = Vector::new(
            VectorOp::Def,
            "Panel",
            "FLAT_LIGHT_CONTROL",
            Elements::Switch(vec![
                SwitchElement::new("FLAT_LIGHT_ON", false),
                SwitchElement::new("FLAT_LIGHT_OFF", true),
            ]),
        )
        .with_group("Main & Control")
        .with_rule(SwitchRule::OneOfMany)
        .with_state(PropertyState::Ok);
        let blob = Vector::new(
            VectorOp::Set,
            "CCD",
            "CCD1",
            Elements::Blob(vec![BlobElement::new("CCD1", ".fits", b"\x00\x01\x02<>")]),
        )
        .with_state(PropertyState::Ok);
        let enable = IndiMessage::EnableBlob(EnableBlob {
            device: "CCD".to_string(),
            name: None,
            policy: BlobPolicy::Also,
        });

        let mut text = String::new();
        for message in [
            IndiMessage::from(def.clone()),
            IndiMessage::from(blob.clone()),
            enable.clone(),
        ] {
            text.push_str(&encode_to_string(&message).unwrap());
        }

        let decoded = decode_all(&text).await;
        assert_eq!(decoded, vec![IndiMessage::from(def), IndiMessage::from(blob), enable]);
    }

    #[test]
    fn test_encode_new_number_vector() {
        let command = IndiMessage::from(Vector::new_number(
            "Focuser",
            "ABS_FOCUS_POSITION",
            &[("FOCUS_ABSOLUTE_POSITION", 1500.0)],
        ));
        let text = encode_to_string(&command).unwrap();
        assert_eq!(
            text,
            concat!(
                "<newNumberVector device=\"Focuser\" name=\"ABS_FOCUS_POSITION\">",
                "<oneNumber name=\"FOCUS_ABSOLUTE_POSITION\">1500</oneNumber>",
                "</newNumberVector>\n",
            )
        );
    }

    #[test]
    fn test_encode_get_properties() {
        let text = encode_to_string(&IndiMessage::GetProperties(GetProperties::default())).unwrap();
        assert_eq!(text, "<getProperties version=\"1.7\"/>\n");
    }
}
