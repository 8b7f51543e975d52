//! Introspection data: interface descriptions and their XML form.

use std::fmt::Write as _;

use super::Signature;

/// Interface answering `Ping` and `GetMachineId`.
pub const PEER_INTERFACE: &str = "org.freedesktop.DBus.Peer";
/// Interface answering `Introspect`.
pub const INTROSPECTABLE_INTERFACE: &str = "org.freedesktop.DBus.Introspectable";
/// Interface answering `Get`, `Set` and `GetAll`.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

const DOCTYPE: &str = "<!DOCTYPE node PUBLIC \"-//freedesktop//DTD D-BUS Object Introspection 1.0//EN\"\n\"http://www.freedesktop.org/standards/dbus/1.0/introspect.dtd\">\n";

/// Argument direction in a method description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caller to callee.
    In,
    /// Callee to caller.
    Out,
}

/// One named argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgInfo {
    /// Argument name, may be empty.
    pub name: String,
    /// Single complete type.
    pub signature: Signature,
}

impl ArgInfo {
    /// Describe an argument.
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
        }
    }
}

/// Method description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Member name.
    pub name: String,
    /// Inputs.
    pub inputs: Vec<ArgInfo>,
    /// Outputs.
    pub outputs: Vec<ArgInfo>,
}

impl MethodInfo {
    /// Concatenated input signature used for dispatch.
    #[must_use]
    pub fn input_signature(&self) -> String {
        self.inputs.iter().map(|a| a.signature.as_str()).collect()
    }
}

/// Signal description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalInfo {
    /// Member name.
    pub name: String,
    /// Arguments.
    pub args: Vec<ArgInfo>,
}

/// Property access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyAccess {
    /// `read`
    Read,
    /// `write`
    Write,
    /// `readwrite`
    ReadWrite,
}

impl PropertyAccess {
    /// Whether `Get` is allowed.
    #[must_use]
    pub const fn readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Whether `Set` is allowed.
    #[must_use]
    pub const fn writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "readwrite",
        }
    }
}

/// Property description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Property name.
    pub name: String,
    /// Value type.
    pub signature: Signature,
    /// Access mode.
    pub access: PropertyAccess,
}

/// Interface description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Interface name.
    pub name: String,
    /// Methods.
    pub methods: Vec<MethodInfo>,
    /// Signals.
    pub signals: Vec<SignalInfo>,
    /// Properties.
    pub properties: Vec<PropertyInfo>,
}

fn sig(text: &str) -> Signature {
    Signature::from_string_unchecked(text.to_owned())
}

fn method(name: &str, inputs: &[(&str, &str)], outputs: &[(&str, &str)]) -> MethodInfo {
    let args = |list: &[(&str, &str)]| {
        list.iter()
            .map(|(n, s)| ArgInfo::new(*n, sig(s)))
            .collect()
    };
    MethodInfo {
        name: name.to_owned(),
        inputs: args(inputs),
        outputs: args(outputs),
    }
}

/// Descriptions of the interfaces every object answers.
#[must_use]
pub fn standard_interfaces() -> Vec<InterfaceInfo> {
    vec![
        InterfaceInfo {
            name: PEER_INTERFACE.to_owned(),
            methods: vec![
                method("Ping", &[], &[]),
                method("GetMachineId", &[], &[("machine_uuid", "s")]),
            ],
            ..InterfaceInfo::default()
        },
        InterfaceInfo {
            name: INTROSPECTABLE_INTERFACE.to_owned(),
            methods: vec![method("Introspect", &[], &[("xml_data", "s")])],
            ..InterfaceInfo::default()
        },
        InterfaceInfo {
            name: PROPERTIES_INTERFACE.to_owned(),
            methods: vec![
                method("Get", &[("interface_name", "s"), ("property_name", "s")], &[("value", "v")]),
                method(
                    "Set",
                    &[("interface_name", "s"), ("property_name", "s"), ("value", "v")],
                    &[],
                ),
                method("GetAll", &[("interface_name", "s")], &[("props", "a{sv}")]),
            ],
            signals: vec![SignalInfo {
                name: "PropertiesChanged".to_owned(),
                args: vec![
                    ArgInfo::new("interface_name", sig("s")),
                    ArgInfo::new("changed_properties", sig("a{sv}")),
                    ArgInfo::new("invalidated_properties", sig("as")),
                ],
            }],
            ..InterfaceInfo::default()
        },
    ]
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn write_arg(out: &mut String, arg: &ArgInfo, direction: Option<Direction>) {
    out.push_str("      <arg");
    if !arg.name.is_empty() {
        let _ = write!(out, " name=\"{}\"", escape(&arg.name));
    }
    let _ = write!(out, " type=\"{}\"", escape(arg.signature.as_str()));
    match direction {
        Some(Direction::In) => out.push_str(" direction=\"in\""),
        Some(Direction::Out) => out.push_str(" direction=\"out\""),
        None => {}
    }
    out.push_str("/>\n");
}

/// Render one interface block.
pub fn write_interface(out: &mut String, iface: &InterfaceInfo) {
    let _ = writeln!(out, "  <interface name=\"{}\">", escape(&iface.name));
    for m in &iface.methods {
        let _ = writeln!(out, "    <method name=\"{}\">", escape(&m.name));
        for arg in &m.inputs {
            write_arg(out, arg, Some(Direction::In));
        }
        for arg in &m.outputs {
            write_arg(out, arg, Some(Direction::Out));
        }
        out.push_str("    </method>\n");
    }
    for s in &iface.signals {
        let _ = writeln!(out, "    <signal name=\"{}\">", escape(&s.name));
        for arg in &s.args {
            write_arg(out, arg, None);
        }
        out.push_str("    </signal>\n");
    }
    for p in &iface.properties {
        let _ = writeln!(
            out,
            "    <property name=\"{}\" type=\"{}\" access=\"{}\"/>",
            escape(&p.name),
            escape(p.signature.as_str()),
            p.access.as_str()
        );
    }
    out.push_str("  </interface>\n");
}

/// Full `<node>` document for an object with the given interfaces and child nodes.
#[must_use]
pub fn node_xml<'a>(
    interfaces: impl IntoIterator<Item = &'a InterfaceInfo>,
    children: &[String],
) -> String {
    let mut out = String::from(DOCTYPE);
    out.push_str("<node>\n");
    let standard = standard_interfaces();
    for iface in &standard {
        write_interface(&mut out, iface);
    }
    for iface in interfaces {
        if standard.iter().any(|s| s.name == iface.name) {
            continue;
        }
        write_interface(&mut out, iface);
    }
    for child in children {
        let _ = writeln!(out, "  <node name=\"{}\"/>", escape(child));
    }
    out.push_str("</node>\n");
    out
}

/// Interface names and child node names found in an introspection document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntrospectedNode {
    /// Declared interfaces, in document order.
    pub interfaces: Vec<String>,
    /// Child node names.
    pub children: Vec<String>,
}

/// Scan an introspection document for interface and child node names.
#[must_use]
pub fn parse_node(xml: &str) -> IntrospectedNode {
    let mut node = IntrospectedNode::default();
    let mut seen_root = false;
    let mut rest = xml;
    while let Some(start) = rest.find('<') {
        rest = &rest[start + 1..];
        let end = rest.find('>').unwrap_or(rest.len());
        let tag = &rest[..end];
        let is_node = tag == "node" || tag.starts_with("node ");
        let target = if let Some(attrs) = tag.strip_prefix("interface ") {
            Some((&mut node.interfaces, attrs))
        } else if is_node && !seen_root {
            seen_root = true;
            None
        } else if let Some(attrs) = tag.strip_prefix("node ") {
            Some((&mut node.children, attrs))
        } else {
            None
        };
        if let Some((list, attrs)) = target {
            if let Some(name) = attribute(attrs, "name") {
                list.push(name);
            }
        }
        rest = &rest[end..];
    }
    node
}

fn attribute(attrs: &str, key: &str) -> Option<String> {
    let pattern = format!("{key}=");
    let at = attrs.find(&pattern)? + pattern.len();
    let quoted = &attrs[at..];
    let quote = quoted.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let body = &quoted[1..];
    let close = body.find(quote)?;
    Some(
        body[..close]
            .replace("&quot;", "\"")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&amp;", "&"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_xml_parses_back() {
        let iface = InterfaceInfo {
            name: "org.example.Test".into(),
            methods: vec![method("getName", &[], &[("name", "s")])],
            properties: vec![PropertyInfo {
                name: "Volume".into(),
                signature: sig("u"),
                access: PropertyAccess::ReadWrite,
            }],
            ..InterfaceInfo::default()
        };
        let xml = node_xml([&iface], &["child".to_owned()]);
        assert!(xml.contains("<method name=\"getName\">"));
        assert!(xml.contains("access=\"readwrite\""));

        let node = parse_node(&xml);
        assert_eq!(
            node.interfaces,
            [PEER_INTERFACE, INTROSPECTABLE_INTERFACE, PROPERTIES_INTERFACE, "org.example.Test"]
        );
        assert_eq!(node.children, ["child"]);
    }

    #[test]
    fn parse_tolerates_foreign_documents() {
        let xml = "<node name='/x'><interface name='a.b'><method name='M'/></interface><node name='c'/></node>";
        let node = parse_node(xml);
        assert_eq!(node.interfaces, ["a.b"]);
        assert_eq!(node.children, ["c"]);
    }
}
