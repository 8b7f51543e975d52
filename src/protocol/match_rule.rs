//! Match rules: predicates over message header fields and string arguments.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{Error, Message, MessageType, ObjectPath, Result, Value};

/// Highest argument index a rule may test.
pub const MAX_MATCH_ARG: u8 = 63;

/// A subscription predicate; unset fields match anything.
///
/// The string form (`type='signal',interface='org.foo'`) is what the bus
/// receives in `AddMatch`/`RemoveMatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchRule {
    kind: Option<MessageType>,
    sender: Option<String>,
    interface: Option<String>,
    member: Option<String>,
    path: Option<ObjectPath>,
    path_namespace: Option<ObjectPath>,
    destination: Option<String>,
    args: BTreeMap<u8, String>,
    arg_paths: BTreeMap<u8, String>,
}

impl MatchRule {
    /// Rule matching every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rule matching signals from `interface` named `member`.
    #[must_use]
    pub fn signal(interface: impl Into<String>, member: impl Into<String>) -> Self {
        Self::new()
            .with_kind(MessageType::Signal)
            .with_interface(interface)
            .with_member(member)
    }

    /// Restrict the message kind.
    #[must_use]
    pub fn with_kind(mut self, kind: MessageType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Restrict the interface.
    #[must_use]
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Restrict the member.
    #[must_use]
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Restrict the object path.
    #[must_use]
    pub fn with_path(mut self, path: ObjectPath) -> Self {
        self.path = Some(path);
        self
    }

    /// Match the path and everything below it.
    #[must_use]
    pub fn with_path_namespace(mut self, path: ObjectPath) -> Self {
        self.path_namespace = Some(path);
        self
    }

    /// Restrict the destination.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Require string argument `index` to equal `value`.
    pub fn with_arg(mut self, index: u8, value: impl Into<String>) -> Result<Self> {
        check_arg_index(index)?;
        self.args.insert(index, value.into());
        Ok(self)
    }

    /// Require argument `index` to be a path related to `value`.
    pub fn with_arg_path(mut self, index: u8, value: impl Into<String>) -> Result<Self> {
        check_arg_index(index)?;
        self.arg_paths.insert(index, value.into());
        Ok(self)
    }

    /// Message kind filter.
    #[must_use]
    pub fn kind(&self) -> Option<MessageType> {
        self.kind
    }

    /// Sender filter.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// Interface filter.
    #[must_use]
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref()
    }

    /// Member filter.
    #[must_use]
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// Path filter.
    #[must_use]
    pub fn path(&self) -> Option<&ObjectPath> {
        self.path.as_ref()
    }

    /// Destination filter.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Whether `message` satisfies every set field.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        fn field(want: Option<&str>, have: Option<&str>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }

        if self.kind.is_some_and(|k| k != message.kind()) {
            return false;
        }
        if !field(self.sender(), message.sender())
            || !field(self.interface(), message.interface())
            || !field(self.member(), message.member())
            || !field(self.destination(), message.destination())
        {
            return false;
        }
        if let Some(path) = &self.path {
            if message.path() != Some(path) {
                return false;
            }
        }
        if let Some(ns) = &self.path_namespace {
            if !message.path().is_some_and(|p| ns.is_ancestor_of(p)) {
                return false;
            }
        }
        if self.args.is_empty() && self.arg_paths.is_empty() {
            return true;
        }
        let Ok(body) = message.body() else {
            return false;
        };
        self.args_match(&body)
    }

    fn args_match(&self, body: &[Value]) -> bool {
        let string_arg = |index: u8| match body.get(usize::from(index)) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        };
        let path_arg = |index: u8| match body.get(usize::from(index)) {
            Some(Value::Str(s)) => Some(s.as_str()),
            Some(Value::ObjectPath(p)) => Some(p.as_str()),
            _ => None,
        };
        self.args
            .iter()
            .all(|(index, want)| string_arg(*index) == Some(want.as_str()))
            && self.arg_paths.iter().all(|(index, want)| {
                path_arg(*index).is_some_and(|have| path_related(want, have))
            })
    }
}

/// `argNpath` semantics: equal, or one is a `/`-terminated prefix of the other.
fn path_related(rule: &str, arg: &str) -> bool {
    rule == arg
        || (rule.ends_with('/') && arg.starts_with(rule))
        || (arg.ends_with('/') && rule.starts_with(arg))
}

fn check_arg_index(index: u8) -> Result<()> {
    if index > MAX_MATCH_ARG {
        return Err(Error::Other(format!(
            "match rule argument index {index} above {MAX_MATCH_ARG}"
        )));
    }
    Ok(())
}

fn write_pair(f: &mut fmt::Formatter<'_>, first: &mut bool, key: &str, value: &str) -> fmt::Result {
    if !*first {
        f.write_str(",")?;
    }
    *first = false;
    write!(f, "{key}='{}'", value.replace('\'', r"'\''"))
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if let Some(kind) = self.kind {
            write_pair(f, &mut first, "type", kind.rule_name())?;
        }
        if let Some(sender) = &self.sender {
            write_pair(f, &mut first, "sender", sender)?;
        }
        if let Some(interface) = &self.interface {
            write_pair(f, &mut first, "interface", interface)?;
        }
        if let Some(member) = &self.member {
            write_pair(f, &mut first, "member", member)?;
        }
        if let Some(path) = &self.path {
            write_pair(f, &mut first, "path", path.as_str())?;
        }
        if let Some(ns) = &self.path_namespace {
            write_pair(f, &mut first, "path_namespace", ns.as_str())?;
        }
        if let Some(destination) = &self.destination {
            write_pair(f, &mut first, "destination", destination)?;
        }
        for (index, value) in &self.args {
            write_pair(f, &mut first, &format!("arg{index}"), value)?;
        }
        for (index, value) in &self.arg_paths {
            write_pair(f, &mut first, &format!("arg{index}path"), value)?;
        }
        Ok(())
    }
}

impl FromStr for MatchRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = |why: &str| Error::Other(format!("invalid match rule {s:?}: {why}"));
        let mut rule = Self::new();
        for (key, value) in split_pairs(s).map_err(|why| bad(why))? {
            rule = match key.as_str() {
                "type" => rule.with_kind(
                    MessageType::from_rule_name(&value).ok_or_else(|| bad("unknown type"))?,
                ),
                "sender" => rule.with_sender(value),
                "interface" => rule.with_interface(value),
                "member" => rule.with_member(value),
                "path" => rule.with_path(ObjectPath::new(value)?),
                "path_namespace" => rule.with_path_namespace(ObjectPath::new(value)?),
                "destination" => rule.with_destination(value),
                other => {
                    let Some(rest) = other.strip_prefix("arg") else {
                        return Err(bad("unknown key"));
                    };
                    let (digits, is_path) = match rest.strip_suffix("path") {
                        Some(digits) => (digits, true),
                        None => (rest, false),
                    };
                    let index: u8 = digits.parse().map_err(|_| bad("bad argument index"))?;
                    if is_path {
                        rule.with_arg_path(index, value)?
                    } else {
                        rule.with_arg(index, value)?
                    }
                }
            };
        }
        Ok(rule)
    }
}

/// Split `key='value',key2=value2` honouring `'\''` style quoting.
fn split_pairs(s: &str) -> std::result::Result<Vec<(String, String)>, &'static str> {
    let mut pairs = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }
        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_owned();
        if key.is_empty() {
            return Err("empty key");
        }
        let mut value = String::new();
        let mut quoted = false;
        while let Some(c) = chars.next() {
            match c {
                '\'' => quoted = !quoted,
                '\\' if !quoted && chars.peek() == Some(&'\'') => {
                    value.push('\'');
                    chars.next();
                }
                ',' if !quoted => break,
                c => value.push(c),
            }
        }
        if quoted {
            return Err("unterminated quote");
        }
        pairs.push((key, value));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(interface: &str, member: &str, body: Vec<Value>) -> Message {
        let mut msg = Message::signal(ObjectPath::new("/a/b").unwrap(), interface, member)
            .body(body)
            .build()
            .unwrap();
        msg.set_sender(":1.5");
        msg
    }

    #[test]
    fn null_fields_are_wildcards() {
        let rule = MatchRule::signal("org.foo", "methodnoarg");
        assert!(rule.matches(&signal("org.foo", "methodnoarg", vec![])));
        assert!(!rule.matches(&signal("org.foo", "other", vec![])));
        assert!(!rule.matches(&signal("org.bar", "methodnoarg", vec![])));
        assert!(MatchRule::new().matches(&signal("org.bar", "x", vec![])));
    }

    #[test]
    fn path_and_args() {
        let rule = MatchRule::new()
            .with_path_namespace(ObjectPath::new("/a").unwrap())
            .with_arg(0, "hello")
            .unwrap();
        assert!(rule.matches(&signal("org.foo", "M", vec![Value::Str("hello".into())])));
        assert!(!rule.matches(&signal("org.foo", "M", vec![Value::Str("bye".into())])));
        assert!(!rule.matches(&signal("org.foo", "M", vec![])));

        assert!(path_related("/aa/", "/aa/bb"));
        assert!(path_related("/aa/bb", "/aa/"));
        assert!(!path_related("/aa", "/aa/bb"));
    }

    #[test]
    fn string_form_roundtrip() {
        let rule = MatchRule::signal("org.foo", "Changed")
            .with_sender(":1.5")
            .with_arg(1, "it's")
            .unwrap()
            .with_arg_path(0, "/x/")
            .unwrap();
        let text = rule.to_string();
        assert_eq!(
            text,
            r"type='signal',sender=':1.5',interface='org.foo',member='Changed',arg1='it'\''s',arg0path='/x/'"
        );
        assert_eq!(text.parse::<MatchRule>().unwrap(), rule);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("type='bogus'".parse::<MatchRule>().is_err());
        assert!("colour='red'".parse::<MatchRule>().is_err());
        assert!("arg64='x'".parse::<MatchRule>().is_err());
        assert!("member='x".parse::<MatchRule>().is_err());
    }
}
