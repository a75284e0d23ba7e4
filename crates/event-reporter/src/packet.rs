// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory representation of one diagnostic event.
//!
//! A [`Packet`] is built by the caller (or one of the capture helpers on
//! [`crate::Client`]), completed once by [`Packet::init`] inside the capture
//! gate and then handed to the delivery worker unchanged.

use crate::fact::Fact;
use chrono::{DateTime, SubsecRound, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;
use tracing::warn;

pub const DEFAULT_LOGGER: &str = "root";
pub const PLATFORM: &str = "rust";

/// Top-level fields owned by the packet itself. Any other field of an
/// encoded event belongs to a fact.
pub(crate) const SCALAR_FIELDS: [&str; 15] = [
    "message",
    "event_id",
    "project",
    "timestamp",
    "level",
    "logger",
    "platform",
    "culprit",
    "server_name",
    "release",
    "environment",
    "tags",
    "modules",
    "fingerprint",
    "extra",
];

pub type Extra = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.key, &self.value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (key, value) = <(String, String)>::deserialize(deserializer)?;
        Ok(Tag { key, value })
    }
}

/// Ordered key/value pairs. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tags(Vec<Tag>);

impl Tags {
    #[must_use]
    pub fn new() -> Self {
        Tags(Vec::new())
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Tag {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Appends every tag of `other`, keeping duplicates.
    pub fn append(&mut self, other: &Tags) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Replaces the value of the first tag with this key, or appends one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.0.iter_mut().find(|t| t.key == key) {
            Some(tag) => tag.value = value.into(),
            None => self.0.push(Tag {
                key,
                value: value.into(),
            }),
        }
    }

    /// Value of the first tag with this key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            List(Vec<Tag>),
            Map(BTreeMap<String, String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::List(tags) => Tags(tags),
            Repr::Map(map) => map.into_iter().collect(),
        })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for (k, v) in iter {
            tags.push(k, v);
        }
        tags
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Tags {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> From<Vec<(K, V)>> for Tags {
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<HashMap<String, String>> for Tags {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";
    const PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.collect_str(&ts.format(FORMAT)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let Some(raw) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        NaiveDateTime::parse_from_str(&raw, PARSE_FORMAT)
            .map(|naive| Some(naive.and_utc()))
            .map_err(de::Error::custom)
    }
}

/// One diagnostic event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(default)]
    pub message: String,

    // Filled by `init` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modules: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: Extra,

    /// Encoded as top-level fields named by [`Fact::class`].
    #[serde(skip)]
    pub facts: Vec<Fact>,
}

impl Packet {
    /// Creates a packet carrying `message` and `facts`, with runtime
    /// details recorded in `extra`.
    pub fn new(message: impl Into<String>, facts: Vec<Fact>) -> Self {
        Self::with_extra(message, Extra::new(), facts)
    }

    pub fn with_extra(message: impl Into<String>, mut extra: Extra, facts: Vec<Fact>) -> Self {
        set_runtime_extra(&mut extra);
        Packet {
            message: message.into(),
            extra,
            facts,
            ..Default::default()
        }
    }

    /// Fills every required field that is still unset.
    ///
    /// Only the event id generation can fail; on failure the packet is left
    /// partially initialized and must not be sent.
    pub fn init(&mut self, project: &str) -> Result<(), rand::Error> {
        fill(&mut self.project, || project.to_string());
        if is_unset(&self.event_id) {
            self.event_id = Some(generate_event_id()?);
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now());
        }
        if self.level.is_none() {
            self.level = Some(Level::Error);
        }
        fill(&mut self.logger, || DEFAULT_LOGGER.to_string());
        if is_unset(&self.server_name) && !hostname().is_empty() {
            self.server_name = Some(hostname().to_string());
        }
        fill(&mut self.platform, || PLATFORM.to_string());

        if is_unset(&self.culprit) {
            self.culprit = self.facts.iter().find_map(Fact::culprit);
        }
        Ok(())
    }

    pub fn add_tags(&mut self, tags: &Tags) {
        self.tags.append(tags);
    }

    /// The event as one flat JSON object: scalar fields plus one field per
    /// fact. A later fact overwrites an earlier one of the same class.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            for fact in &self.facts {
                fields.insert(fact.class().to_string(), fact.to_value()?);
            }
        }
        Ok(value)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_value()?)
    }

    /// Parses an encoded event, turning every non-scalar field back into a fact.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        let fields: serde_json::Map<String, Value> = serde_json::from_slice(json)?;
        let mut scalars = serde_json::Map::new();
        let mut facts = Vec::new();
        for (name, value) in fields {
            if SCALAR_FIELDS.contains(&name.as_str()) {
                scalars.insert(name, value);
            } else {
                facts.push(Fact::from_value(&name, value)?);
            }
        }
        let mut packet: Packet = serde_json::from_value(Value::Object(scalars))?;
        packet.facts = facts;
        Ok(packet)
    }
}

fn is_unset(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, str::is_empty)
}

fn fill(field: &mut Option<String>, value: impl FnOnce() -> String) {
    if is_unset(field) {
        *field = Some(value());
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn set_runtime_extra(extra: &mut Extra) {
    let num_cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    extra.insert("runtime.os".to_string(), std::env::consts::OS.into());
    extra.insert("runtime.arch".to_string(), std::env::consts::ARCH.into());
    extra.insert("runtime.family".to_string(), std::env::consts::FAMILY.into());
    extra.insert("runtime.num_cpus".to_string(), num_cpus.into());
}

/// Random 128-bit identifier with UUIDv4 version and variant bits, as 32
/// lowercase hex characters.
pub fn generate_event_id() -> Result<String, rand::Error> {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.try_fill_bytes(&mut bytes)?;
    Ok(uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .simple()
        .to_string())
}

static HOSTNAME: OnceLock<String> = OnceLock::new();

/// System hostname, resolved once per process. Empty when unavailable.
pub fn hostname() -> &'static str {
    HOSTNAME.get_or_init(|| match hostname::get() {
        Ok(name) => name.into_string().unwrap_or_default(),
        Err(e) => {
            warn!("Failed to get system hostname: {}", e);
            String::new()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::{Exception, Frame, Message, Stacktrace, User};
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_init_fills_required_fields() {
        let mut packet = Packet::new("boom", vec![]);
        packet.init("42").expect("init");

        assert_eq!(packet.project.as_deref(), Some("42"));
        assert_eq!(packet.level, Some(Level::Error));
        assert_eq!(packet.logger.as_deref(), Some("root"));
        assert_eq!(packet.platform.as_deref(), Some("rust"));
        assert!(packet.timestamp.is_some());
        assert_eq!(packet.event_id.as_deref().map(str::len), Some(32));
    }

    #[test]
    fn test_init_keeps_explicit_fields() {
        let mut packet = Packet {
            message: "boom".to_string(),
            event_id: Some("abc".to_string()),
            project: Some("7".to_string()),
            level: Some(Level::Warning),
            logger: Some("db".to_string()),
            platform: Some("python".to_string()),
            ..Default::default()
        };
        packet.init("42").expect("init");

        assert_eq!(packet.event_id.as_deref(), Some("abc"));
        assert_eq!(packet.project.as_deref(), Some("7"));
        assert_eq!(packet.level, Some(Level::Warning));
        assert_eq!(packet.logger.as_deref(), Some("db"));
        assert_eq!(packet.platform.as_deref(), Some("python"));
    }

    #[test]
    fn test_init_treats_empty_strings_as_unset() {
        let mut packet = Packet {
            event_id: Some(String::new()),
            logger: Some(String::new()),
            ..Default::default()
        };
        packet.init("42").expect("init");
        assert_eq!(packet.event_id.as_deref().map(str::len), Some(32));
        assert_eq!(packet.logger.as_deref(), Some("root"));
    }

    #[test]
    fn test_init_derives_culprit_from_first_fact_that_has_one() {
        let trace = Stacktrace {
            frames: vec![Frame {
                module: "app::jobs".to_string(),
                function: "run".to_string(),
                in_app: true,
                ..Default::default()
            }],
        };
        let mut packet = Packet::new(
            "boom",
            vec![
                Message::new("boom").into(),
                Exception::new("app::Failure", "boom", Some(trace)).into(),
            ],
        );
        packet.init("42").expect("init");
        assert_eq!(packet.culprit.as_deref(), Some("app::jobs.run"));
    }

    #[test]
    fn test_event_id_format_and_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let id = generate_event_id().expect("entropy");
            assert_eq!(id.len(), 32);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            // version nibble and IETF variant
            assert_eq!(&id[12..13], "4");
            assert!(matches!(&id[16..17], "8" | "9" | "a" | "b"));
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn test_tags_serialize_as_pairs_and_keep_duplicates() {
        let mut tags = Tags::from([("env", "prod"), ("env", "staging")]);
        tags.push("region", "eu");
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(
            serde_json::to_value(&tags).expect("serialize"),
            json!([["env", "prod"], ["env", "staging"], ["region", "eu"]])
        );
    }

    #[test]
    fn test_tags_set_replaces_first_match() {
        let mut tags = Tags::from([("env", "prod"), ("region", "eu")]);
        tags.set("env", "staging");
        tags.set("zone", "b");
        assert_eq!(
            tags,
            Tags::from([("env", "staging"), ("region", "eu"), ("zone", "b")])
        );
    }

    #[test]
    fn test_tags_decode_from_object() {
        let tags: Tags =
            serde_json::from_value(json!({"b": "2", "a": "1"})).expect("deserialize");
        assert_eq!(tags, Tags::from([("a", "1"), ("b", "2")]));
    }

    #[test]
    fn test_facts_are_flattened_and_later_class_wins() {
        let mut packet = Packet::new(
            "boom",
            vec![
                User {
                    id: Some("first".to_string()),
                    ..Default::default()
                }
                .into(),
                User {
                    id: Some("second".to_string()),
                    ..Default::default()
                }
                .into(),
            ],
        );
        packet.extra.clear();
        let value = packet.to_value().expect("serialize");
        assert_eq!(value, json!({"message": "boom", "user": {"id": "second"}}));
    }

    #[test]
    fn test_json_round_trip() {
        let mut packet = Packet::new("boom", vec![Message::new("boom").into()]);
        packet.tags = Tags::from([("k", "v")]);
        packet.fingerprint = vec!["{{ default }}".to_string()];
        packet.init("42").expect("init");

        let json = packet.to_json().expect("encode");
        let decoded = Packet::from_json(&json).expect("decode");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_timestamp_wire_format() {
        let packet = Packet {
            timestamp: DateTime::parse_from_rfc3339("2024-03-01T10:20:30.456Z")
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            ..Default::default()
        };
        let value = packet.to_value().expect("serialize");
        assert_eq!(value["timestamp"], json!("2024-03-01T10:20:30.456"));
    }
}
