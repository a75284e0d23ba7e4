// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Named sections attached to an event.
//!
//! Every fact contributes exactly one top-level field to the encoded event,
//! keyed by its class name. Two facts with the same class cannot coexist in
//! the encoded form: the later one wins (see [`crate::packet::Packet::to_value`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub use crate::stacktrace::{Frame, Stacktrace};

pub const MESSAGE_CLASS: &str = "logentry";
pub const EXCEPTION_CLASS: &str = "exception";
pub const STACKTRACE_CLASS: &str = "stacktrace";
pub const HTTP_CLASS: &str = "request";
pub const USER_CLASS: &str = "user";

/// A formatted log message with its parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Message {
            message: message.into(),
            params: Vec::new(),
        }
    }
}

/// An error value, optionally with the stack it was raised from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    #[serde(rename = "type")]
    pub ty: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

impl Exception {
    /// Builds an exception from a type path such as `std::io::Error`.
    ///
    /// The last path segment becomes the type, the rest the module. Generic
    /// arguments and trait object bounds are dropped first, and smart
    /// pointers are looked through, so `Box<dyn std::error::Error + Send>`
    /// becomes type `Error` in module `std::error`.
    pub fn new(type_path: &str, value: impl Into<String>, stacktrace: Option<Stacktrace>) -> Self {
        let (module, ty) = match base_type_path(type_path).rsplit_once("::") {
            Some((module, ty)) => (Some(module.to_string()), ty.to_string()),
            None => (None, type_path.to_string()),
        };
        Exception {
            ty,
            value: value.into(),
            module,
            stacktrace,
        }
    }

    #[must_use]
    pub fn culprit(&self) -> Option<String> {
        self.stacktrace.as_ref().and_then(Stacktrace::culprit)
    }
}

/// Pointer types whose first generic argument names the interesting type.
const POINTER_TYPES: [&str; 3] = ["Box", "Arc", "Rc"];

/// The plain path of the type named by `type_name`, without references,
/// `dyn`, generic arguments or extra trait bounds.
fn base_type_path(type_name: &str) -> &str {
    let mut path = type_name.trim();
    loop {
        path = path.trim_start_matches('&').trim_start();
        path = path.strip_prefix("mut ").unwrap_or(path);
        path = path.strip_prefix("dyn ").unwrap_or(path);
        match path.split_once('<') {
            Some((outer, inner))
                if outer
                    .rsplit("::")
                    .next()
                    .is_some_and(|name| POINTER_TYPES.contains(&name)) =>
            {
                path = inner.strip_suffix('>').unwrap_or(inner);
            }
            Some((outer, _)) => return first_bound(outer),
            None => return first_bound(path),
        }
    }
}

fn first_bound(path: &str) -> &str {
    path.split(['+', ',']).next().unwrap_or(path).trim()
}

/// Snapshot of the HTTP request being served when the event happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Http {
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Identity of the user affected by the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// A named, JSON-serializable section of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Message(Message),
    Exception(Exception),
    Stacktrace(Stacktrace),
    Http(Http),
    User(User),
    /// Any section the typed variants do not cover.
    Custom { class: String, value: Value },
}

impl Fact {
    /// Field name of this fact in the encoded event.
    #[must_use]
    pub fn class(&self) -> &str {
        match self {
            Fact::Message(_) => MESSAGE_CLASS,
            Fact::Exception(_) => EXCEPTION_CLASS,
            Fact::Stacktrace(_) => STACKTRACE_CLASS,
            Fact::Http(_) => HTTP_CLASS,
            Fact::User(_) => USER_CLASS,
            Fact::Custom { class, .. } => class,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Fact::Message(m) => serde_json::to_value(m),
            Fact::Exception(e) => serde_json::to_value(e),
            Fact::Stacktrace(s) => serde_json::to_value(s),
            Fact::Http(h) => serde_json::to_value(h),
            Fact::User(u) => serde_json::to_value(u),
            Fact::Custom { value, .. } => Ok(value.clone()),
        }
    }

    /// Rebuilds a fact from its encoded field. Unknown classes become `Custom`.
    pub fn from_value(class: &str, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match class {
            MESSAGE_CLASS => Fact::Message(serde_json::from_value(value)?),
            EXCEPTION_CLASS => Fact::Exception(serde_json::from_value(value)?),
            STACKTRACE_CLASS => Fact::Stacktrace(serde_json::from_value(value)?),
            HTTP_CLASS => Fact::Http(serde_json::from_value(value)?),
            USER_CLASS => Fact::User(serde_json::from_value(value)?),
            _ => Fact::Custom {
                class: class.to_string(),
                value,
            },
        })
    }

    /// The code location this fact blames, if it knows one.
    #[must_use]
    pub fn culprit(&self) -> Option<String> {
        match self {
            Fact::Exception(e) => e.culprit(),
            Fact::Stacktrace(s) => s.culprit(),
            _ => None,
        }
    }
}

impl From<Message> for Fact {
    fn from(m: Message) -> Self {
        Fact::Message(m)
    }
}

impl From<Exception> for Fact {
    fn from(e: Exception) -> Self {
        Fact::Exception(e)
    }
}

impl From<Stacktrace> for Fact {
    fn from(s: Stacktrace) -> Self {
        Fact::Stacktrace(s)
    }
}

impl From<Http> for Fact {
    fn from(h: Http) -> Self {
        Fact::Http(h)
    }
}

impl From<User> for Fact {
    fn from(u: User) -> Self {
        Fact::User(u)
    }
}
