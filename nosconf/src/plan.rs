//! Existence and diff resolution.
//!
//! Entities flatten their parameters into [`Attrs`]; [`resolve`] compares a
//! desired set against an observed one and decides what has to happen.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::Result;
use crate::transport::{ApiResponse, Transport};

/// A comparable attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// Read from the device but not configured there.
    Unset,
    Str(String),
    Int(i64),
    IntList(Vec<i64>),
    StrList(Vec<String>),
}

impl AttrValue {
    /// Equality with lists compared as sets.
    pub fn matches(&self, other: &AttrValue) -> bool {
        match (self, other) {
            (AttrValue::IntList(a), AttrValue::IntList(b)) => {
                a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
            }
            (AttrValue::StrList(a), AttrValue::StrList(b)) => {
                a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
            }
            (a, b) => a == b,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Unset => Value::Null,
            AttrValue::Str(s) => json!(s),
            AttrValue::Int(i) => json!(i),
            AttrValue::IntList(l) => json!(l),
            AttrValue::StrList(l) => json!(l),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> &[i64] {
        match self {
            AttrValue::IntList(l) => l,
            _ => &[],
        }
    }

    pub fn as_str_list(&self) -> &[String] {
        match self {
            AttrValue::StrList(l) => l,
            _ => &[],
        }
    }
}

/// Supplied attributes of one entity, keyed by internal name.
pub type Attrs = BTreeMap<&'static str, AttrValue>;

/// Desired target state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Present,
    Absent,
}

/// What the driver has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NoOp,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::NoOp => write!(f, "no-op"),
            Action::Create => write!(f, "create"),
            Action::Update => write!(f, "update"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Get => write!(f, "GET"),
            Verb::Post => write!(f, "POST"),
            Verb::Patch => write!(f, "PATCH"),
            Verb::Delete => write!(f, "DELETE"),
        }
    }
}

/// One API call.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub verb: Verb,
    pub path: String,
    pub body: Option<Value>,
}

impl Operation {
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            verb: Verb::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self {
            verb: Verb::Patch,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            verb: Verb::Delete,
            path: path.into(),
            body: None,
        }
    }

    /// Issue the call.
    pub async fn execute(&self, transport: &dyn Transport) -> Result<ApiResponse> {
        let empty = Value::Object(Default::default());
        let body = self.body.as_ref().unwrap_or(&empty);
        match self.verb {
            Verb::Get => transport.get(&self.path).await,
            Verb::Post => transport.post(&self.path, body).await,
            Verb::Patch => transport.patch(&self.path, body).await,
            Verb::Delete => transport.delete(&self.path).await,
        }
    }
}

/// Result of comparing desired and observed state.
#[derive(Debug, Clone)]
pub struct ReconciliationPlan {
    pub exists: bool,
    pub action: Action,
    /// Desired values of the attributes that have to change.
    pub changes: Attrs,
    /// Observed attributes, kept for entities that diff list members.
    pub observed: Option<Attrs>,
    pub operations: Vec<Operation>,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.action == Action::NoOp
    }

    pub fn changed_attributes(&self) -> BTreeSet<&'static str> {
        self.changes.keys().copied().collect()
    }

    pub fn observed(&self, key: &str) -> Option<&AttrValue> {
        self.observed.as_ref().and_then(|o| o.get(key))
    }
}

/// Decide create/update/delete/no-op.
///
/// Only attributes supplied in `desired` and present in `observed` are
/// compared; anything missing from `desired` never forces a change.
pub fn resolve(target: Target, desired: &Attrs, observed: Option<Attrs>) -> ReconciliationPlan {
    let exists = observed.is_some();
    let (action, changes) = match (target, &observed) {
        (Target::Present, None) => (Action::Create, desired.clone()),
        (Target::Present, Some(current)) => {
            let changes: Attrs = desired
                .iter()
                .filter(|(key, want)| match current.get(*key) {
                    Some(have) => !want.matches(have),
                    None => false,
                })
                .map(|(key, want)| (*key, want.clone()))
                .collect();
            if changes.is_empty() {
                (Action::NoOp, changes)
            } else {
                (Action::Update, changes)
            }
        }
        (Target::Absent, None) => (Action::NoOp, Attrs::new()),
        (Target::Absent, Some(_)) => (Action::Delete, Attrs::new()),
    };

    debug!(exists, action = %action, changed = ?changes.keys().collect::<Vec<_>>(), "Resolved plan");

    ReconciliationPlan {
        exists,
        action,
        changes,
        observed,
        operations: Vec::new(),
    }
}

/// Items of `a` not in `b`, in `a`'s order.
pub fn missing_from<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().filter(|x| !b.contains(x)).cloned().collect()
}
