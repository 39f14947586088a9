//! Result documents returned to the caller.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::plan::ReconciliationPlan;
use crate::poller::PollState;

/// `{changed, ...entity fields}`. Fields without a value are left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub changed: bool,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl Report {
    pub fn new(changed: bool) -> Self {
        Self {
            changed,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field; `None` and JSON null are skipped.
    pub fn field<V: Serialize>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value.and_then(|v| serde_json::to_value(v).ok()) {
            if !value.is_null() {
                self.fields.insert(key.to_string(), value);
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Base report for a plan: changed iff something was done and, when a wait
/// followed, the wait did not just run out of time.
pub fn report(plan: &ReconciliationPlan, poll: Option<&PollState>) -> Report {
    let changed = !plan.is_noop() && !poll.is_some_and(PollState::timed_out);
    Report::new(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{resolve, Attrs, Target};
    use serde_json::json;

    #[test]
    fn test_absent_fields_are_omitted() {
        let report = Report::new(true)
            .field("image_name", Some("foo.iso"))
            .field::<String>("remote_path", None)
            .field("message", Some(Value::Null));
        assert_eq!(report.to_json(), json!({"changed": true, "image_name": "foo.iso"}));
    }

    #[test]
    fn test_changed_follows_plan_and_poll() {
        let noop = resolve(Target::Absent, &Attrs::new(), None);
        assert!(!report(&noop, None).changed);

        let create = resolve(Target::Present, &Attrs::new(), None);
        assert!(report(&create, None).changed);

        let mut timed_out = PollState::default();
        timed_out.outcome = Some(crate::poller::Outcome::Timeout);
        assert!(!report(&create, Some(&timed_out)).changed);
    }
}
