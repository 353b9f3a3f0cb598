//! JSON merge-patch construction (RFC 7386).

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

/// Compute the merge patch that turns `old` into `new`.
///
/// Objects are diffed recursively so the patch only names subtrees that
/// actually changed; arrays and scalars are replaced wholesale, and keys
/// removed in `new` become explicit nulls. Returns `None` when the two
/// values are identical.
pub fn merge_patch<T: Serialize>(old: &T, new: &T) -> Result<Option<Value>> {
    let old = serde_json::to_value(old)?;
    let new = serde_json::to_value(new)?;
    Ok(diff(&old, &new))
}

fn diff(old: &Value, new: &Value) -> Option<Value> {
    if old == new {
        return None;
    }
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, new_value) in new {
                match old.get(key) {
                    Some(old_value) => {
                        if let Some(changed) = diff(old_value, new_value) {
                            patch.insert(key.clone(), changed);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), new_value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ => Some(new.clone()),
    }
}

/// Apply a merge patch to `target` in place.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(entries) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            let object = target.as_object_mut().unwrap();
            for (key, value) in entries {
                if value.is_null() {
                    object.remove(key);
                } else {
                    apply_merge_patch(object.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_values_produce_no_patch() {
        let value = json!({"status": {"phase": "Running"}});
        assert_eq!(diff(&value, &value), None);
    }

    #[test]
    fn diff_is_scoped_to_changed_subtrees() {
        let old = json!({
            "spec": {"type": "Baremetal"},
            "status": {"phase": "Running", "version": "v1.26.2"}
        });
        let new = json!({
            "spec": {"type": "Baremetal"},
            "status": {"phase": "Failed", "version": "v1.26.2"}
        });
        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch, json!({"status": {"phase": "Failed"}}));
    }

    #[test]
    fn removed_keys_become_nulls() {
        let old = json!({"status": {"message": "gone soon"}});
        let new = json!({"status": {}});
        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch, json!({"status": {"message": null}}));
    }

    #[test]
    fn arrays_are_replaced_wholesale() {
        let old = json!({"conditions": [{"type": "A"}]});
        let new = json!({"conditions": [{"type": "A"}, {"type": "B"}]});
        let patch = diff(&old, &new).unwrap();
        assert_eq!(patch, json!({"conditions": [{"type": "A"}, {"type": "B"}]}));
    }

    #[test]
    fn apply_round_trips_diff() {
        let old = json!({
            "status": {"phase": "Running", "version": "v1.25.0", "message": "ok"}
        });
        let new = json!({
            "status": {"phase": "Failed", "version": "v1.25.0"}
        });
        let patch = diff(&old, &new).unwrap();
        let mut target = old;
        apply_merge_patch(&mut target, &patch);
        assert_eq!(target, new);
    }
}
