//! Flat and presentation forms of game configuration schemas.
//!
//! Nested objects are one level deep in practice. In the flat form used for
//! stored defaults a nested property `p` with sub-key `k` is written as
//! `p_k`; [`merge_view`] rehydrates that back into `p.k`.
//!
//! Validation against the schema belongs to each provisioner, which compiles
//! its schema with `jsonschema`.

use serde_json::{Map, Value};

fn is_object_property(property: &Value) -> bool {
    property.get("type").and_then(Value::as_str) == Some("object")
}

/// Collects every declared default into the flat form.
pub fn flatten_defaults(schema: &Value) -> Map<String, Value> {
    let mut flat = Map::new();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return flat;
    };
    for (key, property) in properties {
        if is_object_property(property) {
            let nested = property.get("properties").and_then(Value::as_object);
            for (sub_key, sub_property) in nested.into_iter().flatten() {
                if let Some(default) = sub_property.get("default") {
                    flat.insert(format!("{key}_{sub_key}"), default.clone());
                }
            }
        } else if let Some(default) = property.get("default") {
            flat.insert(key.clone(), default.clone());
        }
    }
    flat
}

/// Builds the presentation schema: a copy of `schema` where every leaf
/// property carries a `value` (its default, overlaid by `saved`) and every
/// nested object property carries its sub-keys directly (`p.k`).
///
/// `saved` may hold nested values either flat (`p_k`) or as objects (`p: {k}`).
pub fn merge_view(schema: &Value, saved: &Map<String, Value>) -> Value {
    let mut view = schema.clone();
    let Some(properties) = view.get_mut("properties").and_then(Value::as_object_mut) else {
        return view;
    };

    for property in properties.values_mut() {
        if is_object_property(property) {
            let defaults: Vec<(String, Value)> = property
                .get("properties")
                .and_then(Value::as_object)
                .into_iter()
                .flatten()
                .filter_map(|(k, sub)| sub.get("default").map(|d| (k.clone(), d.clone())))
                .collect();
            if let Some(object) = property.as_object_mut() {
                object.extend(defaults);
            }
        } else if let Some(default) = property.get("default").cloned() {
            if let Some(object) = property.as_object_mut() {
                object.insert("value".to_string(), default);
            }
        }
    }

    for (key, value) in saved {
        if let Some(property) = properties.get_mut(key) {
            let nested = is_object_property(property);
            let Some(object) = property.as_object_mut() else {
                continue;
            };
            match (nested, value.as_object()) {
                (false, _) => {
                    object.insert("value".to_string(), value.clone());
                }
                (true, Some(sub_values)) => {
                    for (sub_key, sub_value) in sub_values {
                        object.insert(sub_key.clone(), sub_value.clone());
                    }
                }
                (true, None) => {}
            }
            continue;
        }

        for (name, property) in properties.iter_mut() {
            if !is_object_property(property) {
                continue;
            }
            let Some(sub_key) = key.strip_prefix(name.as_str()).and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            if sub_key.is_empty() {
                continue;
            }
            if let Some(object) = property.as_object_mut() {
                object.insert(sub_key.to_string(), value.clone());
            }
            break;
        }
    }

    view
}
