//! Deep merge and scalar coercion over `serde_json::Value`
//!
//! Merge rules:
//! - Objects: recursive merge
//! - A string over an existing array: split on commas, replaces the array
//! - Everything else: overlay replaces base (arrays are not appended)

use serde_json::Value as JsonValue;

/// Deep merge `overlay` into `base`
pub fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, JsonValue::String(s)) if base.is_array() => {
            *base = split_list(s);
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

fn split_list(s: &str) -> JsonValue {
    JsonValue::Array(
        s.split(',')
            .map(|item| JsonValue::String(item.to_string()))
            .collect(),
    )
}

/// Build a single-leaf nested structure: `["a", "b"]` + `v` gives `{a: {b: v}}`
pub fn nested_value<S: AsRef<str>>(path: &[S], leaf: JsonValue) -> JsonValue {
    path.iter().rev().fold(leaf, |acc, key| {
        let mut map = serde_json::Map::new();
        map.insert(key.as_ref().to_string(), acc);
        JsonValue::Object(map)
    })
}

/// Look up a nested value by path
pub fn get_path<'a, S: AsRef<str>>(value: &'a JsonValue, path: &[S]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(key.as_ref()).and_then(|v| get_path(v, remaining)),
        _ => None,
    }
}

/// Coerce a `--set` style scalar
///
/// Numbers are only produced when they print back to the exact input, so
/// `1.10`, `007` and `2.0` stay strings. Commas are kept inside strings;
/// list conversion only happens when the merge lands on an existing array.
pub fn parse_scalar(val: &str) -> JsonValue {
    match val {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        "null" => return JsonValue::Null,
        _ => {}
    }

    if let Ok(num) = val.parse::<i64>() {
        if num.to_string() == val {
            return JsonValue::Number(num.into());
        }
    } else if let Ok(num) = val.parse::<f64>() {
        if num.is_finite() && num.to_string() == val {
            if let Some(num) = serde_json::Number::from_f64(num) {
                return JsonValue::Number(num);
            }
        }
    }

    JsonValue::String(val.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge() {
        let mut base: JsonValue = serde_yaml::from_str(r#"
image:
  repository: nginx
  tag: "1.0"
replicas: 1
"#).unwrap();

        let overlay: JsonValue = serde_yaml::from_str(r#"
image:
  tag: "2.0"
  pullPolicy: Always
replicas: 3
"#).unwrap();

        deep_merge(&mut base, &overlay);

        assert_eq!(base["image"]["repository"], "nginx");
        assert_eq!(base["image"]["tag"], "2.0");
        assert_eq!(base["image"]["pullPolicy"], "Always");
        assert_eq!(base["replicas"], 3);
    }

    #[test]
    fn test_merge_keeps_siblings() {
        let mut base = json!({"a": {"b": {"c": "old", "d": 1}, "e": true}});
        deep_merge(&mut base, &json!({"a": {"b": {"c": "x"}}}));

        assert_eq!(base, json!({"a": {"b": {"c": "x", "d": 1}, "e": true}}));
    }

    #[test]
    fn test_string_over_array_is_split() {
        let mut base = json!({"hosts": ["old"]});
        deep_merge(&mut base, &json!({"hosts": "v1,v2"}));
        assert_eq!(base["hosts"], json!(["v1", "v2"]));

        let mut single = json!({"hosts": ["a", "b"]});
        deep_merge(&mut single, &json!({"hosts": "only"}));
        assert_eq!(single["hosts"], json!(["only"]));
    }

    #[test]
    fn test_string_over_scalar_is_literal() {
        let mut base = json!({"name": "before"});
        deep_merge(&mut base, &json!({"name": "v1,v2"}));
        assert_eq!(base["name"], "v1,v2");
    }

    #[test]
    fn test_array_replaces_array() {
        let mut base = json!({"items": [1, 2, 3]});
        deep_merge(&mut base, &json!({"items": [4]}));
        assert_eq!(base["items"], json!([4]));
    }

    #[test]
    fn test_get_path() {
        let value = json!({"values": {"image": {"tag": "v1"}}, "replicas": 3});

        assert_eq!(get_path(&value, &["values", "image", "tag"]), Some(&json!("v1")));
        assert_eq!(get_path(&value, &["replicas"]), Some(&json!(3)));
        assert_eq!(get_path(&value, &["replicas", "nested"]), None);
        assert_eq!(get_path(&value, &["missing"]), None);
    }

    #[test]
    fn test_nested_value() {
        let v = nested_value(&["values", "image", "tag"], json!("v2"));
        assert_eq!(v, json!({"values": {"image": {"tag": "v2"}}}));
    }

    #[test]
    fn test_parse_scalar() {
        assert_eq!(parse_scalar("true"), json!(true));
        assert_eq!(parse_scalar("false"), json!(false));
        assert_eq!(parse_scalar("null"), JsonValue::Null);
        assert_eq!(parse_scalar("600"), json!(600));
        assert_eq!(parse_scalar("1.5"), json!(1.5));
        assert_eq!(parse_scalar("a,b"), json!("a,b"));
        assert_eq!(parse_scalar("nginx"), json!("nginx"));
    }

    #[test]
    fn test_parse_scalar_keeps_lossy_numbers_as_text() {
        assert_eq!(parse_scalar("1.10"), json!("1.10"));
        assert_eq!(parse_scalar("007"), json!("007"));
        assert_eq!(parse_scalar("2.0"), json!("2.0"));
        assert_eq!(parse_scalar("+5"), json!("+5"));
        assert_eq!(parse_scalar("1e3"), json!("1e3"));
        assert_eq!(parse_scalar("NaN"), json!("NaN"));
        assert_eq!(parse_scalar("-42"), json!(-42));
    }
}
