//! snake_case ↔ camelCase conversion (spec.md §4.4 "Field-name convention").
//!
//! One rule, applied uniformly everywhere a name needs converting: split on
//! `_`, lowercase the first segment, uppercase the first rune of every
//! subsequent segment, skip empty segments. No per-field overrides exist in
//! the core.

/// Converts `snake_case` to `camelCase`.
pub fn to_camel_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, segment) in input.split('_').filter(|s| !s.is_empty()).enumerate() {
        if i == 0 {
            out.push_str(segment);
        } else {
            let mut chars = segment.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Converts `camelCase` (or `PascalCase`) to `snake_case`.
pub fn to_snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Converts every top-level key of a JSON object from snake_case to
/// camelCase, leaving nested object keys untouched (spec.md §4.6: "Nested
/// object keys are not rewritten").
pub fn camelize_top_level_keys(
    mapping: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    mapping
        .iter()
        .map(|(key, value)| (to_camel_case(key), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_basic() {
        assert_eq!(to_camel_case("employee_id"), "employeeId");
        assert_eq!(to_camel_case("has_pets"), "hasPets");
        assert_eq!(to_camel_case("id"), "id");
        assert_eq!(to_camel_case(""), "");
        assert_eq!(to_camel_case("a__b"), "aB");
    }

    #[test]
    fn snake_case_basic() {
        assert_eq!(to_snake_case("employeeId"), "employee_id");
        assert_eq!(to_snake_case("hasPets"), "has_pets");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[test]
    fn camelize_top_level_keys_matches_scenario_two() {
        let mut mapping = serde_json::Map::new();
        mapping.insert("employee_id".to_string(), serde_json::json!(1));
        mapping.insert("has_pets".to_string(), serde_json::json!(true));
        let camelized = camelize_top_level_keys(&mapping);
        assert_eq!(camelized.get("employeeId"), Some(&serde_json::json!(1)));
        assert_eq!(camelized.get("hasPets"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn nested_keys_are_never_touched_by_the_top_level_helper() {
        let mut nested = serde_json::Map::new();
        nested.insert("inner_key".to_string(), serde_json::json!(1));
        let mut mapping = serde_json::Map::new();
        mapping.insert("outer_key".to_string(), serde_json::Value::Object(nested));
        let camelized = camelize_top_level_keys(&mapping);
        let inner = camelized.get("outerKey").unwrap().as_object().unwrap();
        assert!(inner.contains_key("inner_key"));
    }
}
