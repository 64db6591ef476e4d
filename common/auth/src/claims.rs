use serde_json::Value;

/// Verified caller identity resolved from token claims or headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub tenant: String,
    pub user: String,
}

/// Renders a claim as a string; array claims yield their first string
/// element, scalar claims their display form.
pub(crate) fn claim_string(claims: &Value, name: &str) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    match claims.get(name)? {
        Value::String(value) => Some(value.clone()),
        Value::Array(items) => items.iter().find_map(|item| item.as_str().map(str::to_owned)),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::claim_string;
    use serde_json::json;

    #[test]
    fn string_claim_is_returned_verbatim() {
        let claims = json!({ "tenant": "acme" });
        assert_eq!(claim_string(&claims, "tenant"), Some("acme".to_string()));
    }

    #[test]
    fn array_claim_yields_first_string() {
        let claims = json!({ "aud": ["gateway", "other"] });
        assert_eq!(claim_string(&claims, "aud"), Some("gateway".to_string()));
    }

    #[test]
    fn scalar_claims_are_stringified() {
        let claims = json!({ "tenant": 42, "flag": true });
        assert_eq!(claim_string(&claims, "tenant"), Some("42".to_string()));
        assert_eq!(claim_string(&claims, "flag"), Some("true".to_string()));
    }

    #[test]
    fn missing_or_null_claims_are_absent() {
        let claims = json!({ "tenant": null });
        assert_eq!(claim_string(&claims, "tenant"), None);
        assert_eq!(claim_string(&claims, "nope"), None);
        assert_eq!(claim_string(&claims, ""), None);
    }
}
