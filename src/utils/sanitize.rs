use serde_json::Value;

/// Sanitizes sensitive fields in JSON payloads for logging
pub fn sanitize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, val) in map {
                let sanitized_val = if is_sensitive_field(key) {
                    mask_value(val)
                } else {
                    sanitize_json(val)
                };
                sanitized.insert(key.clone(), sanitized_val);
            }
            Value::Object(sanitized)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sanitize_json).collect()),
        _ => value.clone(),
    }
}

/// Same masking for `application/x-www-form-urlencoded` bodies, returned as JSON.
pub fn sanitize_form(body: &str) -> Option<Value> {
    let mut map = serde_json::Map::new();
    for pair in body.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=')?;
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    if map.is_empty() {
        return None;
    }
    Some(sanitize_json(&Value::Object(map)))
}

fn is_sensitive_field(key: &str) -> bool {
    matches!(
        key.to_lowercase().as_str(),
        "signature" | "sign" | "api_key" | "apikey" | "password" | "secret" | "token" | "authorization"
    )
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.chars().count() > 8 => {
            let visible: String = s.chars().take(4).collect();
            let end: String = s.chars().skip(s.chars().count() - 4).collect();
            Value::String(format!("{}****{}", visible, end))
        }
        _ => Value::String("****".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_signature() {
        let input = json!({
            "merchantOrderId": "VAZZ123",
            "signature": "5d41402abc4b2a76b9719d911017c592",
            "amount": "10000"
        });

        let sanitized = sanitize_json(&input);
        let signature = sanitized["signature"].as_str().unwrap();

        assert_eq!(signature, "5d41****c592");
        assert_eq!(sanitized["amount"], "10000");
        assert_eq!(sanitized["merchantOrderId"], "VAZZ123");
    }

    #[test]
    fn test_sanitize_nested() {
        let input = json!({
            "data": {
                "sign": "short",
                "ref_id": "VAZZ123"
            }
        });

        let sanitized = sanitize_json(&input);
        assert_eq!(sanitized["data"]["sign"], "****");
        assert_eq!(sanitized["data"]["ref_id"], "VAZZ123");
    }

    #[test]
    fn test_sanitize_form() {
        let sanitized = sanitize_form("merchantCode=D0001&signature=abcdef0123456789").unwrap();
        assert_eq!(sanitized["merchantCode"], "D0001");
        assert_eq!(sanitized["signature"], "abcd****6789");
        assert!(sanitize_form("not a form").is_none());
    }
}
