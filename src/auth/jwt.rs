use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};

/// Decodes the claims segment of a JWT without verifying its signature.
///
/// The claims are only used to read identifiers the token server embeds
/// (client id, audience), never for trust decisions. Malformed tokens decode
/// to an empty object.
pub(crate) fn decode_claims(token: &str) -> Value {
    let part = token.split('.').nth(1).unwrap_or_default();
    decode_part(part)
}

fn decode_part(part: &str) -> Value {
    if part.is_empty() {
        return Value::Object(Map::new());
    }

    match URL_SAFE_NO_PAD
        .decode(part.trim_end_matches('='))
        .ok()
        .and_then(|decoded| serde_json::from_slice::<Value>(&decoded).ok())
    {
        Some(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build_token(claims: &Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "none"}).to_string());
        let claims_part = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{claims_part}.sig")
    }

    #[test]
    fn decode_extracts_claims() {
        let token = build_token(&json!({"aud": "https://api.example", "azp": "client-1"}));
        let claims = decode_claims(&token);
        assert_eq!(claims["azp"], json!("client-1"));
        assert_eq!(claims["aud"], json!("https://api.example"));
    }

    #[test]
    fn malformed_token_decodes_to_empty_object() {
        assert_eq!(decode_claims("not-a-jwt"), json!({}));
        assert_eq!(decode_claims(""), json!({}));
        assert_eq!(decode_claims("a.%%%.c"), json!({}));
    }
}
