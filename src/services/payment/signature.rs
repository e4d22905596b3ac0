use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::errors::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Fields covered by the request signature, in signing order.
pub const SIGNED_FIELD_NAMES: &str = "total_amount,transaction_uuid,product_code";

/// `total_amount=<v>,transaction_uuid=<v>,product_code=<v>`, byte-exact.
pub fn signing_message(total_amount: i64, transaction_uuid: &str, product_code: &str) -> String {
    format!("total_amount={total_amount},transaction_uuid={transaction_uuid},product_code={product_code}")
}

pub fn sign(
    secret_key: &str,
    total_amount: i64,
    transaction_uuid: &str,
    product_code: &str,
) -> Result<String, AppError> {
    sign_message(
        secret_key,
        &signing_message(total_amount, transaction_uuid, product_code),
    )
}

pub fn sign_message(secret_key: &str, message: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid gateway secret key")))?;
    mac.update(message.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a base64 signature over `message`.
pub fn verify_message(secret_key: &str, message: &str, signature: &str) -> Result<(), AppError> {
    let expected = base64::engine::general_purpose::STANDARD
        .decode(signature.trim())
        .map_err(|_| AppError::Gateway("signature is not valid base64".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| AppError::Internal(anyhow::anyhow!("invalid gateway secret key")))?;
    mac.update(message.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| AppError::Gateway("signature mismatch".into()))
}

/// Rebuilds the message the gateway signed from the fields it says it signed,
/// in the order it lists them.
pub fn message_from_fields(fields: &Map<String, Value>, signed_field_names: &str) -> Result<String, AppError> {
    let mut parts = Vec::new();
    for name in signed_field_names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let value = match fields.get(name) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => {
                return Err(AppError::Gateway(format!(
                    "signed field {name} missing from callback payload"
                )))
            }
        };
        parts.push(format!("{name}={value}"));
    }

    if parts.is_empty() {
        return Err(AppError::Gateway("callback payload lists no signed fields".into()));
    }
    Ok(parts.join(","))
}

/// Tax on `amount` at `percent`, rounded half-up to a whole unit.
pub fn tax_for(amount: i64, percent: i64) -> i64 {
    (amount * percent + 50).div_euclid(100)
}

/// Parses a gateway amount such as `"1100"`, `"1100.0"` or `"1,100.0"` into
/// whole units. Fractional amounts are rejected.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if let Ok(whole) = cleaned.parse::<i64>() {
        return Some(whole);
    }
    let value = cleaned.parse::<f64>().ok()?;
    if value.is_finite() && (value - value.round()).abs() < 1e-9 {
        Some(value.round() as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SANDBOX_KEY: &str = "8gBm/:&EnhH.1/q";

    #[test]
    fn test_signing_message_layout() {
        assert_eq!(
            signing_message(1100, "test-uuid-123", "EPAYTEST"),
            "total_amount=1100,transaction_uuid=test-uuid-123,product_code=EPAYTEST"
        );
    }

    #[test]
    fn test_sign_fixed_vectors() {
        assert_eq!(
            sign(SANDBOX_KEY, 1000, "test-uuid-123", "EPAYTEST").unwrap(),
            "+fEjrMHTgPs/jpWbDYc2YgiqfVAeG6paxZ44zU+q8oQ="
        );
        assert_eq!(
            sign(SANDBOX_KEY, 1100, "test-uuid-123", "EPAYTEST").unwrap(),
            "MwmLKV3JpvyI3Xf0I6pmEdkuPH08wFmVYA1ZqA6uuQ8="
        );
        assert_eq!(
            sign(SANDBOX_KEY, 100, "11-201-13", "EPAYTEST").unwrap(),
            "5DZywcrTKD0gia/rsSMcrRHmJl+4Tbol6S+lWgdJ94E="
        );
    }

    #[test]
    fn test_sign_depends_on_key() {
        assert_eq!(
            sign("another-secret", 1100, "test-uuid-123", "EPAYTEST").unwrap(),
            "6n4JaMJeQnO0b3DcPV9yp0nQKZAYcKMTYPMBK/JKTgs="
        );
    }

    #[test]
    fn test_verify_message() {
        let message = signing_message(1100, "test-uuid-123", "EPAYTEST");
        assert!(verify_message(SANDBOX_KEY, &message, "MwmLKV3JpvyI3Xf0I6pmEdkuPH08wFmVYA1ZqA6uuQ8=").is_ok());

        let tampered = signing_message(11, "test-uuid-123", "EPAYTEST");
        let err = verify_message(SANDBOX_KEY, &tampered, "MwmLKV3JpvyI3Xf0I6pmEdkuPH08wFmVYA1ZqA6uuQ8=")
            .unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));

        let err = verify_message(SANDBOX_KEY, &message, "not base64!").unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
    }

    #[test]
    fn test_message_from_fields_follows_listed_order() {
        let fields: Map<String, Value> = serde_json::from_str(
            r#"{"product_code":"EPAYTEST","total_amount":"1100","transaction_uuid":"abc","status":"COMPLETE"}"#,
        )
        .unwrap();
        assert_eq!(
            message_from_fields(&fields, "status,total_amount,transaction_uuid").unwrap(),
            "status=COMPLETE,total_amount=1100,transaction_uuid=abc"
        );
        assert!(message_from_fields(&fields, "transaction_code").is_err());
    }

    #[test]
    fn test_tax_rounding() {
        assert_eq!(tax_for(1000, 10), 100);
        assert_eq!(tax_for(1005, 10), 101);
        assert_eq!(tax_for(1004, 10), 100);
        assert_eq!(tax_for(0, 10), 0);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1100"), Some(1100));
        assert_eq!(parse_amount("1100.0"), Some(1100));
        assert_eq!(parse_amount("1,100.0"), Some(1100));
        assert_eq!(parse_amount("1100.5"), None);
        assert_eq!(parse_amount("abc"), None);
    }
}
