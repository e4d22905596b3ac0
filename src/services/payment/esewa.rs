use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{GatewayClient, GatewayStatus, TransactionStatus};
use crate::errors::AppError;

pub struct EsewaClient {
    status_url: String,
    client: reqwest::Client,
}

impl EsewaClient {
    pub fn new(status_url: String) -> Self {
        Self {
            status_url,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct StatusResponse {
    status: GatewayStatus,
    ref_id: Option<String>,
}

#[async_trait]
impl GatewayClient for EsewaClient {
    async fn transaction_status(
        &self,
        product_code: &str,
        total_amount: i64,
        transaction_uuid: &str,
    ) -> anyhow::Result<TransactionStatus> {
        let total_amount = total_amount.to_string();
        let response: StatusResponse = self
            .client
            .get(&self.status_url)
            .query(&[
                ("product_code", product_code),
                ("total_amount", total_amount.as_str()),
                ("transaction_uuid", transaction_uuid),
            ])
            .send()
            .await
            .context("failed to reach eSewa status API")?
            .error_for_status()
            .context("eSewa status API returned error")?
            .json()
            .await
            .context("malformed eSewa status response")?;

        Ok(TransactionStatus {
            status: response.status,
            ref_id: response.ref_id.filter(|r| !r.is_empty()),
        })
    }
}

const REQUIRED_SIGNED_FIELDS: [&str; 5] = [
    "transaction_code",
    "status",
    "total_amount",
    "transaction_uuid",
    "product_code",
];

/// The base64 JSON document the gateway appends to `success_url` as `data`.
#[derive(Debug, Clone)]
pub struct CallbackPayload {
    pub transaction_code: String,
    pub status: String,
    pub total_amount: String,
    pub transaction_uuid: String,
    pub product_code: String,
    pub signed_field_names: String,
    pub signature: String,
    fields: Map<String, Value>,
}

impl CallbackPayload {
    pub fn decode(data: &str) -> Result<Self, AppError> {
        // A '+' that wasn't percent-encoded comes through query decoding as a space.
        let data = data.trim().replace(' ', "+");
        let raw = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|_| AppError::Gateway("callback data is not valid base64".into()))?;
        let fields: Map<String, Value> = serde_json::from_slice(&raw)
            .map_err(|_| AppError::Gateway("callback data is not a JSON object".into()))?;

        let text = |name: &str| -> Result<String, AppError> {
            match fields.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(Value::Number(n)) => Ok(n.to_string()),
                _ => Err(AppError::Gateway(format!("callback data missing {name}"))),
            }
        };

        Ok(Self {
            transaction_code: text("transaction_code")?,
            status: text("status")?,
            total_amount: text("total_amount")?,
            transaction_uuid: text("transaction_uuid")?,
            product_code: text("product_code")?,
            signed_field_names: text("signed_field_names")?,
            signature: text("signature")?,
            fields,
        })
    }

    /// Checks the signature, which must cover every field the callback is
    /// trusted for.
    pub fn verify(&self, secret_key: &str) -> Result<(), AppError> {
        let signed: Vec<&str> = self.signed_field_names.split(',').map(str::trim).collect();
        if let Some(missing) = REQUIRED_SIGNED_FIELDS.iter().find(|f| !signed.contains(*f)) {
            return Err(AppError::Gateway(format!("callback does not sign {missing}")));
        }

        let message = super::signature::message_from_fields(&self.fields, &self.signed_field_names)?;
        super::signature::verify_message(secret_key, &message, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::payment::signature::sign_message;

    const KEY: &str = "8gBm/:&EnhH.1/q";

    pub fn signed_data(key: &str, status: &str, amount: &str, uuid: &str) -> String {
        let signed = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
        let message = format!(
            "transaction_code=000AWEO,status={status},total_amount={amount},transaction_uuid={uuid},product_code=EPAYTEST,signed_field_names={signed}"
        );
        data_with(key, signed, &message, status, amount, uuid)
    }

    fn data_with(
        key: &str,
        signed: &str,
        message: &str,
        status: &str,
        amount: &str,
        uuid: &str,
    ) -> String {
        let signature = sign_message(key, message).unwrap();
        let json = serde_json::json!({
            "transaction_code": "000AWEO",
            "status": status,
            "total_amount": amount,
            "transaction_uuid": uuid,
            "product_code": "EPAYTEST",
            "signed_field_names": signed,
            "signature": signature,
        });
        base64::engine::general_purpose::STANDARD.encode(json.to_string())
    }

    #[test]
    fn test_decode_and_verify() {
        let data = signed_data(KEY, "COMPLETE", "1100.0", "uuid-1");
        let payload = CallbackPayload::decode(&data).unwrap();
        assert_eq!(payload.transaction_code, "000AWEO");
        assert_eq!(payload.total_amount, "1100.0");
        assert!(payload.verify(KEY).is_ok());
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let data = signed_data("someone-else", "COMPLETE", "1100.0", "uuid-1");
        let payload = CallbackPayload::decode(&data).unwrap();
        assert!(matches!(payload.verify(KEY), Err(AppError::Gateway(_))));
    }

    #[test]
    fn test_verify_requires_amount_and_key_signed() {
        // validly signed, but only over fields that say nothing about the payment
        let signed = "transaction_code,status,signed_field_names";
        let message = format!("transaction_code=000AWEO,status=COMPLETE,signed_field_names={signed}");
        let data = data_with(KEY, signed, &message, "COMPLETE", "1.0", "uuid-1");

        let payload = CallbackPayload::decode(&data).unwrap();
        match payload.verify(KEY) {
            Err(AppError::Gateway(msg)) => assert_eq!(msg, "callback does not sign total_amount"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage() {
        assert!(CallbackPayload::decode("%%%").is_err());
        let not_object = base64::engine::general_purpose::STANDARD.encode("[1,2]");
        assert!(CallbackPayload::decode(&not_object).is_err());
    }
}
