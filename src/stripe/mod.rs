//! Stripe integration via REST API (no SDK dependency)
//!
//! Checkout Sessions carry the deposit charge; the webhook endpoint verifies
//! the `Stripe-Signature` header before any processing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The slice of a Checkout Session this service cares about.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: Option<String>,
    pub customer_email: Option<String>,
    pub payment_intent_id: Option<String>,
    pub metadata_reservation_id: Option<i64>,
}

/// Parse the session object out of an API response or a webhook
/// `data.object` payload.
pub fn parse_session(obj: &serde_json::Value) -> Result<CheckoutSession, BoxError> {
    let id = obj["id"]
        .as_str()
        .ok_or_else(|| format!("Checkout session missing id: {obj}"))?
        .to_string();
    Ok(CheckoutSession {
        id,
        url: obj["url"].as_str().map(String::from),
        payment_status: obj["payment_status"].as_str().map(String::from),
        customer_email: obj
            .get("customer_details")
            .and_then(|d| d["email"].as_str())
            .map(String::from),
        payment_intent_id: obj["payment_intent"].as_str().map(String::from),
        metadata_reservation_id: obj
            .get("metadata")
            .and_then(|m| m["reservation_id"].as_str())
            .and_then(|s| s.parse().ok()),
    })
}

/// Inputs for a deposit Checkout Session.
pub struct CreateDepositSession<'a> {
    pub currency: &'a str,
    pub deposit_amount: i64,
    pub reservation_id: i64,
    pub reference_code: &'a str,
    pub service_date: &'a str,
    pub service_time: &'a str,
    pub guests: i64,
    pub customer_email: Option<&'a str>,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
    /// Unix seconds; only set when the hold TTL satisfies Stripe's minimum.
    pub expires_at: Option<i64>,
    /// Forwarded so Stripe dedups the session creation alongside our guard.
    pub idempotency_key: Option<&'a str>,
}

/// Create a payment-mode Checkout Session for the deposit.
pub async fn create_checkout_session(
    secret_key: &str,
    params: &CreateDepositSession<'_>,
) -> Result<CheckoutSession, BoxError> {
    let description = format!(
        "{} guests · {} {}",
        params.guests, params.service_date, params.service_time
    );

    let mut form: Vec<(&str, String)> = vec![
        ("mode", "payment".into()),
        ("success_url", params.success_url.into()),
        ("cancel_url", params.cancel_url.into()),
        ("line_items[0][quantity]", "1".into()),
        (
            "line_items[0][price_data][currency]",
            params.currency.into(),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            params.deposit_amount.to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            "AKAI Omakase Deposit".into(),
        ),
        (
            "line_items[0][price_data][product_data][description]",
            description,
        ),
        (
            "metadata[reservation_id]",
            params.reservation_id.to_string(),
        ),
        ("metadata[reference_code]", params.reference_code.into()),
        ("metadata[service_date]", params.service_date.into()),
        ("metadata[service_time]", params.service_time.into()),
        ("metadata[guests]", params.guests.to_string()),
        ("client_reference_id", params.reference_code.into()),
    ];
    if let Some(email) = params.customer_email {
        form.push(("customer_email", email.into()));
    }
    if let Some(expires_at) = params.expires_at {
        form.push(("expires_at", expires_at.to_string()));
    }

    let client = reqwest::Client::new();
    let mut request = client
        .post("https://api.stripe.com/v1/checkout/sessions")
        .basic_auth(secret_key, None::<&str>)
        .form(&form);
    if let Some(key) = params.idempotency_key {
        request = request.header("Idempotency-Key", key);
    }

    let resp: serde_json::Value = request.send().await?.json().await?;
    if resp.get("error").is_some() {
        return Err(format!("Stripe create_checkout failed: {resp}").into());
    }
    parse_session(&resp)
}

/// Retrieve an existing Checkout Session.
pub async fn retrieve_checkout_session(
    secret_key: &str,
    session_id: &str,
) -> Result<CheckoutSession, BoxError> {
    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .get(format!(
            "https://api.stripe.com/v1/checkout/sessions/{session_id}"
        ))
        .basic_auth(secret_key, None::<&str>)
        .send()
        .await?
        .json()
        .await?;
    if resp.get("error").is_some() {
        return Err(format!("Stripe retrieve_checkout failed: {resp}").into());
    }
    parse_session(&resp)
}

/// Verify Stripe webhook signature (HMAC-SHA256)
pub fn verify_webhook_signature(
    payload: &[u8],
    sig_header: &str,
    secret: &str,
) -> Result<(), &'static str> {
    let mut timestamp = "";
    let mut signature = "";
    for part in sig_header.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t;
        } else if let Some(v) = part.strip_prefix("v1=") {
            signature = v;
        }
    }

    if timestamp.is_empty() || signature.is_empty() {
        return Err("Invalid Stripe-Signature header");
    }

    let signed_payload = format!("{timestamp}.{}", std::str::from_utf8(payload).unwrap_or(""));
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "HMAC key error")?;
    mac.update(signed_payload.as_bytes());

    // Decode hex signature and use constant-time comparison via hmac::verify_slice
    let sig_bytes = hex::decode(signature).map_err(|_| "Invalid signature hex")?;
    mac.verify_slice(&sig_bytes)
        .map_err(|_| "Webhook signature mismatch")?;

    // Reject events older than 5 minutes to prevent replay attacks
    let ts: i64 = timestamp.parse().map_err(|_| "Invalid timestamp")?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > 300 {
        return Err("Webhook timestamp too old");
    }

    Ok(())
}

/// Build a `Stripe-Signature` header value for `payload`. Test helper for
/// exercising the webhook endpoint without Stripe.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let signed_payload = format!("{timestamp}.{}", std::str::from_utf8(payload).unwrap_or(""));
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key");
    mac.update(signed_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_roundtrip() {
        let payload = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
        let secret = "whsec_test";
        let now = chrono::Utc::now().timestamp();

        let header = sign_payload(payload, secret, now);
        assert!(verify_webhook_signature(payload, &header, secret).is_ok());
    }

    #[test]
    fn test_signature_rejects_tampered_payload() {
        let secret = "whsec_test";
        let now = chrono::Utc::now().timestamp();
        let header = sign_payload(b"{\"a\":1}", secret, now);
        assert!(verify_webhook_signature(b"{\"a\":2}", &header, secret).is_err());
    }

    #[test]
    fn test_signature_rejects_stale_timestamp() {
        let payload = b"{}";
        let secret = "whsec_test";
        let stale = chrono::Utc::now().timestamp() - 600;
        let header = sign_payload(payload, secret, stale);
        assert_eq!(
            verify_webhook_signature(payload, &header, secret),
            Err("Webhook timestamp too old")
        );
    }

    #[test]
    fn test_signature_rejects_malformed_header() {
        assert!(verify_webhook_signature(b"{}", "v1=abc", "s").is_err());
        assert!(verify_webhook_signature(b"{}", "t=123", "s").is_err());
        assert!(verify_webhook_signature(b"{}", "", "s").is_err());
    }

    #[test]
    fn test_parse_session() {
        let obj = serde_json::json!({
            "id": "cs_test_123",
            "url": "https://checkout.stripe.com/pay/cs_test_123",
            "payment_status": "paid",
            "payment_intent": "pi_123",
            "customer_details": {"email": "guest@example.com"},
            "metadata": {"reservation_id": "42"}
        });
        let session = parse_session(&obj).unwrap();
        assert_eq!(session.id, "cs_test_123");
        assert_eq!(session.payment_status.as_deref(), Some("paid"));
        assert_eq!(session.customer_email.as_deref(), Some("guest@example.com"));
        assert_eq!(session.payment_intent_id.as_deref(), Some("pi_123"));
        assert_eq!(session.metadata_reservation_id, Some(42));
    }
}
