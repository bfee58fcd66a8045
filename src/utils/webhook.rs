use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// URL-safe token bound to the workflow and its current salt. Rotating the salt
/// invalidates every previously issued URL.
pub fn compute_webhook_token(secret: &str, workflow_id: Uuid, salt: Uuid) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(workflow_id.as_bytes());
    mac.update(salt.as_bytes());
    let res = mac.finalize().into_bytes();
    Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(res))
}

pub fn verify_webhook_token(secret: &str, workflow_id: Uuid, salt: Uuid, provided: &str) -> bool {
    match compute_webhook_token(secret, workflow_id, salt) {
        Some(expected) => expected.as_bytes().ct_eq(provided.as_bytes()).into(),
        None => false,
    }
}

pub fn webhook_path(workflow_id: Uuid, token: &str) -> String {
    format!("/api/hooks/{workflow_id}/{token}")
}
