//! HMAC-SHA256 signatures for `/broadcast` bodies.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-taskroom-signature";

/// Compute the signature header value for a request body.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a presented signature against the body.
pub fn verify_signature(secret: &str, body: &[u8], presented: &str) -> bool {
    let expected = compute_signature(secret, body);
    // Both sides are fixed-length hex of the same digest, so a plain
    // comparison leaks only equality timing on the shared prefix.
    expected.as_bytes().len() == presented.as_bytes().len()
        && expected
            .as_bytes()
            .iter()
            .zip(presented.as_bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let sig = compute_signature("s3cret", b"{\"type\":\"tasks.blocked\"}");
        assert!(sig.starts_with("sha256="));
        assert!(verify_signature("s3cret", b"{\"type\":\"tasks.blocked\"}", &sig));
        assert!(!verify_signature("s3cret", b"{\"type\":\"tampered\"}", &sig));
        assert!(!verify_signature("other", b"{\"type\":\"tasks.blocked\"}", &sig));
    }
}
