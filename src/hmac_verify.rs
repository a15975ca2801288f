//! HMAC verification for inbound change notifications (§4.4).
//!
//! The teacher signs outbound requests with `Hmac<Sha256>` in
//! `vault/execution.rs::sign_request`; this mirrors that construction but
//! verifies an inbound signature with a constant-time comparison instead
//! of producing one, which the teacher never needed to do.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify that `signature_b64` is the base64-encoded HMAC-SHA256 of `body`
/// under `secret`. Constant-time so a timing side channel can't be used to
/// recover the expected signature byte by byte.
pub fn verify(body: &[u8], signature_b64: &str, secret: &str) -> bool {
    use base64::Engine;
    let Ok(expected_sig) = base64::engine::general_purpose::STANDARD.decode(signature_b64) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.ct_eq(&expected_sig).into()
}

pub fn sign(body: &[u8], secret: &str) -> String {
    use base64::Engine;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_signature() {
        let body = b"{\"topic\":\"orders/create\"}";
        let secret = "shhh";
        let sig = sign(body, secret);
        assert!(verify(body, &sig, secret));
    }

    #[test]
    fn one_bit_perturbation_fails_verification() {
        let body = b"{\"topic\":\"orders/create\"}";
        let secret = "shhh";
        let mut sig_bytes = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(sign(body, secret))
                .unwrap()
        };
        sig_bytes[0] ^= 0x01;
        let corrupted = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(sig_bytes)
        };
        assert!(!verify(body, &corrupted, secret));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let sig = sign(body, "right-secret");
        assert!(!verify(body, &sig, "wrong-secret"));
    }
}
