//! Mandrill webhook signature verification.
//!
//! Mandrill signs each webhook POST with the webhook's key and sends the
//! result in the `X-Mandrill-Signature` header.
//! Reference: https://mailchimp.com/developer/transactional/guides/track-respond-activity-webhooks/#authenticating-webhook-requests

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::warn;

type HmacSha1 = Hmac<Sha1>;

/// Header carrying the Mandrill signature.
pub const SIGNATURE_HEADER: &str = "X-Mandrill-Signature";

/// Compute the Mandrill signature for a request.
///
/// The signed data is the webhook URL followed by every POST parameter,
/// sorted by name, with each name and value appended without delimiters.
/// The signature is the base64 encoded HMAC-SHA1 of that data.
pub fn mandrill_signature(key: &str, url: &str, params: &[(String, String)]) -> Option<String> {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut mac = match HmacSha1::new_from_slice(key.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("mandrill_signature_invalid_key");
            return None;
        }
    };

    mac.update(url.as_bytes());
    for (name, value) in sorted {
        mac.update(name.as_bytes());
        mac.update(value.as_bytes());
    }

    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verify a Mandrill webhook signature against any of the configured keys.
///
/// # Arguments
///
/// * `keys` - Webhook keys from the Mandrill dashboard
/// * `url` - The webhook URL exactly as registered with Mandrill
/// * `params` - All POST parameters of the request
/// * `signature` - The `X-Mandrill-Signature` header value
///
/// # Returns
///
/// `true` if one of the keys produces the given signature.
pub fn verify_mandrill_signature(
    keys: &[String],
    url: &str,
    params: &[(String, String)],
    signature: &str,
) -> bool {
    if signature.is_empty() || url.is_empty() {
        warn!(
            has_url = !url.is_empty(),
            has_signature = !signature.is_empty(),
            "mandrill_signature_missing_fields"
        );
        return false;
    }

    let valid = keys
        .iter()
        .filter(|key| !key.is_empty())
        .filter_map(|key| mandrill_signature(key, url, params))
        .any(|expected| constant_time_compare(&expected, signature));

    if !valid {
        warn!(
            key_count = keys.len(),
            param_count = params.len(),
            "mandrill_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if Mandrill signature verification is enabled.
///
/// Both a non-empty key and the registered URL are needed to verify.
pub fn is_signature_verification_enabled(keys: &Option<Vec<String>>, url: &Option<String>) -> bool {
    let has_key = keys
        .as_ref()
        .map(|keys| keys.iter().any(|k| !k.trim().is_empty()))
        .unwrap_or(false);
    let has_url = url.as_ref().map(|u| !u.trim().is_empty()).unwrap_or(false);

    has_key && has_url
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/webhooks/mandrill";

    fn params(events: &str) -> Vec<(String, String)> {
        vec![("mandrill_events".to_string(), events.to_string())]
    }

    #[test]
    fn test_signature_matches_manual_computation() {
        let mut mac = HmacSha1::new_from_slice(b"secret").unwrap();
        mac.update(b"https://example.com/hookamandrill_events[]zlast");
        let expected = STANDARD.encode(mac.finalize().into_bytes());

        // Parameters are signed in name order, not request order
        let unsorted = vec![
            ("z".to_string(), "last".to_string()),
            ("mandrill_events".to_string(), "[]".to_string()),
            ("a".to_string(), "".to_string()),
        ];

        assert_eq!(
            mandrill_signature("secret", "https://example.com/hook", &unsorted),
            Some(expected)
        );
    }

    #[test]
    fn test_verify_signature_valid() {
        let signature = mandrill_signature("key", URL, &params("[]")).unwrap();

        assert!(verify_mandrill_signature(
            &["key".to_string()],
            URL,
            &params("[]"),
            &signature
        ));
    }

    #[test]
    fn test_verify_signature_any_key() {
        let signature = mandrill_signature("second", URL, &params("[]")).unwrap();
        let keys = vec!["first".to_string(), "second".to_string()];

        assert!(verify_mandrill_signature(&keys, URL, &params("[]"), &signature));
    }

    #[test]
    fn test_verify_signature_tampered() {
        let keys = vec!["key".to_string()];
        let signature = mandrill_signature("key", URL, &params("[]")).unwrap();

        assert!(!verify_mandrill_signature(&keys, URL, &params("[{}]"), &signature));
        assert!(!verify_mandrill_signature(
            &keys,
            "https://example.com/other",
            &params("[]"),
            &signature
        ));
        assert!(!verify_mandrill_signature(
            &["other".to_string()],
            URL,
            &params("[]"),
            &signature
        ));
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        let keys = vec!["key".to_string()];

        assert!(!verify_mandrill_signature(&keys, URL, &params("[]"), ""));
        assert!(!verify_mandrill_signature(&keys, "", &params("[]"), "sig"));
        assert!(!verify_mandrill_signature(&[], URL, &params("[]"), "sig"));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        let url = Some(URL.to_string());

        assert!(!is_signature_verification_enabled(&None, &url));
        assert!(!is_signature_verification_enabled(&Some(vec![]), &url));
        assert!(!is_signature_verification_enabled(
            &Some(vec!["   ".to_string()]),
            &url
        ));
        assert!(!is_signature_verification_enabled(
            &Some(vec!["key123".to_string()]),
            &None
        ));
        assert!(is_signature_verification_enabled(
            &Some(vec!["key123".to_string()]),
            &url
        ));
    }
}
