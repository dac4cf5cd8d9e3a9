use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::{CryptoError, Result};

const PUBLIC_KEY_HEADER: &str = "-----BEGIN RSA PUBLIC KEY-----";
const PUBLIC_KEY_FOOTER: &str = "-----END RSA PUBLIC KEY-----";

/// Signs a payload with an RSA private key in PKCS#1 PEM form and returns
/// the RSA-SHA256 signature as a hex string.
pub fn sign_data(private_key_pem: &str, payload: &str) -> Result<String> {
    let private_key = RsaPrivateKey::from_pkcs1_pem(private_key_pem)
        .map_err(|e| CryptoError::Key(format!("could not parse private key: {e}")))?;

    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key.sign(payload.as_bytes());

    Ok(hex::encode(signature.to_bytes()))
}

/// Parses a public key in stripped textual form. The PEM body may sit on a
/// single line, which strict PEM parsers reject, so the base64 body is
/// decoded by hand.
fn parse_stripped_public_key(stripped: &str) -> Result<RsaPublicKey> {
    let start = stripped
        .find(PUBLIC_KEY_HEADER)
        .ok_or_else(|| CryptoError::Key("public key header not found".to_string()))?
        + PUBLIC_KEY_HEADER.len();
    let end = stripped
        .find(PUBLIC_KEY_FOOTER)
        .ok_or_else(|| CryptoError::Key("public key footer not found".to_string()))?;

    if end < start {
        return Err(CryptoError::Key("malformed public key framing".to_string()));
    }

    let body: String = stripped[start..end].chars().filter(|c| !c.is_whitespace()).collect();

    let der = BASE64
        .decode(body)
        .map_err(|e| CryptoError::Key(format!("public key base64 decoding failed: {e}")))?;

    RsaPublicKey::from_pkcs1_der(&der)
        .map_err(|e| CryptoError::Key(format!("could not parse public key: {e}")))
}

/// Verifies a hex RSA-SHA256 signature over a payload.
///
/// Returns false on any parse or verification failure; this function never
/// surfaces an error to the caller.
pub fn verify_signature(stripped_public_key: &str, hex_signature: &str, payload: &str) -> bool {
    let public_key = match parse_stripped_public_key(stripped_public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let signature_bytes = match hex::decode(hex_signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let signature = match Signature::try_from(signature_bytes.as_slice()) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    VerifyingKey::<Sha256>::new(public_key)
        .verify(payload.as_bytes(), &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{generate_key_pair, strip_public_key};
    use tempfile::tempdir;

    fn test_key_pair() -> (String, String) {
        let dir = tempdir().unwrap();
        let private_path = dir.path().join("private.txt");
        let public_path = dir.path().join("public.txt");

        generate_key_pair(&private_path, &public_path).unwrap();

        let private_pem = std::fs::read_to_string(&private_path).unwrap();
        let public_pem = std::fs::read_to_string(&public_path).unwrap();

        (private_pem, strip_public_key(&public_pem))
    }

    #[test]
    fn sign_verify_round_trip() {
        let (private_pem, stripped_public) = test_key_pair();

        let payload = r#"{"hash":"abc","public_key":"k","shoggoth_id":"SHOGabc","timestamp":"1"}"#;
        let signature = sign_data(&private_pem, payload).unwrap();

        assert!(verify_signature(&stripped_public, &signature, payload));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let (private_pem, stripped_public) = test_key_pair();

        let signature = sign_data(&private_pem, "payload").unwrap();

        assert!(!verify_signature(&stripped_public, &signature, "payloae"));
    }

    #[test]
    fn garbage_inputs_do_not_verify() {
        let (private_pem, stripped_public) = test_key_pair();
        let signature = sign_data(&private_pem, "payload").unwrap();

        assert!(!verify_signature("not a key", &signature, "payload"));
        assert!(!verify_signature(&stripped_public, "not hex", "payload"));
        assert!(!verify_signature(&stripped_public, "abcd", "payload"));
    }
}
