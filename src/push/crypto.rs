//! VAPID request signing (RFC 8292) and aes128gcm payload encryption
//! (RFC 8291) for the Web Push transport.

use anyhow::{Context, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand_core::{OsRng, RngCore};
use reqwest::Url;
use sha2::Sha256;

/// VAPID tokens are short-lived; push services accept up to 24h.
const VAPID_TOKEN_LIFETIME_SECS: i64 = 12 * 60 * 60;

/// Single-record encryption; the whole message must stay under what push
/// services accept (4 KiB), so the plaintext is capped well below it.
const RECORD_SIZE: u32 = 4096;
const MAX_PLAINTEXT_LEN: usize = 3800;

// --- VAPID ---

/// The server identity key pair, registered once at process startup.
pub struct VapidKeys {
    signing_key: SigningKey,
    public_key_b64: String,
}

impl VapidKeys {
    /// Load from a URL-safe base64 raw P-256 scalar (the format `init`
    /// generates and web-push tooling exchanges).
    pub fn from_base64(private_key: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(private_key)
            .context("VAPID private key is not URL-safe base64")?;
        anyhow::ensure!(
            bytes.len() == 32,
            "VAPID private key must be 32 bytes, got {}",
            bytes.len()
        );
        let signing_key = SigningKey::from_bytes(p256::FieldBytes::from_slice(&bytes))
            .map_err(|_| anyhow::anyhow!("VAPID private key is not a valid P-256 scalar"))?;
        let public = signing_key.verifying_key().to_encoded_point(false);
        Ok(Self {
            public_key_b64: URL_SAFE_NO_PAD.encode(public.as_bytes()),
            signing_key,
        })
    }

    /// URL-safe base64 uncompressed public point, as handed to
    /// `PushManager.subscribe` in the browser.
    pub fn public_key(&self) -> &str {
        &self.public_key_b64
    }

    /// Build the `Authorization: vapid t=..., k=...` header for one
    /// endpoint. The token is audience-scoped to the endpoint origin.
    pub fn authorization(&self, endpoint: &Url, subject: &str) -> Result<String> {
        let aud = endpoint.origin().ascii_serialization();
        let exp = Utc::now().timestamp() + VAPID_TOKEN_LIFETIME_SECS;

        let header = URL_SAFE_NO_PAD.encode(br#"{"typ":"JWT","alg":"ES256"}"#);
        let claims = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "aud": aud,
                "exp": exp,
                "sub": subject,
            }))
            .context("Failed to encode VAPID claims")?,
        );
        let signing_input = format!("{header}.{claims}");
        let signature: Signature = self.signing_key.sign(signing_input.as_bytes());
        let token = format!(
            "{signing_input}.{}",
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        );
        Ok(format!("vapid t={token}, k={}", self.public_key_b64))
    }
}

/// Generate a fresh VAPID key pair as `(private, public)` URL-safe base64.
pub fn generate_vapid_keys() -> (String, String) {
    let signing_key = SigningKey::random(&mut OsRng);
    let private = URL_SAFE_NO_PAD.encode(signing_key.to_bytes());
    let public = URL_SAFE_NO_PAD.encode(
        signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes(),
    );
    (private, public)
}

// --- aes128gcm content encryption ---

/// Encrypt a payload for one subscription per RFC 8291: ECDH against the
/// client's `p256dh` key with a fresh ephemeral server key, HKDF key
/// schedule salted by the client's `auth` secret, one aes128gcm record.
///
/// Output layout: salt(16) | rs(4) | idlen(1) | server public key(65) |
/// ciphertext.
pub fn encrypt_aes128gcm(p256dh: &[u8], auth: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    anyhow::ensure!(
        plaintext.len() <= MAX_PLAINTEXT_LEN,
        "payload too large for a push message: {} bytes",
        plaintext.len()
    );
    let client_public = PublicKey::from_sec1_bytes(p256dh)
        .map_err(|_| anyhow::anyhow!("p256dh is not a valid P-256 point"))?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let server_point = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&client_public);

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);

    let (cek, nonce) = derive_keys(
        shared.raw_secret_bytes().as_slice(),
        auth,
        p256dh,
        server_point.as_bytes(),
        &salt,
    )?;

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| anyhow::anyhow!("derived content key has the wrong length"))?;
    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(0x02); // last-record delimiter
    let ciphertext = cipher
        .encrypt(aes_gcm::Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|_| anyhow::anyhow!("AES-GCM encryption failed"))?;

    let keyid = server_point.as_bytes();
    let mut out = Vec::with_capacity(16 + 4 + 1 + keyid.len() + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    out.push(keyid.len() as u8);
    out.extend_from_slice(keyid);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// RFC 8291 §3.3–3.4 key schedule, shared with the test-side decryption.
fn derive_keys(
    ecdh_secret: &[u8],
    auth: &[u8],
    client_public: &[u8],
    server_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12])> {
    let mut key_info = Vec::with_capacity(14 + client_public.len() + server_public.len());
    key_info.extend_from_slice(b"WebPush: info\0");
    key_info.extend_from_slice(client_public);
    key_info.extend_from_slice(server_public);

    let hk = Hkdf::<Sha256>::new(Some(auth), ecdh_secret);
    let mut ikm = [0u8; 32];
    hk.expand(&key_info, &mut ikm)
        .map_err(|_| anyhow::anyhow!("HKDF expand failed for IKM"))?;

    let hk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    hk.expand(b"Content-Encoding: aes128gcm\0", &mut cek)
        .map_err(|_| anyhow::anyhow!("HKDF expand failed for CEK"))?;
    let mut nonce = [0u8; 12];
    hk.expand(b"Content-Encoding: nonce\0", &mut nonce)
        .map_err(|_| anyhow::anyhow!("HKDF expand failed for nonce"))?;
    Ok((cek, nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    #[test]
    fn test_generated_keys_round_trip() {
        let (private, public) = generate_vapid_keys();
        let keys = VapidKeys::from_base64(&private).unwrap();
        assert_eq!(keys.public_key(), public);
    }

    #[test]
    fn test_from_base64_rejects_garbage() {
        assert!(VapidKeys::from_base64("not base64 !!!").is_err());
        assert!(VapidKeys::from_base64(&URL_SAFE_NO_PAD.encode([1u8; 7])).is_err());
    }

    #[test]
    fn test_vapid_authorization_verifies() {
        let (private, public) = generate_vapid_keys();
        let keys = VapidKeys::from_base64(&private).unwrap();
        let endpoint = Url::parse("https://push.example.net/send/abc123").unwrap();
        let header = keys.authorization(&endpoint, "mailto:ops@hydromate.app").unwrap();

        let rest = header.strip_prefix("vapid t=").unwrap();
        let (token, key) = rest.split_once(", k=").unwrap();
        assert_eq!(key, public);

        let mut parts = token.split('.');
        let head = parts.next().unwrap();
        let claims_b64 = parts.next().unwrap();
        let sig_b64 = parts.next().unwrap();
        assert!(parts.next().is_none());

        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(claims_b64).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example.net");
        assert_eq!(claims["sub"], "mailto:ops@hydromate.app");
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());

        let decoded_header: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(head).unwrap()).unwrap();
        assert_eq!(decoded_header["alg"], "ES256");

        let point = URL_SAFE_NO_PAD.decode(key).unwrap();
        let verifying = VerifyingKey::from_sec1_bytes(&point).unwrap();
        let signature =
            Signature::from_slice(&URL_SAFE_NO_PAD.decode(sig_b64).unwrap()).unwrap();
        verifying
            .verify(format!("{head}.{claims_b64}").as_bytes(), &signature)
            .expect("VAPID token must verify against the advertised key");
    }

    #[test]
    fn test_record_layout() {
        let client_secret = p256::SecretKey::random(&mut OsRng);
        let client_public = client_secret.public_key().to_encoded_point(false);
        let auth = [9u8; 16];

        let message = encrypt_aes128gcm(client_public.as_bytes(), &auth, b"hello").unwrap();
        assert_eq!(u32::from_be_bytes(message[16..20].try_into().unwrap()), RECORD_SIZE);
        assert_eq!(message[20], 65, "keyid is an uncompressed P-256 point");
        assert!(PublicKey::from_sec1_bytes(&message[21..86]).is_ok());
        // ciphertext = plaintext + delimiter + 16-byte GCM tag
        assert_eq!(message.len(), 86 + 5 + 1 + 16);
    }

    #[test]
    fn test_encrypt_decrypts_on_the_client_side() {
        let client_secret = p256::SecretKey::random(&mut OsRng);
        let client_point = client_secret.public_key().to_encoded_point(false);
        let auth = [3u8; 16];
        let plaintext = br#"{"title":"Time to hydrate"}"#;

        let message = encrypt_aes128gcm(client_point.as_bytes(), &auth, plaintext).unwrap();

        // Client side of RFC 8291: same schedule, roles mirrored.
        let salt = &message[..16];
        let server_point = &message[21..86];
        let server_public = PublicKey::from_sec1_bytes(server_point).unwrap();
        let shared = p256::ecdh::diffie_hellman(
            client_secret.to_nonzero_scalar(),
            server_public.as_affine(),
        );
        let (cek, nonce) = derive_keys(
            shared.raw_secret_bytes().as_slice(),
            &auth,
            client_point.as_bytes(),
            server_point,
            salt,
        )
        .unwrap();
        let cipher = Aes128Gcm::new_from_slice(&cek).unwrap();
        let record = cipher
            .decrypt(aes_gcm::Nonce::from_slice(&nonce), &message[86..])
            .expect("client must be able to decrypt");
        assert_eq!(&record[..record.len() - 1], plaintext);
        assert_eq!(record[record.len() - 1], 0x02);
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let client_secret = p256::SecretKey::random(&mut OsRng);
        let client_point = client_secret.public_key().to_encoded_point(false);
        let big = vec![b'x'; MAX_PLAINTEXT_LEN + 1];
        assert!(encrypt_aes128gcm(client_point.as_bytes(), &[0u8; 16], &big).is_err());
    }
}
