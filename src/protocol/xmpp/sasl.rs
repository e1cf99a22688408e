//! SASL mechanisms: SCRAM-SHA-256, SCRAM-SHA-1 (RFC 5802 / RFC 7677) and PLAIN.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::common::error::{ProtocolError, ProtocolResult};

/// Supported mechanisms, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    ScramSha256,
    ScramSha1,
    Plain,
}

impl Mechanism {
    const PREFERENCE: [Mechanism; 3] = [Self::ScramSha256, Self::ScramSha1, Self::Plain];

    pub fn name(self) -> &'static str {
        match self {
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha1 => "SCRAM-SHA-1",
            Self::Plain => "PLAIN",
        }
    }

    /// Hash for SCRAM variants, `None` for PLAIN.
    pub fn scram_hash(self) -> Option<ScramHash> {
        match self {
            Self::ScramSha256 => Some(ScramHash::Sha256),
            Self::ScramSha1 => Some(ScramHash::Sha1),
            Self::Plain => None,
        }
    }
}

/// Pick the strongest mechanism the server offers.
pub fn select_mechanism<S: AsRef<str>>(offered: &[S]) -> Option<Mechanism> {
    Mechanism::PREFERENCE
        .into_iter()
        .find(|m| offered.iter().any(|o| o.as_ref() == m.name()))
}

/// PLAIN initial response: `\0authcid\0password`.
pub fn plain_response(username: &str, password: &str) -> Vec<u8> {
    let mut response = Vec::with_capacity(username.len() + password.len() + 2);
    response.push(0);
    response.extend_from_slice(username.as_bytes());
    response.push(0);
    response.extend_from_slice(password.as_bytes());
    response
}

/// Hash function behind a SCRAM variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScramHash {
    Sha1,
    Sha256,
}

impl ScramHash {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> ProtocolResult<Vec<u8>> {
        let invalid_key = |_| ProtocolError::AuthFailed {
            reason: "invalid HMAC key".to_string(),
        };
        Ok(match self {
            Self::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    /// `Hi()` from RFC 5802, i.e. PBKDF2 with one output block.
    fn hi(self, password: &[u8], salt: &[u8], iterations: u32) -> ProtocolResult<Vec<u8>> {
        let mut block = salt.to_vec();
        block.extend_from_slice(&1u32.to_be_bytes());
        let mut u = self.hmac(password, &block)?;
        let mut result = u.clone();
        for _ in 1..iterations {
            u = self.hmac(password, &u)?;
            result.iter_mut().zip(&u).for_each(|(r, x)| *r ^= x);
        }
        Ok(result)
    }
}

/// Upper bound on the PBKDF2 work a server can ask for.
const MAX_SCRAM_ITERATIONS: u32 = 100_000;

fn auth_failed(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::AuthFailed {
        reason: reason.into(),
    }
}

/// Client side of a SCRAM exchange without channel binding.
#[derive(Debug)]
pub struct ScramClient {
    hash: ScramHash,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(hash: ScramHash, username: &str, password: &str) -> Self {
        let nonce: [u8; 18] = rand::random();
        Self::with_nonce(hash, username, password, &STANDARD.encode(nonce))
    }

    pub fn with_nonce(hash: ScramHash, username: &str, password: &str, nonce: &str) -> Self {
        let username = username.replace('=', "=3D").replace(',', "=2C");
        Self {
            hash,
            password: password.to_string(),
            client_nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", username, nonce),
            server_signature: None,
        }
    }

    /// `client-first-message`, sent with `<auth/>`.
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answer the server's challenge with `client-final-message`.
    pub fn client_final(&mut self, server_first: &str) -> ProtocolResult<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", value)) => nonce = Some(value),
                Some(("s", value)) => salt = Some(value),
                Some(("i", value)) => iterations = Some(value),
                Some(("m", _)) => return Err(auth_failed("unsupported SCRAM extension")),
                _ => {}
            }
        }

        let nonce = nonce.ok_or_else(|| auth_failed("server-first missing nonce"))?;
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(auth_failed("server nonce does not extend client nonce"));
        }
        let salt = STANDARD
            .decode(salt.ok_or_else(|| auth_failed("server-first missing salt"))?)
            .map_err(|e| auth_failed(format!("bad salt: {}", e)))?;
        let iterations: u32 = iterations
            .and_then(|i| i.parse().ok())
            .filter(|i| *i > 0)
            .ok_or_else(|| auth_failed("server-first has no valid iteration count"))?;
        if iterations > MAX_SCRAM_ITERATIONS {
            return Err(auth_failed(format!(
                "iteration count {} exceeds {}",
                iterations, MAX_SCRAM_ITERATIONS
            )));
        }

        let salted = self.hash.hi(self.password.as_bytes(), &salt, iterations)?;
        let client_key = self.hash.hmac(&salted, b"Client Key")?;
        let stored_key = self.hash.digest(&client_key);

        // "biws" is base64 of the GS2 header "n,,"
        let without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let client_signature = self.hash.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = self.hash.hmac(&salted, b"Server Key")?;
        self.server_signature = Some(self.hash.hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, STANDARD.encode(proof)))
    }

    /// Check `server-final-message` against the expected server signature.
    pub fn verify_server_final(&self, server_final: &str) -> ProtocolResult<()> {
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(auth_failed(error));
        }
        let verifier = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| auth_failed("server-final missing verifier"))?;
        let verifier = STANDARD
            .decode(verifier)
            .map_err(|e| auth_failed(format!("bad verifier: {}", e)))?;

        match &self.server_signature {
            Some(expected) if *expected == verifier => Ok(()),
            Some(_) => Err(auth_failed("server signature mismatch")),
            None => Err(auth_failed("server-final before client-final")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_select_mechanism_preference() {
        assert_eq!(
            select_mechanism(&["PLAIN", "SCRAM-SHA-1", "SCRAM-SHA-256"]),
            Some(Mechanism::ScramSha256)
        );
        assert_eq!(
            select_mechanism(&["PLAIN", "SCRAM-SHA-1"]),
            Some(Mechanism::ScramSha1)
        );
        assert_eq!(select_mechanism(&["PLAIN"]), Some(Mechanism::Plain));
        assert_eq!(select_mechanism(&["DIGEST-MD5", "X-OAUTH2"]), None);
    }

    #[test]
    fn test_plain_response() {
        assert_eq!(plain_response("bridge", "secret"), b"\0bridge\0secret");
    }

    #[test]
    fn test_hi_pbkdf2_vectors() {
        // RFC 6070
        assert_eq!(
            ScramHash::Sha1.hi(b"password", b"salt", 1).unwrap(),
            hex!("0c60c80f961f0e71f3a9b524af6012062fe037a6")
        );
        assert_eq!(
            ScramHash::Sha1.hi(b"password", b"salt", 2).unwrap(),
            hex!("ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957")
        );
        assert_eq!(
            ScramHash::Sha1.hi(b"password", b"salt", 4096).unwrap(),
            hex!("4b007901b765489abead49d926f721d065a429c1")
        );
    }

    #[test]
    fn test_scram_sha1_rfc5802() {
        let mut client =
            ScramClient::with_nonce(ScramHash::Sha1, "user", "pencil", "fyko+d2lbbFgONRv9qkxdawL");
        assert_eq!(client.client_first(), "n,,n=user,r=fyko+d2lbbFgONRv9qkxdawL");

        let client_final = client
            .client_final("r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096")
            .unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,p=v0X8v3Bz2T0CJGbJQyF0X+HI4Ts="
        );

        assert!(client
            .verify_server_final("v=rmF9pqV8S7suAoZWja4dJRkFsKQ=")
            .is_ok());
        assert!(client
            .verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .is_err());
    }

    #[test]
    fn test_scram_sha256_rfc7677() {
        let mut client =
            ScramClient::with_nonce(ScramHash::Sha256, "user", "pencil", "rOprNGfwEbeRWgbNEkqO");

        let client_final = client
            .client_final(
                "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                 s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096",
            )
            .unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );
        assert!(client
            .verify_server_final("v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=")
            .is_ok());
    }

    #[test]
    fn test_scram_rejects_foreign_nonce() {
        let mut client = ScramClient::with_nonce(ScramHash::Sha1, "user", "pencil", "abc");
        let result = client.client_final("r=xyz123,s=QSXCR+Q6sek8bf92,i=4096");
        assert!(matches!(result, Err(ProtocolError::AuthFailed { .. })));
    }

    #[test]
    fn test_scram_rejects_excessive_iterations() {
        let mut client = ScramClient::with_nonce(ScramHash::Sha1, "user", "pencil", "abc");
        let result = client.client_final("r=abc123,s=QSXCR+Q6sek8bf92,i=1000000");
        assert!(matches!(result, Err(ProtocolError::AuthFailed { .. })));
        assert!(client
            .client_final("r=abc123,s=QSXCR+Q6sek8bf92,i=4096")
            .is_ok());
    }

    #[test]
    fn test_scram_username_escaping() {
        let client = ScramClient::with_nonce(ScramHash::Sha1, "a=b,c", "pw", "n");
        assert_eq!(client.client_first(), "n,,n=a=3Db=2Cc,r=n");
    }

    #[test]
    fn test_server_error_reported() {
        let client = ScramClient::with_nonce(ScramHash::Sha1, "user", "pencil", "abc");
        let err = client.verify_server_final("e=invalid-proof").unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
    }
}
