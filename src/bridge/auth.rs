/// Request authentication for the bridge.
///
/// Two schemes, mutually exclusive with key-pair precedence:
/// - Key pair: `x-pubkey` carries the hex public key and `x-signature` a
///   signature over `method + "\n" + path + "\n" + payload`, where the
///   payload is the URL-encoded query string for GET/DELETE and the JSON
///   body otherwise.
/// - Basic auth: the account email and the client-side hex SHA-256 of the
///   password. The bridge never sees the plaintext password.
use reqwest::{Method, RequestBuilder};

use crate::config::{BasicAuth, ClientOptions};
use crate::crypto::hash;
use crate::crypto::keys::KeyPair;

/// Resolved authentication scheme for a client.
pub enum Auth {
    KeyPair(KeyPair),
    Basic {
        email: String,
        password_hash: String,
    },
    Anonymous,
}

impl Auth {
    /// Resolve the scheme from client options. A configured key pair wins
    /// over basic auth.
    pub fn from_options(options: &ClientOptions) -> Self {
        if let Some(key_pair) = &options.key_pair {
            return Auth::KeyPair(key_pair.clone());
        }
        if let Some(BasicAuth { email, password }) = &options.basic_auth {
            return Auth::Basic {
                email: email.clone(),
                password_hash: hash::sha256_hex(password.as_bytes()),
            };
        }
        Auth::Anonymous
    }

    /// The message a signed request commits to.
    pub fn signature_payload(method: &Method, path: &str, payload: &str) -> String {
        format!("{}\n{}\n{}", method.as_str(), path, payload)
    }

    /// Attach credentials to an outgoing request.
    pub fn decorate(
        &self,
        builder: RequestBuilder,
        method: &Method,
        path: &str,
        payload: &str,
    ) -> RequestBuilder {
        match self {
            Auth::KeyPair(key_pair) => {
                let message = Self::signature_payload(method, path, payload);
                builder
                    .header("x-pubkey", key_pair.public_key_hex())
                    .header("x-signature", key_pair.sign_hex(message.as_bytes()))
            }
            Auth::Basic {
                email,
                password_hash,
            } => builder.basic_auth(email, Some(password_hash)),
            Auth::Anonymous => builder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier};

    #[test]
    fn test_signature_payload_layout() {
        let payload = Auth::signature_payload(&Method::GET, "/buckets", "skip=0&limit=6");
        assert_eq!(payload, "GET\n/buckets\nskip=0&limit=6");
    }

    #[test]
    fn test_signature_verifies_over_payload() {
        let kp = KeyPair::generate();
        let message = Auth::signature_payload(&Method::PUT, "/frames/abc", r#"{"hash":"x"}"#);

        let sig_bytes = hex::decode(kp.sign_hex(message.as_bytes())).unwrap();
        let sig = Signature::from_bytes(&sig_bytes.try_into().unwrap());
        assert!(kp
            .verifying_key()
            .verify(message.as_bytes(), &sig)
            .is_ok());

        // A different payload must not verify.
        assert!(kp
            .verifying_key()
            .verify(b"PUT\n/frames/abc\n{}", &sig)
            .is_err());
    }

    #[test]
    fn test_key_pair_precedence_over_basic() {
        let options = ClientOptions {
            key_pair: Some(KeyPair::generate()),
            basic_auth: Some(BasicAuth {
                email: "user@example.com".into(),
                password: "hunter2".into(),
            }),
            ..ClientOptions::default()
        };
        assert!(matches!(Auth::from_options(&options), Auth::KeyPair(_)));
    }

    #[test]
    fn test_basic_auth_hashes_password() {
        let options = ClientOptions {
            basic_auth: Some(BasicAuth {
                email: "user@example.com".into(),
                password: "password".into(),
            }),
            ..ClientOptions::default()
        };
        match Auth::from_options(&options) {
            Auth::Basic { password_hash, .. } => assert_eq!(
                password_hash,
                "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
            ),
            _ => panic!("expected basic auth"),
        }
    }
}
