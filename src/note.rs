//! Ed25519 signed notes carrying tree heads.
//!
//! A note is a short text (here: the three-line tree head) followed by a
//! blank line and one signature line per signer:
//!
//! ```text
//! go.sum database tree
//! 42
//! <base64 root>
//!
//! — <name> <base64(keyhash[4] || signature[64])>
//! ```
//!
//! Keys are bound to a server name. The signer key encodes the Ed25519 seed,
//! the verifier key the public key; both carry a 4-byte hash of
//! `name || '\n' || public key material` so a verifier can be matched to a
//! signature line without trial verification.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier as _;
use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use sha2::Digest;
use sha2::Sha256;

use crate::error::{Result, SumdbError};
use crate::tlog::{format_tree, parse_tree, Tree};

/// Algorithm byte prefixed to key material in the encoded key strings.
const ALG_ED25519: u8 = 0x01;

const SIGNER_PREFIX: &str = "PRIVATE+KEY+";
const SIG_LINE_PREFIX: &str = "\u{2014} "; // "— "

/// Generate a fresh key pair bound to `name`.
///
/// Returns `(signer_key, verifier_key)`. The signer key is secret; the
/// verifier key is published for clients.
pub fn generate_keys(name: &str) -> Result<(String, String)> {
    check_name(name)?;
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);
    let pubkey = key_material(signing_key.verifying_key().as_bytes());
    let hash = key_hash(name, &pubkey);

    let skey = format!(
        "{SIGNER_PREFIX}{name}+{hash:08x}+{}",
        BASE64.encode(key_material(&seed))
    );
    let vkey = format!("{name}+{hash:08x}+{}", BASE64.encode(&pubkey));
    Ok((skey, vkey))
}

/// Holder of a signing key, able to issue signed tree heads.
#[derive(Clone)]
pub struct NoteSigner {
    name: String,
    hash: u32,
    key: SigningKey,
}

impl NoteSigner {
    /// Parse a `PRIVATE+KEY+<name>+<hash>+<base64 seed>` signer key.
    pub fn new(skey: &str) -> Result<Self> {
        let rest = skey.strip_prefix(SIGNER_PREFIX).ok_or_else(|| SumdbError::InvalidKey {
            reason: "missing PRIVATE+KEY prefix".into(),
        })?;
        let (name, hash, material) = parse_key_body(rest)?;
        let seed: [u8; 32] = material.try_into().map_err(|_| SumdbError::InvalidKey {
            reason: "signer key material must be a 32-byte seed".into(),
        })?;
        let key = SigningKey::from_bytes(&seed);

        // The embedded hash commits to the public key; recompute and compare
        // so a truncated or mispasted key fails loudly.
        let pubkey = key_material(key.verifying_key().as_bytes());
        if hash != key_hash(&name, &pubkey) {
            return Err(SumdbError::InvalidKey {
                reason: "key hash does not match key material".into(),
            });
        }
        Ok(Self { name, hash, key })
    }

    /// The server name this key is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sign a tree head, returning the full signed-note bytes.
    pub fn sign_tree_head(&self, tree: &Tree) -> Vec<u8> {
        let text = format_tree(tree);
        let sig = self.key.sign(text.as_bytes());

        let mut payload = Vec::with_capacity(4 + 64);
        payload.extend_from_slice(&self.hash.to_be_bytes());
        payload.extend_from_slice(&sig.to_bytes());

        let mut note = text.into_bytes();
        note.push(b'\n');
        note.extend_from_slice(
            format!("{SIG_LINE_PREFIX}{} {}\n", self.name, BASE64.encode(&payload)).as_bytes(),
        );
        note
    }

    /// The verifier key matching this signer.
    pub fn verifier_key(&self) -> String {
        let pubkey = key_material(self.key.verifying_key().as_bytes());
        format!("{}+{:08x}+{}", self.name, self.hash, BASE64.encode(&pubkey))
    }
}

impl std::fmt::Debug for NoteSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose key material.
        f.debug_struct("NoteSigner").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Holder of a public key, able to verify signed tree heads.
#[derive(Debug, Clone)]
pub struct NoteVerifier {
    name: String,
    hash: u32,
    key: VerifyingKey,
}

impl NoteVerifier {
    /// Parse a `<name>+<hash>+<base64 pubkey>` verifier key.
    pub fn new(vkey: &str) -> Result<Self> {
        let (name, hash, material) = parse_key_body(vkey)?;
        let pubkey: [u8; 32] = material.as_slice().try_into().map_err(|_| SumdbError::InvalidKey {
            reason: "verifier key material must be a 32-byte public key".into(),
        })?;
        let key = VerifyingKey::from_bytes(&pubkey).map_err(|_| SumdbError::InvalidKey {
            reason: "not a valid Ed25519 public key".into(),
        })?;
        if hash != key_hash(&name, &key_material(&pubkey)) {
            return Err(SumdbError::InvalidKey {
                reason: "key hash does not match key material".into(),
            });
        }
        Ok(Self { name, hash, key })
    }

    /// The server name this key is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Verify a signed note and parse the tree head it carries.
    ///
    /// Structural failures (bad UTF-8, missing framing, malformed
    /// signature lines) yield [`SumdbError::InvalidNote`]. A well-formed
    /// note without a valid signature from this key yields
    /// [`SumdbError::VerifyFailed`]. A verified note whose text is not a
    /// tree head yields [`SumdbError::InvalidNote`].
    pub fn verify_tree_head(&self, signed: &[u8]) -> Result<Tree> {
        let text = self.open(signed)?;
        parse_tree(text)
    }

    // Split the note into text and signature lines and check that at least
    // one signature line matches this verifier's name, key hash, and key.
    fn open<'a>(&self, signed: &'a [u8]) -> Result<&'a str> {
        let malformed = |reason: &str| SumdbError::InvalidNote {
            reason: reason.to_string(),
        };
        let msg = std::str::from_utf8(signed).map_err(|_| malformed("not valid UTF-8"))?;
        let split = msg.rfind("\n\n").ok_or_else(|| malformed("missing text/signature separator"))?;
        let (text, sigs) = (&msg[..split + 1], &msg[split + 2..]);
        if sigs.is_empty() || !sigs.ends_with('\n') {
            return Err(malformed("missing signature lines"));
        }

        for line in sigs.lines() {
            let rest = line
                .strip_prefix(SIG_LINE_PREFIX)
                .ok_or_else(|| malformed("malformed signature line"))?;
            let (name, b64) = rest.split_once(' ').ok_or_else(|| malformed("malformed signature line"))?;
            let payload = BASE64.decode(b64).map_err(|_| malformed("signature is not valid base64"))?;
            if payload.len() != 4 + 64 {
                return Err(malformed("signature payload has wrong length"));
            }
            let hash = u32::from_be_bytes(payload[..4].try_into().expect("4-byte slice"));
            if name != self.name || hash != self.hash {
                continue;
            }
            let sig = Signature::from_slice(&payload[4..]).map_err(|_| malformed("signature bytes are invalid"))?;
            if self.key.verify(text.as_bytes(), &sig).is_ok() {
                return Ok(text);
            }
            return Err(SumdbError::VerifyFailed);
        }
        // No signature from this key.
        Err(SumdbError::VerifyFailed)
    }
}

// Shared tail of both key encodings: name+hash+base64(alg || material).
fn parse_key_body(body: &str) -> Result<(String, u32, Vec<u8>)> {
    let parts: Vec<&str> = body.split('+').collect();
    if parts.len() != 3 {
        return Err(SumdbError::InvalidKey {
            reason: "expected <name>+<hash>+<key>".into(),
        });
    }
    let name = parts[0];
    check_name(name)?;
    if parts[1].len() != 8 {
        return Err(SumdbError::InvalidKey {
            reason: "key hash must be 8 hex digits".into(),
        });
    }
    let hash = u32::from_str_radix(parts[1], 16).map_err(|_| SumdbError::InvalidKey {
        reason: "key hash must be 8 hex digits".into(),
    })?;
    let data = BASE64.decode(parts[2]).map_err(|e| SumdbError::InvalidKey {
        reason: format!("bad key encoding: {e}"),
    })?;
    match data.split_first() {
        Some((&ALG_ED25519, material)) => Ok((name.to_string(), hash, material.to_vec())),
        Some(_) => Err(SumdbError::InvalidKey {
            reason: "unknown key algorithm".into(),
        }),
        None => Err(SumdbError::InvalidKey {
            reason: "empty key material".into(),
        }),
    }
}

fn key_material(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(ALG_ED25519);
    out.extend_from_slice(bytes);
    out
}

// First four bytes of SHA-256(name || '\n' || pubkey material), big endian.
fn key_hash(name: &str, pubkey: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(pubkey);
    let sum = hasher.finalize();
    u32::from_be_bytes(sum[..4].try_into().expect("4-byte slice"))
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['+', ' ', '\n']) {
        return Err(SumdbError::InvalidKey {
            reason: format!("invalid key name {name:?}"),
        });
    }
    Ok(())
}
