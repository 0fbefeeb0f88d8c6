use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Random characters after the prefix.
pub const SECRET_LEN: usize = 32;

/// Characters of the random part kept in the display prefix.
const VISIBLE_CHARS: usize = 4;

/// A freshly generated secret. `plaintext` is handed to the caller once and
/// never persisted.
pub struct GeneratedSecret {
    pub plaintext: String,
    pub hash: String,
    pub display_prefix: String,
}

pub fn generate(prefix: &str) -> GeneratedSecret {
    let random: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(char::from)
        .collect();
    let plaintext = format!("{}{}", prefix, random);
    GeneratedSecret {
        hash: hash(&plaintext),
        display_prefix: format!("{}{}", prefix, &random[..VISIBLE_CHARS]),
        plaintext,
    }
}

/// SHA-256 hex digest used as the lookup column.
pub fn hash(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Constant-time comparison of two digests.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Log-safe rendering of a presented secret.
pub fn mask(secret: &str) -> String {
    if secret.len() > 8 && secret.is_char_boundary(4) && secret.is_char_boundary(secret.len() - 4) {
        format!("{}…{}", &secret[..4], &secret[secret.len() - 4..])
    } else {
        "****".to_string()
    }
}
