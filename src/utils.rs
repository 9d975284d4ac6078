use digest::Digest;
use md5::Md5;
use rand::rngs::OsRng;
use rand::RngCore;

/// Lowercase hex MD5 of a UTF-8 string
pub fn md5_hex(input: &str) -> String {
    let mut hash = Md5::new();
    hash.update(input.as_bytes());
    hex::encode(hash.finalize())
}

/// Client nonce: 8 bytes from the OS CSPRNG, hex-encoded
pub fn generate_cnonce() -> String {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Why `value` cannot be placed inside a quoted digest field, if it cannot.
///
/// Digest fields are emitted unescaped, so control characters (CR/LF in
/// particular), quotes and backslashes must never reach the wire. The caller
/// decides which error kind the problem maps to.
pub fn header_value_problem(field: &str, value: &str) -> Option<String> {
    if value.chars().any(|c| c.is_control()) {
        Some(format!("{} contains control characters", field))
    } else if value.contains(|c: char| c == '"' || c == '\\') {
        Some(format!("{} contains a quote or backslash", field))
    } else {
        None
    }
}
