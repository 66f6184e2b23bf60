//! Token codec for the portal's `t3` query parameter.
//!
//! The portal's own browser client encrypts request parameters with
//! AES-128-CBC under a key and IV shipped in its JavaScript bundle. The same
//! constants are reproduced here. They are **not secrets**: anyone can read
//! them from the portal's public assets, and the encryption only exists so the
//! server accepts the request. Changing them breaks compatibility.

use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io;

/// `preimpresoCorrec`: compatibility constant, non-confidential.
const KEY: [u8; 16] = *b"preimpresoCorrec";

/// `PParsetime17s2w3`: compatibility constant, non-confidential.
const IV: [u8; 16] = *b"PParsetime17s2w3";

/// Characters left untouched when quoting, matching the portal client's
/// quoting rules (RFC 3986 unreserved plus `/`).
const QUERY_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

/// Ordered parameter map. Keys serialize in insertion order.
pub type ParamMap = Map<String, Value>;

/// Encrypt `plaintext` and return standard base64. Empty input yields an empty string.
pub fn encrypt(plaintext: &str) -> String {
    if plaintext.is_empty() {
        return String::new();
    }
    let cipher = cbc::Encryptor::<Aes128>::new(&KEY.into(), &IV.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    STANDARD.encode(ciphertext)
}

/// Percent-encode a value for embedding in a query string.
pub fn quote(value: &str) -> String {
    utf8_percent_encode(value, QUERY_SAFE).to_string()
}

/// Encode a parameter map into the URL-safe `t3` token.
///
/// An empty map encodes `{}`, which the portal uses for parameterless calls.
pub fn encode(params: &ParamMap) -> String {
    let plaintext = compact_json(&Value::Object(params.clone()));
    quote(&encrypt(&plaintext))
}

/// Serialize without whitespace and with non-ASCII characters escaped as
/// `\uXXXX`, which is what the portal's client emits.
pub fn compact_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, AsciiFormatter);
    // Writing a `Value` into a Vec cannot fail.
    if serde::Serialize::serialize(value, &mut ser).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if ch.is_ascii() {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}
