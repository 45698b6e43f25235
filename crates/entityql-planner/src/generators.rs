//! The generator registry for field defaults (spec §3 `FieldDefault::Generator`,
//! §4.1 create path step 6 "fill generator defaults"). Each generator produces
//! one value at plan time so the value is visible to nested-write FK
//! propagation before the row is ever sent to a `Driver`.

use chrono::Utc;
use entityql_ast::Value;
use entityql_schema::GeneratorKind;
use uuid::Uuid;

/// Cuid2-shaped id: lowercase alphanumeric, fixed length, no external crate
/// in the teacher's dependency stack provides cuid2 so this mirrors the
/// common fallback of hashing a UUIDv4 down to the expected alphabet.
const CUID_LEN: usize = 24;
const NANOID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

pub fn generate(kind: &GeneratorKind) -> Value {
    match kind {
        GeneratorKind::Cuid => Value::Str(cuid_like().into()),
        GeneratorKind::UuidV4 => Value::Str(Uuid::new_v4().to_string().into()),
        GeneratorKind::UuidV7 => Value::Str(Uuid::now_v7().to_string().into()),
        GeneratorKind::Nanoid(len) => Value::Str(nanoid(*len as usize).into()),
        GeneratorKind::Ulid => Value::Str(ulid_like().into()),
        GeneratorKind::Now => Value::Str(Utc::now().to_rfc3339().into()),
    }
}

fn cuid_like() -> String {
    let raw = Uuid::new_v4().simple().to_string();
    let mut out = String::with_capacity(CUID_LEN + 1);
    out.push('c');
    out.push_str(&raw[..CUID_LEN.min(raw.len())]);
    out
}

fn nanoid(len: usize) -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let mut out = String::with_capacity(len);
    let mut i = 0usize;
    while out.len() < len {
        let b = bytes[i % bytes.len()];
        out.push(NANOID_ALPHABET[(b as usize + i) % NANOID_ALPHABET.len()] as char);
        i += 1;
    }
    out
}

/// 26-character Crockford-base32-shaped id: millisecond timestamp prefix
/// followed by random entropy, matching ULID's layout without pulling in a
/// dedicated crate the teacher's stack doesn't already carry.
fn ulid_like() -> String {
    const CROCKFORD: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut ts_chars = [0u8; 10];
    let mut n = millis;
    for slot in ts_chars.iter_mut().rev() {
        *slot = CROCKFORD[(n & 0x1f) as usize];
        n >>= 5;
    }
    let entropy = Uuid::new_v4().simple().to_string();
    let mut out = String::with_capacity(26);
    out.push_str(std::str::from_utf8(&ts_chars).unwrap());
    out.push_str(&entropy[..16]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_v4_generator_produces_a_parseable_uuid() {
        let Value::Str(s) = generate(&GeneratorKind::UuidV4) else { panic!("expected string") };
        assert!(Uuid::parse_str(&s).is_ok());
    }

    #[test]
    fn nanoid_respects_requested_length() {
        let Value::Str(s) = generate(&GeneratorKind::Nanoid(8)) else { panic!("expected string") };
        assert_eq!(s.len(), 8);
    }

    #[test]
    fn cuid_starts_with_c() {
        let Value::Str(s) = generate(&GeneratorKind::Cuid) else { panic!("expected string") };
        assert!(s.starts_with('c'));
    }

    #[test]
    fn ulid_is_26_chars() {
        let Value::Str(s) = generate(&GeneratorKind::Ulid) else { panic!("expected string") };
        assert_eq!(s.len(), 26);
    }
}
