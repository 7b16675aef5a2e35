// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic input fingerprints for the invocation cache.
//!
//! Canonicalization scheme: object keys sorted lexicographically by UTF-8
//! byte order, array order preserved, numbers rendered exactly as
//! serde_json does (u64/i64 stay integral, floats use the shortest
//! round-trip form), strings as UTF-8 JSON strings. The canonical bytes
//! are hashed with SHA-256 and hex-encoded. Two inputs that are equal as
//! JSON values therefore always share a fingerprint regardless of the key
//! order or whitespace they arrived with.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fingerprint of a validated input value.
pub fn fingerprint(input: &Value) -> String {
    let mut canon = String::new();
    write_canonical(input, &mut canon);
    let digest = Sha256::digest(canon.as_bytes());
    hex(&digest)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's escaping is deterministic for a given string.
            match serde_json::to_string(s) {
                Ok(quoted) => out.push_str(&quoted),
                Err(_) => unreachable!("string serialization is infallible"),
            }
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                match serde_json::to_string(key) {
                    Ok(quoted) => out.push_str(&quoted),
                    Err(_) => unreachable!("string serialization is infallible"),
                }
                out.push(':');
                if let Some(v) = map.get(key.as_str()) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = std::fmt::Write::write_fmt(&mut s, format_args!("{b:02x}"));
    }
    s
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
