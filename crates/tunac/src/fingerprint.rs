use sha2::{Digest, Sha256};

use crate::ops::Op;

/// SHA-256 of a procedure's JSON encoding, lowercase hex.
pub fn procedure_digest(ops: &[Op]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(ops)?;
    let mut h = Sha256::new();
    h.update(b"tuna.procedure.v1\0");
    h.update(bytes);
    Ok(hex_lower(&h.finalize()))
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
