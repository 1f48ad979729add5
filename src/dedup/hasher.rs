//! Record fingerprinting.
//!
//! A fingerprint is the SHA256 of a canonical JSON rendering of a record:
//! object keys are sorted at every level and volatile fields are dropped, so
//! field order and poll timestamps never change the hash.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Computes deterministic content fingerprints.
///
/// # Example
///
/// ```rust
/// use feedgate::dedup::Fingerprinter;
/// use serde_json::json;
///
/// let fp = Fingerprinter::new(["lastChecked"]);
/// let a = fp.fingerprint(&json!({"id": 1, "status": "open", "lastChecked": "10:00"}));
/// let b = fp.fingerprint(&json!({"status": "open", "lastChecked": "10:05", "id": 1}));
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    volatile: HashSet<String>,
}

impl Fingerprinter {
    /// Creates a fingerprinter that ignores the given field names.
    #[must_use]
    pub fn new<I, S>(volatile_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            volatile: volatile_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the lowercase hex SHA256 of the record's canonical form.
    #[must_use]
    pub fn fingerprint(&self, record: &Value) -> String {
        digest(self.canonicalize(record).as_bytes())
    }

    /// Returns the fingerprint of a batch.
    ///
    /// Hashes the sorted list of record fingerprints, so reordering records
    /// does not change the result.
    #[must_use]
    pub fn fingerprint_batch(&self, records: &[Value]) -> String {
        let mut fingerprints: Vec<String> = records.iter().map(|r| self.fingerprint(r)).collect();
        fingerprints.sort_unstable();
        digest(fingerprints.join("\n").as_bytes())
    }

    /// Renders the canonical form that fingerprints are computed over.
    #[must_use]
    pub fn canonicalize(&self, record: &Value) -> String {
        let mut out = String::new();
        self.write_canonical(record, &mut out);
        out
    }

    fn write_canonical(&self, value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map
                    .keys()
                    .filter(|key| !self.volatile.contains(key.as_str()))
                    .collect();
                keys.sort_unstable();

                out.push('{');
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_json_string(key, out);
                    out.push(':');
                    if let Some(child) = map.get(key) {
                        self.write_canonical(child, out);
                    }
                }
                out.push('}');
            },
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_canonical(item, out);
                }
                out.push(']');
            },
            // Scalars render as compact JSON through `Display`.
            scalar => {
                let _ = write!(out, "{scalar}");
            },
        }
    }
}

fn write_json_string(s: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::String(s.to_string()));
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fp() -> Fingerprinter {
        Fingerprinter::new(["lastChecked", "updatedAt"])
    }

    #[test]
    fn test_fingerprint_is_64_char_hex() {
        let hash = fp().fingerprint(&json!({"id": "cam-1"}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let a = json!({"id": "cam-1", "status": "online", "location": {"lat": 1.5, "lng": 2.5}});
        let b = json!({"location": {"lng": 2.5, "lat": 1.5}, "status": "online", "id": "cam-1"});
        assert_eq!(fp().fingerprint(&a), fp().fingerprint(&b));
    }

    #[test]
    fn test_volatile_fields_are_ignored() {
        let a = json!({"id": 1, "status": "open", "lastChecked": "2026-01-01T00:00:00Z"});
        let b = json!({"id": 1, "status": "open", "lastChecked": "2026-01-01T00:05:00Z"});
        let c = json!({"id": 1, "status": "open"});
        assert_eq!(fp().fingerprint(&a), fp().fingerprint(&b));
        assert_eq!(fp().fingerprint(&a), fp().fingerprint(&c));
    }

    #[test]
    fn test_nested_volatile_fields_are_ignored() {
        let a = json!({"id": 1, "check": {"ok": true, "updatedAt": 1}});
        let b = json!({"id": 1, "check": {"ok": true, "updatedAt": 2}});
        assert_eq!(fp().fingerprint(&a), fp().fingerprint(&b));
    }

    #[test]
    fn test_significant_change_changes_hash() {
        let a = json!({"id": 1, "status": "open"});
        let b = json!({"id": 1, "status": "closed"});
        assert_ne!(fp().fingerprint(&a), fp().fingerprint(&b));
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!({"lanes": [1, 2]});
        let b = json!({"lanes": [2, 1]});
        assert_ne!(fp().fingerprint(&a), fp().fingerprint(&b));
    }

    #[test]
    fn test_canonical_form() {
        let canonical = fp().canonicalize(&json!({"b": "x\"y", "a": [true, null, 3]}));
        assert_eq!(canonical, r#"{"a":[true,null,3],"b":"x\"y"}"#);
    }

    #[test]
    fn test_batch_fingerprint_ignores_record_order() {
        let r1 = json!({"id": 1});
        let r2 = json!({"id": 2});
        let r3 = json!({"id": 3});
        let forward = fp().fingerprint_batch(&[r1.clone(), r2.clone(), r3.clone()]);
        let reversed = fp().fingerprint_batch(&[r3, r2, r1]);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_batch_fingerprint_differs_from_subset() {
        let r1 = json!({"id": 1});
        let r2 = json!({"id": 2});
        assert_ne!(
            fp().fingerprint_batch(&[r1.clone(), r2]),
            fp().fingerprint_batch(&[r1])
        );
    }

    #[test]
    fn test_empty_batch() {
        assert_eq!(fp().fingerprint_batch(&[]).len(), 64);
    }
}
