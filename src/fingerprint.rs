use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::RawRecord;

/// Content address of a raw record, used as the audit back-reference.
///
/// Object keys are sorted before hashing, so equal records hash equally
/// regardless of the order the scraper emitted fields in.
pub fn raw_record_ref(source: &str, raw: &RawRecord) -> String {
    let mut s = String::new();
    s.push_str(source);
    s.push('|');
    s.push_str(&sorted_keys(raw).to_string());

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let out = hasher.finalize();
    format!("sha256:{}", hex::encode(out))
}

fn sorted_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), sorted_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_keys).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_record_same_ref() {
        let a = json!({"bankName": "Tandem", "aer": "4.5%"});
        let b = json!({"aer": "4.5%", "bankName": "Tandem"});
        assert_eq!(raw_record_ref("generic", &a), raw_record_ref("generic", &b));
    }

    #[test]
    fn test_source_is_part_of_ref() {
        let a = json!({"bankName": "Tandem"});
        assert_ne!(raw_record_ref("flagstone", &a), raw_record_ref("ajbell", &a));
        assert!(raw_record_ref("flagstone", &a).starts_with("sha256:"));
    }
}
