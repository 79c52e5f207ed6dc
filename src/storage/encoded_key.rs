use crate::catalog::types::Value;

/// Encodes a scalar key value as a string whose byte order matches the value
/// order. Returns `None` for values that cannot be keys (null, list, map).
///
/// Text is kept verbatim. Integers and floats become sign-adjusted 16-digit
/// hex so numeric order survives string comparison.
pub fn encode_key_value(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.to_string()),
        Value::Integer(i) => {
            let shifted = (*i as u64) ^ 0x8000_0000_0000_0000;
            Some(format!("{shifted:016x}"))
        }
        Value::Float(f) => {
            let bits = f.to_bits();
            let mapped = if (bits >> 63) == 1 {
                !bits
            } else {
                bits ^ 0x8000_0000_0000_0000
            };
            Some(format!("{mapped:016x}"))
        }
        Value::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::Blob(bytes) => Some(bytes.iter().map(|b| format!("{b:02x}")).collect()),
        Value::List(_) | Value::Map(_) | Value::Null => None,
    }
}

#[cfg(test)]
mod tests {
    use super::encode_key_value;
    use crate::catalog::types::Value;

    #[test]
    fn integer_order_is_preserved() {
        let a = encode_key_value(&Value::Integer(-1)).expect("a");
        let b = encode_key_value(&Value::Integer(0)).expect("b");
        let c = encode_key_value(&Value::Integer(42)).expect("c");
        let d = encode_key_value(&Value::Integer(i64::MIN)).expect("d");
        assert!(d < a);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn float_order_is_preserved() {
        let vals = [-10.5, -0.25, 0.0, 0.5, 3.0, 1e10];
        let encoded: Vec<String> = vals
            .iter()
            .map(|f| encode_key_value(&Value::Float(*f)).expect("encode"))
            .collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn text_is_verbatim_and_composites_are_not_keys() {
        assert_eq!(encode_key_value(&Value::from("héllo/+")), Some("héllo/+".into()));
        assert_eq!(encode_key_value(&Value::Null), None);
        assert_eq!(encode_key_value(&Value::List(vec![Value::from("a")])), None);
        assert_eq!(encode_key_value(&Value::Blob(vec![0, 255])), Some("00ff".into()));
    }

    #[test]
    fn blobs_encode_as_ordered_lowercase_hex() {
        let blobs = [vec![], vec![0x01, 0x02], vec![0x01, 0x10], vec![0xa0]];
        let encoded: Vec<_> = blobs
            .iter()
            .map(|b| encode_key_value(&Value::Blob(b.clone())).expect("blob key"))
            .collect();
        assert_eq!(encoded, ["", "0102", "0110", "a0"]);
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }
}
