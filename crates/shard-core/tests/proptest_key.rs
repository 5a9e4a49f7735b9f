//! Property tests for the tenant key codec.

use proptest::prelude::*;
use shard_core::{KeyCodec, KeyPolicy, RawKey};

proptest! {
    #[test]
    fn i32_keys_roundtrip(key in any::<i32>()) {
        let codec = KeyCodec::new(KeyPolicy::Any);
        let raw = codec.encode(key).unwrap();
        prop_assert_eq!(codec.decode::<i32>(&raw).unwrap(), key);
    }

    #[test]
    fn i64_keys_roundtrip(key in any::<i64>()) {
        let codec = KeyCodec::new(KeyPolicy::Any);
        let raw = codec.encode(key).unwrap();
        prop_assert_eq!(codec.decode::<i64>(&raw).unwrap(), key);
    }

    #[test]
    fn hex_form_parses_back_to_same_bytes(key in 0..=i32::MAX) {
        let raw = KeyCodec::default().encode(key).unwrap();
        prop_assert_eq!(RawKey::from_hex(&raw.to_hex()).unwrap(), raw.clone());
        prop_assert_eq!(RawKey::from_hex(&raw.to_hex().to_lowercase()).unwrap(), raw);
    }

    #[test]
    fn encoding_preserves_order(a in any::<i32>(), b in any::<i32>()) {
        let codec = KeyCodec::new(KeyPolicy::Any);
        let (ra, rb) = (codec.encode(a).unwrap(), codec.encode(b).unwrap());
        prop_assert_eq!(a.cmp(&b), ra.cmp(&rb));
    }

    #[test]
    fn non_negative_policy_rejects_every_negative_key(key in i32::MIN..0) {
        prop_assert!(KeyCodec::default().encode(key).is_err());
    }
}
