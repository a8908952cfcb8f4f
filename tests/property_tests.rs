//! Property-based tests for snapshot encoding and key composition.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Snapshot encode/decode roundtrips exactly
//! - Encoded snapshots are plain base64 text
//! - Decoding arbitrary text never panics
//! - Keys are deterministic and namespaced by sub-prefix

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::{DateTime, Utc};
use dupreq::{KEY_PREFIX, RequestSnapshot, StorageKey};
use proptest::prelude::*;

fn timestamp() -> impl Strategy<Value = Option<DateTime<Utc>>> {
    proptest::option::of(
        (-62_135_596_800i64..253_402_300_799, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| DateTime::from_timestamp(secs, nanos).unwrap()),
    )
}

fn snapshot() -> impl Strategy<Value = RequestSnapshot> {
    (
        timestamp(),
        timestamp(),
        any::<i32>(),
        proptest::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(|(begin, end, status_code, body)| RequestSnapshot {
            begin,
            end,
            status_code,
            body,
        })
}

proptest! {
    /// Property: decode(encode(s)) == s for every snapshot.
    #[test]
    fn prop_snapshot_roundtrip(s in snapshot()) {
        let decoded = RequestSnapshot::decode(&s.encode()).unwrap();
        prop_assert_eq!(decoded, s);
    }

    /// Property: the encoding only uses the base64 alphabet.
    #[test]
    fn prop_encoding_is_text_safe(s in snapshot()) {
        let encoded = s.encode();
        prop_assert!(encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')));
    }

    /// Property: decoding arbitrary text returns a result without panicking.
    #[test]
    fn prop_decode_never_panics(input in ".{0,200}") {
        let _ = RequestSnapshot::decode(&input);
        let _ = RequestSnapshot::decode_or_default(&input);
    }

    /// Property: the same key parts always give the same key.
    #[test]
    fn prop_key_is_deterministic(
        sub in proptest::option::of("[a-z]{1,8}"),
        id in "[a-zA-Z0-9_-]{1,40}"
    ) {
        let a = StorageKey::new(sub.as_deref(), &id).unwrap();
        let b = StorageKey::new(sub.as_deref(), &id).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert!(a.as_str().starts_with(KEY_PREFIX));
        prop_assert!(a.as_str().ends_with(id.as_str()));
    }

    /// Property: distinct sub-prefixes never produce the same key.
    #[test]
    fn prop_sub_prefixes_never_collide(
        a in "[a-z]{1,8}",
        b in "[a-z]{1,8}",
        id_a in "[a-zA-Z0-9_-]{1,20}",
        id_b in "[a-zA-Z0-9_-]{1,20}"
    ) {
        prop_assume!(a != b);
        let key_a = StorageKey::new(Some(&a), &id_a).unwrap();
        let key_b = StorageKey::new(Some(&b), &id_b).unwrap();
        prop_assert_ne!(key_a, key_b);
    }
}
