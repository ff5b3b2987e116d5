#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property-based tests for credential verification.

use latchkey_crypto_core::secret::{Secret, SECRET_LEN};
use latchkey_store::{CredentialStore, Verdict, DEFAULT_SIZE_LIMIT};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever is enrolled verifies; any other value for it does not.
    #[test]
    fn enrolled_value_verifies_and_others_do_not(
        identity in ".{0,48}",
        value in ".{0,48}",
        other in ".{0,48}",
        key in any::<[u8; SECRET_LEN]>(),
    ) {
        prop_assume!(value != other);
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            CredentialStore::open(&dir.path().join("c.db"), DEFAULT_SIZE_LIMIT).unwrap();
        let secret = Secret::from(key);

        store.upsert(&secret, &identity, &value).unwrap();
        prop_assert_eq!(store.verify(&secret, &identity, &value).unwrap(), Verdict::Accepted);
        prop_assert_eq!(
            store.verify(&secret, &identity, &other).unwrap(),
            Verdict::RejectedBadValue
        );
    }
}
