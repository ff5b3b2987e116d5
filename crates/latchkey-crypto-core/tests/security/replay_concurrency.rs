//! Many threads racing to resolve the same nonce: exactly one wins.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use latchkey_crypto_core::challenge::{compute_expected, Authenticator, NonceRegistry};
use latchkey_crypto_core::secret::Secret;

#[test]
fn concurrent_resolution_accepts_once() {
    let registry = Arc::new(NonceRegistry::new());
    let nonce = registry.issue().unwrap();
    let wins = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let wins = Arc::clone(&wins);
            thread::spawn(move || {
                if registry.resolve(&nonce).unwrap() {
                    wins.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(wins.load(Ordering::SeqCst), 1);
}

#[test]
fn parallel_authenticators_each_succeed_once() {
    let secret = Arc::new(Secret::generate().unwrap());
    let registry = Arc::new(NonceRegistry::new());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let secret = Arc::clone(&secret);
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut auth = Authenticator::new(&secret, &registry);
                let nonce = auth.issue_challenge().unwrap();
                let response = compute_expected(&secret, &nonce).unwrap();
                auth.verify(response.as_bytes()).unwrap().is_accepted()
            })
        })
        .collect();

    for h in handles {
        assert!(h.join().unwrap());
    }
    assert_eq!(registry.outstanding().unwrap(), 0);
}
