//! Several starters racing to create the secret file: one secret wins and
//! every caller ends up holding it.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use latchkey_crypto_core::secret::SecretFile;

const ROUNDS: usize = 50;
const STARTERS: usize = 4;

#[test]
fn concurrent_first_load_agrees_on_one_secret() {
    for _ in 0..ROUNDS {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("reader.key");
        let barrier = Arc::new(Barrier::new(STARTERS));

        let handles: Vec<_> = (0..STARTERS)
            .map(|_| {
                let path = path.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    SecretFile::new(path).load_or_create()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let on_disk = fs::read(&path).unwrap();

        for result in results {
            let secret = result.unwrap();
            assert_eq!(secret.expose().to_vec(), on_disk);
        }
        // No temp files left behind.
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
