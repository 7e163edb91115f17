// SPDX-License-Identifier: MIT OR Apache-2.0

//! Entropy gathering for key generation and session material.
//!
//! The operating system's entropy source is preferred. Without it, the
//! persisted seed file is folded through a SHA-256 accumulator — degraded
//! but workable randomness, loudly warned about. With neither, the
//! accumulator runs on whatever process-local state exists. After every
//! use a fresh digest is written back to the seed file so the next
//! fallback never reuses a seed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};
use tracing::warn;

const SEED_FILE: &str = "random";

pub(crate) struct Entropy {
    seed_file: PathBuf,
    #[cfg(test)]
    force_fallback: bool,
}

impl Entropy {
    pub(crate) fn new(state_dir: &Path) -> Self {
        Self {
            seed_file: state_dir.join(SEED_FILE),
            #[cfg(test)]
            force_fallback: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_forced_fallback(state_dir: &Path) -> Self {
        Self {
            seed_file: state_dir.join(SEED_FILE),
            force_fallback: true,
        }
    }

    fn os_entropy(&self) -> Option<[u8; 32]> {
        #[cfg(test)]
        if self.force_fallback {
            return None;
        }

        let mut seed = [0u8; 32];
        OsRng.try_fill_bytes(&mut seed).ok().map(|_| seed)
    }

    /// A generator seeded from the best available source.
    pub(crate) fn rng(&self) -> ChaCha20Rng {
        let seed = match self.os_entropy() {
            Some(seed) => seed,
            None => self.fallback_seed(),
        };
        let mut rng = ChaCha20Rng::from_seed(seed);
        self.refresh_seed_file(&mut rng);
        rng
    }

    /// Fold the persisted seed file through a digest accumulator.
    fn fallback_seed(&self) -> [u8; 32] {
        warn!("no operating system entropy source; using the persisted seed file");

        let mut accumulator = Sha256::new();
        let mut seeded = false;

        match fs::read(&self.seed_file) {
            Ok(bytes) if self.seed_file_is_private() => {
                accumulator.update(&bytes);
                seeded = !bytes.is_empty();
            }
            _ => {}
        }

        if !seeded {
            warn!("you do not have a good random number source");
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            accumulator.update(now.as_nanos().to_be_bytes());
            accumulator.update(std::process::id().to_be_bytes());
        }

        accumulator.finalize().into()
    }

    /// A seed file readable by anyone else is no secret, so no seed.
    fn seed_file_is_private(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            match fs::metadata(&self.seed_file) {
                Ok(metadata) if metadata.mode() & 0o077 != 0 => {
                    warn!(
                        "seed file {} is group- or world-accessible; ignoring it",
                        self.seed_file.display()
                    );
                    false
                }
                Ok(_) => true,
                Err(_) => false,
            }
        }
        #[cfg(not(unix))]
        {
            fs::metadata(&self.seed_file).is_ok()
        }
    }

    /// Persist fresh seed material for the next fallback. Best effort; a
    /// read-only state directory only costs future fallback quality.
    fn refresh_seed_file(&self, rng: &mut ChaCha20Rng) {
        let mut next = [0u8; 32];
        rng.fill_bytes(&mut next);
        let digest = Sha256::digest(next);

        if let Some(parent) = self.seed_file.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        if let Ok(mut file) = options.open(&self.seed_file) {
            let _ = file.write_all(&digest);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rand::RngCore;

    use super::Entropy;

    #[cfg(unix)]
    fn write_private(path: &std::path::Path, bytes: &[u8]) {
        use std::os::unix::fs::PermissionsExt;
        fs::write(path, bytes).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).unwrap();
    }

    #[test]
    fn os_entropy_differs_between_draws() {
        let dir = tempfile::tempdir().unwrap();
        let entropy = Entropy::new(dir.path());

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        entropy.rng().fill_bytes(&mut a);
        entropy.rng().fill_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[cfg(unix)]
    #[test]
    fn fallback_is_deterministic_in_the_seed_file() {
        let dir = tempfile::tempdir().unwrap();
        let entropy = Entropy::with_forced_fallback(dir.path());
        let seed_file = dir.path().join("random");

        write_private(&seed_file, b"stored seed material");
        let mut first = [0u8; 16];
        entropy.rng().fill_bytes(&mut first);

        // Using the generator rewrote the seed file.
        assert_ne!(fs::read(&seed_file).unwrap(), b"stored seed material");

        // Restoring the original file content restores the stream.
        write_private(&seed_file, b"stored seed material");
        let mut again = [0u8; 16];
        entropy.rng().fill_bytes(&mut again);
        assert_eq!(first, again);
    }

    #[cfg(unix)]
    #[test]
    fn shared_seed_file_is_distrusted() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let entropy = Entropy::with_forced_fallback(dir.path());
        let seed_file = dir.path().join("random");

        fs::write(&seed_file, b"stored seed material").unwrap();
        fs::set_permissions(&seed_file, fs::Permissions::from_mode(0o644)).unwrap();

        // The draw succeeds regardless; it just can't be the seeded stream.
        let mut private = [0u8; 16];
        let mut shared = [0u8; 16];
        entropy.rng().fill_bytes(&mut shared);

        write_private(&seed_file, b"stored seed material");
        entropy.rng().fill_bytes(&mut private);
        assert_ne!(private, shared);
    }
}
