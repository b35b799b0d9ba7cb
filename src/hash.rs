//! Path hashing and canonicalisation.
//!
//! Every resource is addressed by the 64-bit hash of its canonical path. The same
//! hash is used as the url hash of manifest entries, so a path resolves to the same
//! key in the factory cache and in the manifest.

const M: u64 = 0xc6a4a7935bd1e995;
const R: u32 = 47;

/// Implements the MurmurHash64A hash function for a byte buffer, seed 0.
pub fn murmur64a<T: AsRef<[u8]>>(data: T) -> u64 {
    let data = data.as_ref();
    let mut hash: u64 = (data.len() as u64).wrapping_mul(M);

    let mut blocks = data.chunks_exact(8);
    for block in &mut blocks {
        let mut k = u64::from_le_bytes([
            block[0], block[1], block[2], block[3], block[4], block[5], block[6], block[7],
        ]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        hash ^= k;
        hash = hash.wrapping_mul(M);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate() {
            hash ^= (*byte as u64) << (8 * i);
        }
        hash = hash.wrapping_mul(M);
    }

    hash ^= hash >> R;
    hash = hash.wrapping_mul(M);
    hash ^= hash >> R;

    hash
}

/// Hash a resource path. The path is expected to be canonical already.
pub fn hash_path<T: AsRef<str>>(path: T) -> u64 {
    murmur64a(path.as_ref().as_bytes())
}

/// Collapse runs of `/` into a single separator.
pub fn canonical_path<T: AsRef<str>>(path: T) -> String {
    let path = path.as_ref();
    let mut out = String::with_capacity(path.len());
    let mut last_was_sep = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_sep {
                out.push(c);
            }
            last_was_sep = true;
        } else {
            out.push(c);
            last_was_sep = false;
        }
    }
    out
}

/// Join a backend base path with a resource name and canonicalise the result.
pub fn canonical_path_from_base(base: &str, name: &str) -> String {
    if base.is_empty() {
        canonical_path(name)
    } else {
        canonical_path(format!("{base}/{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur64a_known_values() {
        assert_eq!(murmur64a(""), 0);
        assert_eq!(murmur64a("a"), 0x071717d2d36b6b11);
        assert_eq!(hash_path("/foo/bar.script"), 0x903a650562dfe13b);
        assert_eq!(hash_path("/main/main.collectionc"), 0xdf9b64ae7e26270b);
    }

    #[test]
    fn test_canonical_path() {
        assert_eq!(canonical_path("//foo///bar.txt"), "/foo/bar.txt");
        assert_eq!(canonical_path("/foo/bar.txt"), "/foo/bar.txt");
        assert_eq!(canonical_path_from_base("build/default/", "/a//b.c"), "build/default/a/b.c");
        assert_eq!(canonical_path_from_base("", "/a.b"), "/a.b");
    }
}
