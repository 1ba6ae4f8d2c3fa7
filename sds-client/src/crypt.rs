//! crypt(3) with MD5, as used for JANUS login credentials.
//!
//! The server expects passwords pre-hashed with the FreeBSD libcrypt MD5
//! scheme (magic `$1$`, 1000 strengthening rounds, a transposed custom
//! base-64 of the final digest). The salt is fixed protocol-wide.

use md5::{Digest, Md5};

const MAGIC: &str = "$1$";

/// Salt the JANUS server uses for login credentials.
const JANUS_SALT: &str = "o3";

/// Alphabet of the crypt base-64 variant (not RFC 4648).
const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Produces the credential string for a login: the crypt-MD5 hash of the
/// plaintext under the fixed JANUS salt. An empty plaintext bypasses
/// hashing; the server expects it verbatim.
pub fn janus_password(plain: &str) -> String {
    if plain.is_empty() {
        String::new()
    } else {
        crypt_md5(plain, JANUS_SALT)
    }
}

/// Mimics POSIX crypt(3) with MD5 instead of DES, yielding
/// `$1$<salt>$<22-char-hash>`.
pub fn crypt_md5(key: &str, salt: &str) -> String {
    let key = key.as_bytes();
    let salt_bytes = salt.as_bytes();

    let mut ctx = Md5::new();
    ctx.update(key);
    ctx.update(MAGIC);
    ctx.update(salt_bytes);

    let mut ctx1 = Md5::new();
    ctx1.update(key);
    ctx1.update(salt_bytes);
    ctx1.update(key);
    let mut digest = ctx1.finalize();

    let mut remaining = key.len();
    while remaining > 0 {
        let take = remaining.min(digest.len());
        ctx.update(&digest[..take]);
        remaining -= take;
    }

    let mut bits = key.len();
    while bits != 0 {
        if bits & 1 != 0 {
            ctx.update([0u8]);
        } else {
            ctx.update(&key[..1]);
        }
        bits >>= 1;
    }
    digest = ctx.finalize();

    // 1000 strengthening rounds, alternating the inputs
    for round in 0..1000 {
        let mut ctx1 = Md5::new();
        if round & 1 != 0 {
            ctx1.update(key);
        } else {
            ctx1.update(digest);
        }
        if round % 3 != 0 {
            ctx1.update(salt_bytes);
        }
        if round % 7 != 0 {
            ctx1.update(key);
        }
        if round & 1 != 0 {
            ctx1.update(digest);
        } else {
            ctx1.update(key);
        }
        digest = ctx1.finalize();
    }

    let mut hash = String::with_capacity(22);
    let group = |a: usize, b: usize, c: usize| {
        (digest[a] as u32) << 16 | (digest[b] as u32) << 8 | digest[c] as u32
    };
    to64(&mut hash, group(0, 6, 12), 4);
    to64(&mut hash, group(1, 7, 13), 4);
    to64(&mut hash, group(2, 8, 14), 4);
    to64(&mut hash, group(3, 9, 15), 4);
    to64(&mut hash, group(4, 10, 5), 4);
    to64(&mut hash, digest[11] as u32, 2);

    format!("{MAGIC}{salt}${hash}")
}

fn to64(out: &mut String, mut value: u32, chars: usize) {
    for _ in 0..chars {
        out.push(ITOA64[(value & 0x3f) as usize] as char);
        value >>= 6;
    }
}
