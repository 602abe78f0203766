//! Apache `$apr1$` MD5-crypt password hashing, as understood by htpasswd
//! consumers such as ingress-nginx basic auth.

const MAGIC: &str = "$apr1$";
const ITERATIONS: usize = 1000;
const MAX_SALT_LEN: usize = 8;

/// Characters allowed in an APR1 salt and used by the digest encoding.
pub const ALPHABET: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Hash `password` with `salt` (truncated to eight characters).
pub fn apr1(password: &str, salt: &str) -> String {
    let pw = password.as_bytes();
    let salt = &salt.as_bytes()[..salt.len().min(MAX_SALT_LEN)];

    let alternate = md5::compute([pw, salt, pw].concat()).0;

    let mut ctx = Vec::with_capacity(pw.len() * 2 + MAGIC.len() + salt.len() + 16);
    ctx.extend_from_slice(pw);
    ctx.extend_from_slice(MAGIC.as_bytes());
    ctx.extend_from_slice(salt);
    for chunk in (0..pw.len()).step_by(16) {
        ctx.extend_from_slice(&alternate[..(pw.len() - chunk).min(16)]);
    }
    let mut i = pw.len();
    while i > 0 {
        if i & 1 == 1 {
            ctx.push(0);
        } else {
            ctx.push(pw[0]);
        }
        i >>= 1;
    }
    let mut digest = md5::compute(&ctx).0;

    for round in 0..ITERATIONS {
        let mut buf = Vec::with_capacity(pw.len() * 2 + salt.len() + 16);
        if round & 1 == 1 {
            buf.extend_from_slice(pw);
        } else {
            buf.extend_from_slice(&digest);
        }
        if round % 3 != 0 {
            buf.extend_from_slice(salt);
        }
        if round % 7 != 0 {
            buf.extend_from_slice(pw);
        }
        if round & 1 == 1 {
            buf.extend_from_slice(&digest);
        } else {
            buf.extend_from_slice(pw);
        }
        digest = md5::compute(&buf).0;
    }

    let mut out = String::with_capacity(MAGIC.len() + salt.len() + 23);
    out.push_str(MAGIC);
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');
    for (a, b, c) in [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)] {
        let v = (u32::from(digest[a]) << 16) | (u32::from(digest[b]) << 8) | u32::from(digest[c]);
        encode64(&mut out, v, 4);
    }
    encode64(&mut out, u32::from(digest[11]), 2);
    out
}

fn encode64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(ALPHABET[(v & 0x3f) as usize] as char);
        v >>= 6;
    }
}
