//! Names of the cluster objects owned by an instance.

const MAX_NAME_LEN: usize = 253;

/// Config object holding `group`; the root group maps to the bare uid.
pub fn object_name(uid: &str, group: &str) -> String {
    if group.is_empty() {
        uid.to_string()
    } else {
        format!("{uid}-{group}")
    }
}

/// True for every object name [`object_name`] can produce for `uid`.
pub fn belongs_to_instance(uid: &str, candidate: &str) -> bool {
    candidate == uid
        || candidate
            .strip_prefix(uid)
            .is_some_and(|rest| rest.starts_with('-'))
}

pub fn auth_secret_name(uid: &str) -> String {
    format!("{uid}-auth")
}

pub fn tls_secret_name(uid: &str) -> String {
    format!("{uid}-tls")
}

/// RFC 1123 subdomain, the naming rule for ConfigMaps and Secrets.
pub fn is_valid_object_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let edge_ok = |b: Option<&u8>| b.is_some_and(|b| b.is_ascii_lowercase() || b.is_ascii_digit());

    name.len() <= MAX_NAME_LEN
        && edge_ok(bytes.first())
        && edge_ok(bytes.last())
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.')
}
