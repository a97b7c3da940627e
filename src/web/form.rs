//! `application/x-www-form-urlencoded` field lookup.
//!
//! Used for both POST bodies and query strings.  Keys match exactly, so
//! `ssid` never matches inside `my_ssid`.

/// Decode `+` and `%XX` escapes.  Malformed escapes are kept literally.
pub fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                    (Some(h), Some(l)) => {
                        out.push((h << 4) | l);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Value of the first `key=value` pair whose key is exactly `key`.
///
/// A key present without `=` yields an empty value.
pub fn field(encoded: &str, key: &str) -> Option<String> {
    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(k, _)| percent_decode(k) == key)
        .map(|(_, v)| percent_decode(v))
}

/// Percent-encode `s` for use inside a query string.
pub fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_match() {
        let body = "my_ssid=wrong&ssid=right";
        assert_eq!(field(body, "ssid").as_deref(), Some("right"));
        assert_eq!(field(body, "sid"), None);
    }

    #[test]
    fn decodes_escapes() {
        assert_eq!(
            field("password=p%40ss+word%21", "password").as_deref(),
            Some("p@ss word!")
        );
    }

    #[test]
    fn malformed_escape_kept() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("%4"), "%4");
    }

    #[test]
    fn empty_and_valueless_fields() {
        assert_eq!(field("ssid=&x=1", "ssid").as_deref(), Some(""));
        assert_eq!(field("flag&x=1", "flag").as_deref(), Some(""));
        assert_eq!(field("", "ssid"), None);
    }

    #[test]
    fn encode_round_trips() {
        let name = "a b&c.JPG";
        let q = format!("file={}", percent_encode(name));
        assert_eq!(field(&q, "file").as_deref(), Some(name));
    }
}
