//! URL canonicalization and permutation hashing.
//!
//! The Safe Browsing lists store hashes of *canonicalized* URLs, and a
//! single URL has to be checked under every host-suffix/path-prefix
//! combination the protocol considers equivalent to it.  This module
//! implements both steps: [`canonicalize`] normalizes a raw URL to the
//! exact byte sequence the protocol hashes, and [`url_hashes`] expands it
//! into the full set of candidate SHA-256 digests.
//!
//! Everything here operates on bytes rather than `str`: URLs on the wire
//! are byte strings, and percent-encoded octets are frequently not valid
//! UTF-8.  Canonicalization is total; inputs that fail to parse keep
//! their original pieces rather than producing an error.

use sha2::{Digest, Sha256};

/// A full 32-byte SHA-256 digest of a canonical URL permutation.
pub type UrlHash = [u8; 32];

/// Bytes that survive percent-encoding unchanged.
///
/// This is the printable ASCII range with `%` and `#` excluded: `%` so
/// that our own escapes stay unambiguous, `#` because a literal hash
/// would re-introduce a fragment.
fn is_safe_byte(b: u8) -> bool {
    (0x21..=0x7e).contains(&b) && b != b'%' && b != b'#'
}

/// Decode `%XX` escapes once, leaving malformed escapes untouched.
fn unescape_once(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' {
            // Candidate escape: need two hex digits after the '%'.
            if let (Some(hi), Some(lo)) = (
                input.get(i + 1).and_then(|c| (*c as char).to_digit(16)),
                input.get(i + 2).and_then(|c| (*c as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

/// Percent-unescape to a fixed point.
///
/// Attackers stack escapes (`%2525` -> `%25` -> `%`); we keep decoding
/// until the buffer stops changing.
fn full_unescape(input: &[u8]) -> Vec<u8> {
    let mut cur = input.to_vec();
    loop {
        let next = unescape_once(&cur);
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

/// Percent-encode every byte outside the safe set, with uppercase hex.
fn escape(input: &[u8]) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input {
        if is_safe_byte(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Find `needle` within `haystack`.
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Return true if `url` starts with a `scheme://` prefix.
fn has_scheme(url: &[u8]) -> bool {
    match find_subslice(url, b"://") {
        Some(pos) if pos > 0 => {
            url[0].is_ascii_alphabetic()
                && url[..pos]
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'-' | b'.'))
        }
        _ => false,
    }
}

/// Split a (fully escaped, hence ASCII) URL into scheme and remainder.
fn split_scheme(url: &str) -> Option<(&str, &str)> {
    if !has_scheme(url.as_bytes()) {
        return None;
    }
    url.split_once("://")
}

/// Split the part after `scheme://` into authority and path-plus-query.
///
/// The authority runs up to the first `/` or `?`; the rest (including
/// that delimiter, for `/`) is the path and query.
fn split_authority(rest: &str) -> (&str, &str) {
    match rest.find(['/', '?']) {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    }
}

/// Split an authority into host and optional port, dropping userinfo.
///
/// A trailing all-digit component after the last `:` is the port;
/// anything else stays part of the host.
fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    let host_port = match authority.rfind('@') {
        Some(i) => &authority[i + 1..],
        None => authority,
    };
    match host_port.rfind(':') {
        Some(i) if host_port[i + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            let port = &host_port[i + 1..];
            (&host_port[..i], (!port.is_empty()).then_some(port))
        }
        _ => (host_port, None),
    }
}

/// Render a 32-bit integer as a dotted IPv4 quad.
fn dotted_quad(ip: u32) -> String {
    let [a, b, c, d] = ip.to_be_bytes();
    format!("{}.{}.{}.{}", a, b, c, d)
}

/// Normalize and re-escape a host component.
fn canonicalize_host(host: &str) -> String {
    let unescaped = full_unescape(host.as_bytes());

    // Strip surrounding dots, collapse runs of dots, lowercase.
    let mut h: Vec<u8> = Vec::with_capacity(unescaped.len());
    for &b in &unescaped {
        if b == b'.' && (h.is_empty() || h.last() == Some(&b'.')) {
            continue;
        }
        h.push(b.to_ascii_lowercase());
    }
    if h.last() == Some(&b'.') {
        h.pop();
    }

    // Integer hosts render as dotted IPv4 when they fit in 32 bits;
    // otherwise the original spelling stays.
    if !h.is_empty() && h.iter().all(u8::is_ascii_digit) {
        if let Ok(ip) = String::from_utf8_lossy(&h).parse::<u32>() {
            return dotted_quad(ip);
        }
    } else if h.starts_with(b"0x") && !h.contains(&b'.') {
        if let Ok(ip) = u32::from_str_radix(&String::from_utf8_lossy(&h[2..]), 16) {
            return dotted_quad(ip);
        }
    }

    escape(&h)
}

/// Normalize and re-escape a path component.
///
/// Resolves `.` and `..` with POSIX semantics, collapses duplicate
/// slashes, and preserves a single trailing slash if the input had one.
fn canonicalize_path(path: &str) -> String {
    let unescaped = full_unescape(path.as_bytes());
    if unescaped.is_empty() {
        return "/".to_owned();
    }
    let had_trailing_slash = unescaped.last() == Some(&b'/');

    let mut segments: Vec<&[u8]> = Vec::new();
    for seg in unescaped.split(|&b| b == b'/') {
        match seg {
            b"" | b"." => {}
            b".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut normalized: Vec<u8> = Vec::with_capacity(unescaped.len());
    for seg in &segments {
        normalized.push(b'/');
        normalized.extend_from_slice(seg);
    }
    if normalized.is_empty() {
        normalized.push(b'/');
    } else if had_trailing_slash {
        normalized.push(b'/');
    }

    escape(&normalized)
}

/// Canonicalize a raw URL to the exact form Safe Browsing hashes.
///
/// The input may contain arbitrary bytes.  The output is always ASCII.
pub fn canonicalize(url: &[u8]) -> String {
    // Whitespace: trim the ends, and delete tab/CR/LF anywhere.
    let mut bytes: Vec<u8> = url
        .trim_ascii()
        .iter()
        .copied()
        .filter(|&b| !matches!(b, b'\t' | b'\r' | b'\n'))
        .collect();

    // Fragments never participate in matching.
    if let Some(pos) = bytes.iter().position(|&b| b == b'#') {
        bytes.truncate(pos);
    }

    if bytes.starts_with(b"//") {
        bytes.splice(0..0, b"http:".iter().copied());
    } else if !has_scheme(&bytes) {
        bytes.splice(0..0, b"http://".iter().copied());
    }

    // Decode stacked escapes, then re-encode with the canonical safe set.
    // From here on the URL is pure ASCII.
    let mut quoted = escape(&full_unescape(&bytes));
    let has_query = quoted.contains('?');

    let (scheme, rest) = match split_scheme(&quoted) {
        Some(parts) => parts,
        None => {
            quoted.insert_str(0, "http://");
            ("http", &quoted[7..])
        }
    };

    let (authority, path_and_query) = split_authority(rest);
    let (raw_path, raw_query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path_and_query, ""),
    };
    let (host, port) = split_host_port(authority);

    let mut out = String::with_capacity(quoted.len());
    out.push_str(&scheme.to_ascii_lowercase());
    out.push_str("://");
    out.push_str(&canonicalize_host(host));
    if let Some(port) = port {
        out.push(':');
        out.push_str(port);
    }
    out.push_str(&canonicalize_path(raw_path));
    if has_query {
        out.push('?');
        out.push_str(raw_query);
    }
    out
}

/// Return true if `host` begins with four dot-separated runs of digits.
///
/// Matches the protocol's (prefix-anchored) IPv4 test: such hosts get no
/// suffix expansion.
fn looks_like_ipv4(host: &str) -> bool {
    let mut rest = host;
    for i in 0..4 {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        if i < 3 {
            match rest.strip_prefix('.') {
                Some(r) => rest = r,
                None => return false,
            }
        }
    }
    true
}

/// Enumerate the host suffixes the protocol matches against.
///
/// Up to five entries: the full host, then progressively fewer trailing
/// components down to two.  IPv4 hosts yield only themselves.
fn host_suffixes(host: &str) -> Vec<String> {
    if looks_like_ipv4(host) {
        return vec![host.to_owned()];
    }
    let parts: Vec<&str> = host.split('.').collect();
    let l = parts.len().min(5);
    let mut out = Vec::with_capacity(l);
    if l > 4 {
        out.push(host.to_owned());
    }
    for i in 0..l.saturating_sub(1) {
        out.push(parts[parts.len() - (l - i)..].join("."));
    }
    out
}

/// Enumerate the path prefixes the protocol matches against.
///
/// The full path-plus-query first, then (if a query exists) the bare
/// path, then cumulative directory prefixes for up to four components.
fn path_prefixes(path: &str) -> Vec<String> {
    let mut out = vec![path.to_owned()];
    let bare = match path.split_once('?') {
        Some((p, _)) => {
            out.push(p.to_owned());
            p
        }
        None => path,
    };
    let components: Vec<&str> = bare.split('/').collect();
    let mut cur = String::new();
    for component in components[..components.len() - 1].iter().take(4) {
        cur.push_str(component);
        cur.push('/');
        out.push(cur.clone());
    }
    out
}

/// Expand a canonical URL into every host-suffix + path-prefix string
/// the protocol considers equivalent to it, in match order, deduplicated.
///
/// These are the strings that get hashed; note they carry neither scheme
/// nor port.
pub fn permutations(canonical: &str) -> Vec<String> {
    let rest = canonical
        .split_once("://")
        .map_or(canonical, |(_, rest)| rest);
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let (host, _port) = split_host_port(authority);

    let mut seen: Vec<String> = Vec::new();
    for h in host_suffixes(host) {
        for p in path_prefixes(path) {
            let candidate = format!("{}{}", h, p);
            if !seen.contains(&candidate) {
                seen.push(candidate);
            }
        }
    }
    seen
}

/// Canonicalize a URL and return the SHA-256 digest of every permutation.
///
/// The result is the full candidate key set for a threat-list lookup.
pub fn url_hashes(url: &[u8]) -> Vec<UrlHash> {
    permutations(&canonicalize(url))
        .iter()
        .map(|p| Sha256::digest(p.as_bytes()).into())
        .collect()
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    /// Shorthand: canonicalize a textual URL.
    fn canon(url: &str) -> String {
        canonicalize(url.as_bytes())
    }

    #[test]
    fn canonical_forms() {
        let cases: &[(&str, &str)] = &[
            ("http://host/%25%32%35", "http://host/%25"),
            ("http://host/%25%32%35%25%32%35", "http://host/%25%25"),
            ("http://host/%2525252525252525", "http://host/%25"),
            ("http://host/asdf%25%32%35asd", "http://host/asdf%25asd"),
            ("http://host/%%%25%32%35asd%%", "http://host/%25%25%25asd%25%25"),
            ("http://www.google.com/", "http://www.google.com/"),
            (
                "http://%31%36%38%2e%31%38%38%2e%39%39%2e%32%36/%2E%73%65%63%75%72%65/%77%77%77%2E%65%62%61%79%2E%63%6F%6D/",
                "http://168.188.99.26/.secure/www.ebay.com/",
            ),
            (
                "http://195.127.0.11/uploads/%20%20%20%20/.verify/.eBaysecure=updateuserdataxplimnbqmn-xplmvalidateinfoswqpcmlx=hgplmcx/",
                "http://195.127.0.11/uploads/%20%20%20%20/.verify/.eBaysecure=updateuserdataxplimnbqmn-xplmvalidateinfoswqpcmlx=hgplmcx/",
            ),
            (
                "http://host%23.com/%257Ea%2521b%2540c%2523d%2524e%25f%255E00%252611%252A22%252833%252944_55%252B",
                "http://host%23.com/~a!b@c%23d$e%25f^00&11*22(33)44_55+",
            ),
            ("http://3279880203/blah", "http://195.127.0.11/blah"),
            ("http://0xc37f000b/blah", "http://195.127.0.11/blah"),
            ("http://www.google.com/blah/..", "http://www.google.com/"),
            ("www.google.com/", "http://www.google.com/"),
            ("www.google.com", "http://www.google.com/"),
            ("http://www.evil.com/blah#frag", "http://www.evil.com/blah"),
            ("http://www.GOOgle.com/", "http://www.google.com/"),
            ("google.com", "http://google.com/"),
            ("google.com:443/abc", "http://google.com:443/abc"),
            ("//google.com:443/abc", "http://google.com:443/abc"),
            ("ftp://google.com:443/abc", "ftp://google.com:443/abc"),
            ("http://www.google.com.../", "http://www.google.com/"),
            (
                "http://www.google.com/foo\tbar\rbaz\n2",
                "http://www.google.com/foobarbaz2",
            ),
            ("http://www.google.com/q?", "http://www.google.com/q?"),
            ("http://www.google.com/q?r?", "http://www.google.com/q?r?"),
            ("http://www.google.com/q?r?s", "http://www.google.com/q?r?s"),
            ("http://evil.com/foo#bar#baz", "http://evil.com/foo"),
            ("http://evil.com/foo;", "http://evil.com/foo;"),
            ("http://evil.com/foo?bar;", "http://evil.com/foo?bar;"),
            ("http://notrailingslash.com", "http://notrailingslash.com/"),
            ("http://www.gotaport.com:1234/", "http://www.gotaport.com:1234/"),
            ("  http://www.google.com/  ", "http://www.google.com/"),
            ("http:// leadingspace.com/", "http://%20leadingspace.com/"),
            ("http://%20leadingspace.com/", "http://%20leadingspace.com/"),
            ("%20leadingspace.com/", "http://%20leadingspace.com/"),
            ("https://www.securesite.com/", "https://www.securesite.com/"),
            ("http://host.com/ab%23cd", "http://host.com/ab%23cd"),
            (
                "http://host.com//twoslashes?more//slashes",
                "http://host.com/twoslashes?more//slashes",
            ),
            (
                "http://www.wtp101.com/bk?redir=http%3A%2F%2Ftags.bluekai.com%2Fsite%2F2750%3Fid%3D%3CPARTNER_UUID%3E%0D%0A%26redir%3Dhttp%3A%2F%2Fwww.wtp101.com%2Fpush%2Fbluekai%3Fxid%3D%24BK_UUID",
                "http://www.wtp101.com/bk?redir=http://tags.bluekai.com/site/2750?id=<PARTNER_UUID>%0D%0A&redir=http://www.wtp101.com/push/bluekai?xid=$BK_UUID",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(&canon(input), expected, "input: {:?}", input);
        }
    }

    #[test]
    fn canonical_forms_non_utf8() {
        assert_eq!(
            canonicalize(b"http://\x01\x80.com/"),
            "http://%01%80.com/"
        );
        assert_eq!(
            canonicalize(b"http://\x01\xf0.com/"),
            "http://%01%F0.com/"
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let inputs = [
            "http://host/%2525252525252525",
            "http://3279880203/blah",
            "http://www.google.com/blah/..",
            "http://host.com//twoslashes?more//slashes",
            "http://host%23.com/%257Ea%2521b%2540c",
            "  http://www.google.com/  ",
        ];
        for input in inputs {
            let once = canon(input);
            assert_eq!(canonicalize(once.as_bytes()), once, "input: {:?}", input);
        }
    }

    #[test]
    fn permutation_order() {
        assert_eq!(
            permutations("http://a.b.c/1/2.html?param=1"),
            vec![
                "a.b.c/1/2.html?param=1",
                "a.b.c/1/2.html",
                "a.b.c/",
                "a.b.c/1/",
                "b.c/1/2.html?param=1",
                "b.c/1/2.html",
                "b.c/",
                "b.c/1/",
            ]
        );
    }

    #[test]
    fn permutations_long_host_and_path() {
        assert_eq!(
            permutations("http://a.b.c.d.e.f.g/1.html"),
            vec![
                "a.b.c.d.e.f.g/1.html",
                "a.b.c.d.e.f.g/",
                "c.d.e.f.g/1.html",
                "c.d.e.f.g/",
                "d.e.f.g/1.html",
                "d.e.f.g/",
                "e.f.g/1.html",
                "e.f.g/",
                "f.g/1.html",
                "f.g/",
            ]
        );
    }

    #[test]
    fn permutations_ip_host() {
        assert_eq!(
            permutations("http://1.2.3.4/1/"),
            vec!["1.2.3.4/1/", "1.2.3.4/"]
        );
    }

    #[test]
    fn permutations_strip_port() {
        assert_eq!(
            permutations("http://b.c:8080/x"),
            vec!["b.c/x", "b.c/"]
        );
    }

    #[test]
    fn hashes_match_permutations() {
        let hashes = url_hashes(b"http://a.b.c/1/2.html?param=1");
        assert_eq!(hashes.len(), 8);
        // First permutation, hashed by hand.
        let expected: UrlHash = Sha256::digest(b"a.b.c/1/2.html?param=1").into();
        assert_eq!(hashes[0], expected);
    }

    #[test]
    fn unescape_handles_malformed_escapes() {
        assert_eq!(full_unescape(b"%"), b"%");
        assert_eq!(full_unescape(b"%2"), b"%2");
        assert_eq!(full_unescape(b"%zz"), b"%zz");
        assert_eq!(full_unescape(b"%25"), b"%");
    }
}
