/// Lexical context of the byte under the cursor.
#[derive(Clone)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

pub(super) fn starts_with_at(bytes: &[u8], idx: usize, pat: &[u8]) -> bool {
    bytes.get(idx..idx + pat.len()) == Some(pat)
}

/// `$tag$` opener at `start`; returns the tag and the index of the closing `$`.
pub(super) fn dollar_quote_at(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let rest = bytes.get(start + 1..)?;
    let len = rest
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))?;
    if rest[len] != b'$' || rest.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag = std::str::from_utf8(&rest[..len]).ok()?.to_string();
    Some((tag, start + 1 + len))
}

/// Index of the closing `$` when `bytes[idx..]` is `$tag$`.
pub(super) fn closes_dollar_quote(bytes: &[u8], idx: usize, tag: &str) -> Option<usize> {
    let end = idx + 1 + tag.len();
    (bytes.get(idx) == Some(&b'$')
        && starts_with_at(bytes, idx + 1, tag.as_bytes())
        && bytes.get(end) == Some(&b'$'))
    .then_some(end)
}

pub(super) fn scan_digits(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let len = bytes
        .get(start..)?
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if len == 0 {
        return None;
    }
    std::str::from_utf8(&bytes[start..start + len])
        .ok()
        .map(|digits| (start + len, digits))
}
