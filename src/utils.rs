//! URL and pattern tokenization.
//!
//! A token is either a maximal run of "address characters" (the characters
//! that may appear inside a hostname or path segment: letters, digits,
//! `_`, `-`, `.`, `%`) or a single separator character. The same splitter
//! is applied to URLs at query time and to filter patterns at compile time
//! so that exact-match trie edges line up.

pub const TOKENS_BUFFER_SIZE: usize = 128;

#[inline]
pub fn is_address_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '%'
}

#[inline]
pub fn is_separator_char(c: char) -> bool {
    !is_address_char(c)
}

/// True for tokens produced by [`tokenize`] that the `^` separator slot
/// consumes: a single non-address character.
#[inline]
pub fn is_separator_token(token: &str) -> bool {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => is_separator_char(c),
        _ => false,
    }
}

/// Splits `input` into address-character runs and single separator
/// characters, preserving input order and byte content.
pub fn tokenize(input: &str) -> Vec<&str> {
    let mut tokens = Vec::with_capacity(TOKENS_BUFFER_SIZE.min(input.len()));
    tokenize_into(input, &mut tokens);
    tokens
}

pub fn tokenize_into<'a>(input: &'a str, tokens: &mut Vec<&'a str>) {
    let mut run_start: Option<usize> = None;

    for (i, c) in input.char_indices() {
        if is_address_char(c) {
            if run_start.is_none() {
                run_start = Some(i);
            }
        } else {
            if let Some(start) = run_start.take() {
                tokens.push(&input[start..i]);
            }
            tokens.push(&input[i..i + c.len_utf8()]);
        }
    }

    if let Some(start) = run_start {
        tokens.push(&input[start..]);
    }
}

/// ASCII-lowercases `s`.
pub fn fold_case(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Positions in `host` where a domain-anchored pattern may start matching:
/// offset 0 and the offset following every `.`.
pub fn host_label_offsets(host: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (i, b) in host.bytes().enumerate() {
        if b == b'.' && i + 1 < host.len() {
            offsets.push(i + 1);
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(input: &str) -> Vec<&str> {
        tokenize(input)
    }

    #[test]
    fn tokenize_works() {
        assert_eq!(t(""), Vec::<&str>::new());
        assert_eq!(t("foo"), vec!["foo"]);
        assert_eq!(t("foo/bar"), vec!["foo", "/", "bar"]);
        assert_eq!(t("x.js"), vec!["x.js"]);
        assert_eq!(
            t("https://ads.example.com/x.js"),
            vec!["https", ":", "/", "/", "ads.example.com", "/", "x.js"]
        );
        assert_eq!(t("a=1&b=2"), vec!["a", "=", "1", "&", "b", "=", "2"]);
        assert_eq!(t("//"), vec!["/", "/"]);
    }

    #[test]
    fn separator_tokens() {
        assert!(is_separator_token("/"));
        assert!(is_separator_token("?"));
        assert!(!is_separator_token("."));
        assert!(!is_separator_token("%"));
        assert!(!is_separator_token("ab"));
        assert!(!is_separator_token(""));
    }

    #[test]
    fn label_offsets() {
        assert_eq!(host_label_offsets("example.com"), vec![0, 8]);
        assert_eq!(host_label_offsets("a.b.c"), vec![0, 2, 4]);
        assert_eq!(host_label_offsets("localhost"), vec![0]);
    }
}
