//! Lexical helpers for the static extractors. These understand just enough
//! of JS/TS/Python call syntax to walk argument lists and method chains:
//! string literals, balanced brackets, top-level commas.

/// 1-based line number of byte `offset` in `content`.
pub fn line_of(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())].matches('\n').count() + 1
}

/// Offset of the bracket closing the one at `open`, skipping string
/// literals. `None` when unbalanced.
pub fn matching_close(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let (opener, closer) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else if c == b'\'' || c == b'"' || c == b'`' {
            quote = Some(c);
        } else if c == opener {
            depth += 1;
        } else if c == closer {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Split an argument list on commas outside brackets and strings.
pub fn split_args(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                b'\'' | b'"' | b'`' => quote = Some(c),
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                b',' if depth == 0 => {
                    items.push(s[start..i].trim());
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        items.push(last);
    }
    items
}

/// Value of a plain string literal. Template literals with substitutions
/// and Python f-strings are not plain.
pub fn string_literal(s: &str) -> Option<String> {
    let s = s.trim();
    let (s, formatted) = match s.as_bytes().first() {
        Some(b'f' | b'F') => (&s[1..], true),
        Some(b'r' | b'R' | b'b' | b'B' | b'u' | b'U') => (&s[1..], false),
        _ => (s, false),
    };
    let q = *s.as_bytes().first()?;
    if !matches!(q, b'\'' | b'"' | b'`') || s.len() < 2 || s.as_bytes()[s.len() - 1] != q {
        return None;
    }
    let inner = &s[1..s.len() - 1];
    if inner.contains(q as char) && !inner.contains('\\') {
        return None;
    }
    if (q == b'`' && inner.contains("${")) || (formatted && inner.contains('{')) {
        return None;
    }
    Some(inner.to_string())
}

/// Like `string_literal`, but keeps template literals and f-strings with
/// their substitutions in place.
pub fn template_literal(s: &str) -> Option<String> {
    let s = s.trim();
    let s = match s.as_bytes().first() {
        Some(b'f' | b'F' | b'r' | b'R') => &s[1..],
        _ => s,
    };
    let q = *s.as_bytes().first()?;
    if !matches!(q, b'\'' | b'"' | b'`') || s.len() < 2 || s.as_bytes()[s.len() - 1] != q {
        return None;
    }
    Some(s[1..s.len() - 1].to_string())
}

/// `name=value` keyword argument (Python style). `==` is not a keyword.
pub fn keyword_arg(item: &str) -> Option<(&str, &str)> {
    let (name, value) = item.split_once('=')?;
    let name = name.trim();
    if value.starts_with('=') || !is_identifier(name) {
        return None;
    }
    Some((name, value.trim()))
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Keys of an object/dict literal (first `{...}` in `s`). Spreads are
/// skipped; shorthand properties count.
pub fn object_keys(s: &str) -> Vec<String> {
    let Some(open) = s.find('{') else {
        return Vec::new();
    };
    let Some(close) = matching_close(s, open) else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    for item in split_args(&s[open + 1..close]) {
        if item.starts_with("...") || item.starts_with("**") {
            continue;
        }
        if let Some(q @ (b'\'' | b'"')) = item.as_bytes().first().copied() {
            if let Some(end) = item[1..].find(q as char) {
                keys.push(item[1..1 + end].to_string());
            }
            continue;
        }
        let key = match item.find(':') {
            Some(i) => item[..i].trim(),
            None => item,
        };
        if is_identifier(key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// One `.method(args)` link in a call chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCall<'a> {
    pub method: &'a str,
    pub args: &'a str,
}

/// Method calls chained after byte `pos` (just past a closing paren).
/// Tolerates line breaks, Python line continuations, and optional chaining.
pub fn chained_calls(s: &str, mut pos: usize) -> Vec<ChainCall<'_>> {
    let bytes = s.as_bytes();
    let mut calls = Vec::new();
    loop {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b'\\') {
            pos += 1;
        }
        if bytes.get(pos) == Some(&b'?') && bytes.get(pos + 1) == Some(&b'.') {
            pos += 1;
        }
        if bytes.get(pos) != Some(&b'.') {
            break;
        }
        pos += 1;
        let name_start = pos;
        while pos < bytes.len() && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_') {
            pos += 1;
        }
        let method = &s[name_start..pos];
        while pos < bytes.len() && bytes[pos] == b' ' {
            pos += 1;
        }
        if method.is_empty() || bytes.get(pos) != Some(&b'(') {
            break;
        }
        let Some(close) = matching_close(s, pos) else {
            break;
        };
        calls.push(ChainCall {
            method,
            args: &s[pos + 1..close],
        });
        pos = close + 1;
    }
    calls
}
