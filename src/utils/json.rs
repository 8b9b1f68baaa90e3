//! Zero-copy scanning of NIP-01 wire frames.
//!
//! Relay frames are small JSON arrays whose first element names the
//! message type. Full serde parsing of every frame is wasteful when most
//! of the time only the head elements are needed, so this extracts up to
//! the first four top-level elements as borrowed slices.
//!
//! Assumes well-formed protocol JSON (no exotic escapes beyond `\"` and
//! `\\` at the top level). String elements keep their enclosing quotes.

/// Extract up to the first four top-level elements of a JSON array.
/// Returns `None` when the input is not an array.
pub fn extract_frame(text: &str) -> Option<[Option<&str>; 4]> {
    let bytes = text.as_bytes();
    if bytes.first()? != &b'[' {
        return None;
    }
    let mut idx = 1;
    let mut results: [Option<&str>; 4] = [None, None, None, None];
    let mut found = 0;

    while found < 4 && idx < bytes.len() {
        // skip whitespace and commas
        while idx < bytes.len()
            && (bytes[idx] == b' '
                || bytes[idx] == b'\n'
                || bytes[idx] == b'\r'
                || bytes[idx] == b'\t'
                || bytes[idx] == b',')
        {
            idx += 1;
        }

        if idx >= bytes.len() || bytes[idx] == b']' {
            break;
        }

        let start = idx;

        if bytes[idx] == b'"' {
            // String element
            idx += 1;
            while idx < bytes.len() {
                match bytes[idx] {
                    b'\\' => idx += 2,
                    b'"' => {
                        results[found] = Some(&text[start..=idx]);
                        idx += 1;
                        break;
                    }
                    _ => idx += 1,
                }
            }
        } else if bytes[idx] == b'{' {
            // Object element: find the matching closing brace, skipping
            // strings so braces inside values don't count.
            let mut brace_count = 1;
            idx += 1;
            while idx < bytes.len() && brace_count > 0 {
                match bytes[idx] {
                    b'{' => brace_count += 1,
                    b'}' => brace_count -= 1,
                    b'"' => {
                        idx += 1;
                        while idx < bytes.len() {
                            if bytes[idx] == b'\\' {
                                idx += 2;
                                continue;
                            }
                            if bytes[idx] == b'"' {
                                break;
                            }
                            idx += 1;
                        }
                    }
                    _ => {}
                }
                idx += 1;
            }
            results[found] = Some(&text[start..idx]);
        } else {
            // Primitive (number, bool, null)
            while idx < bytes.len() && bytes[idx] != b',' && bytes[idx] != b']' {
                idx += 1;
            }
            results[found] = Some(text[start..idx].trim());
        }

        found += 1;
    }

    Some(results)
}

/// Strip the enclosing quotes of a string element returned by
/// [`extract_frame`].
pub fn unquote(element: &str) -> &str {
    element
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frame() {
        let frame = r#"["EVENT","sub-1",{"id":"abc","tags":[["e","x"]],"content":"a \"q\" {b}"}]"#;
        let parts = extract_frame(frame).unwrap();
        assert_eq!(parts[0], Some("\"EVENT\""));
        assert_eq!(parts[1], Some("\"sub-1\""));
        assert_eq!(
            parts[2],
            Some(r#"{"id":"abc","tags":[["e","x"]],"content":"a \"q\" {b}"}"#)
        );
        assert_eq!(parts[3], None);
    }

    #[test]
    fn ok_frame_has_four_elements() {
        let frame = r#"["OK","abcd",true,"duplicate: already have it"]"#;
        let parts = extract_frame(frame).unwrap();
        assert_eq!(unquote(parts[0].unwrap()), "OK");
        assert_eq!(unquote(parts[1].unwrap()), "abcd");
        assert_eq!(parts[2], Some("true"));
        assert_eq!(unquote(parts[3].unwrap()), "duplicate: already have it");
    }

    #[test]
    fn eose_frame() {
        let parts = extract_frame(r#"["EOSE","sub-1"]"#).unwrap();
        assert_eq!(unquote(parts[0].unwrap()), "EOSE");
        assert_eq!(unquote(parts[1].unwrap()), "sub-1");
        assert_eq!(parts[2], None);
    }

    #[test]
    fn not_an_array() {
        assert!(extract_frame(r#"{"not":"array"}"#).is_none());
        assert!(extract_frame("").is_none());
    }

    #[test]
    fn whitespace_is_tolerated() {
        let parts = extract_frame("[ \"NOTICE\" ,\n \"slow down\" ]").unwrap();
        assert_eq!(unquote(parts[0].unwrap()), "NOTICE");
        assert_eq!(unquote(parts[1].unwrap()), "slow down");
    }

    #[test]
    fn nested_braces_in_object() {
        let frame = r#"["COUNT","s",{"count":42}]"#;
        let parts = extract_frame(frame).unwrap();
        assert_eq!(parts[2], Some(r#"{"count":42}"#));
    }
}
