//! Line-based N-Triples reader.
//!
//! Handles the subset the index builder needs: one triple per line, IRIs in
//! angle brackets, literals with optional datatype, `#` comments. This is
//! an input collaborator of the engine, not part of it; anything the reader
//! cannot interpret is reported with its line number.

/// Parse N-Triples text into surface-form triples.
pub fn parse(text: &str) -> Result<Vec<(String, String, String)>, String> {
    let mut triples = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let triple =
            parse_line(line).map_err(|e| format!("line {}: {e}", line_no + 1))?;
        triples.push(triple);
    }
    Ok(triples)
}

fn parse_line(line: &str) -> Result<(String, String, String), String> {
    let mut rest = line;
    let subject = take_term(&mut rest)?;
    let predicate = take_term(&mut rest)?;
    let object = take_term(&mut rest)?;
    let rest = rest.trim();
    if rest != "." && !rest.is_empty() {
        return Err(format!("trailing content {rest:?}"));
    }
    Ok((subject, predicate, object))
}

fn take_term(rest: &mut &str) -> Result<String, String> {
    let s = rest.trim_start();
    if s.is_empty() {
        return Err("unexpected end of line".into());
    }
    let (term, remainder) = match s.as_bytes()[0] {
        b'<' => {
            let end = s.find('>').ok_or("unterminated IRI")?;
            (s[..=end].to_owned(), &s[end + 1..])
        }
        b'"' => {
            let mut end = 1;
            let bytes = s.as_bytes();
            while end < bytes.len() && bytes[end] != b'"' {
                if bytes[end] == b'\\' {
                    end += 1;
                }
                end += 1;
            }
            if end >= bytes.len() {
                return Err("unterminated literal".into());
            }
            let mut term_end = end + 1;
            // Datatype or language tag.
            if s[term_end..].starts_with("^^<") {
                let close = s[term_end..]
                    .find('>')
                    .ok_or("unterminated datatype IRI")?;
                term_end += close + 1;
            } else if s[term_end..].starts_with('@') {
                let tag_len = s[term_end + 1..]
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
                    .unwrap_or(s.len() - term_end - 1);
                term_end += 1 + tag_len;
            }
            (s[..term_end].to_owned(), &s[term_end..])
        }
        b'_' => {
            let end = s
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(s.len());
            (s[..end].to_owned(), &s[end..])
        }
        _ => return Err(format!("unexpected term start in {s:?}")),
    };
    *rest = remainder;
    Ok(term)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_triples() {
        let text = "<a> <p> <b> .\n# comment\n<a> <p> \"hello world\" .\n";
        let triples = parse(text).unwrap();
        assert_eq!(triples.len(), 2);
        assert_eq!(triples[0], ("<a>".into(), "<p>".into(), "<b>".into()));
        assert_eq!(triples[1].2, "\"hello world\"");
    }

    #[test]
    fn test_typed_and_tagged_literals() {
        let text = concat!(
            "<a> <p> \"42\"^^<http://www.w3.org/2001/XMLSchema#integer> .\n",
            "<a> <p> \"hi\"@en .\n",
        );
        let triples = parse(text).unwrap();
        assert!(triples[0].2.ends_with("integer>"));
        assert_eq!(triples[1].2, "\"hi\"@en");
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse("<a> <p> .\n").unwrap_err();
        assert!(err.starts_with("line 1:"), "{err}");
    }
}
