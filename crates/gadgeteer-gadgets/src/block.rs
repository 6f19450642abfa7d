//! Line-oriented params-body format: `key=value` lines and
//! `key:<<<TAG` heredocs terminated by a line holding only `TAG`.

use gadgeteer_core::ParseError;
use serde_json::{Map, Value};

const HEREDOC_PREFIX: &str = "<<<";

/// Parse a block-format params body into a JSON object.
///
/// Scalar values on `key=value` lines are interpreted as JSON where they
/// parse as a number, boolean, null, or quoted string; anything else stays a
/// raw string. Heredoc values are kept verbatim.
pub fn parse_block_params(body: &str) -> Result<Value, ParseError> {
    let mut params = Map::new();
    let mut lines = body.split_inclusive('\n');
    let mut offset = 0usize;

    while let Some(line) = lines.next() {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.trim().is_empty() {
            continue;
        }

        if let Some((key, tag)) = heredoc_opener(trimmed) {
            let mut content = String::new();
            let mut terminated = false;
            for doc_line in lines.by_ref() {
                offset += doc_line.len();
                let doc_trimmed = doc_line.trim_end_matches(['\n', '\r']);
                if doc_trimmed == tag {
                    terminated = true;
                    break;
                }
                content.push_str(doc_line);
            }
            if !terminated {
                return Err(ParseError::at(
                    format!("heredoc for '{}' missing terminator '{}'", key, tag),
                    line_start,
                ));
            }
            if content.ends_with('\n') {
                content.pop();
                if content.ends_with('\r') {
                    content.pop();
                }
            }
            params.insert(key.to_string(), Value::String(content));
        } else if let Some((key, raw)) = trimmed.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                return Err(ParseError::at("empty parameter name", line_start));
            }
            params.insert(key.to_string(), scalar_value(raw.trim()));
        } else {
            return Err(ParseError::at(
                format!("expected key=value or key:<<<TAG, got '{}'", truncate(trimmed)),
                line_start,
            ));
        }
    }

    Ok(Value::Object(params))
}

/// `key:<<<TAG` — returns (key, tag). The tag names the terminator line.
fn heredoc_opener(line: &str) -> Option<(&str, &str)> {
    let (key, rest) = line.split_once(':')?;
    let tag = rest.trim().strip_prefix(HEREDOC_PREFIX)?;
    let key = key.trim();
    if key.is_empty() || tag.is_empty() || key.contains('=') {
        return None;
    }
    Some((key, tag.trim()))
}

fn scalar_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null | Value::String(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

fn truncate(s: &str) -> String {
    if s.len() > 40 {
        format!("{}…", &s[..40])
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_value_scalars() {
        let params = parse_block_params("msg=hello\ncount=3\nfast=true\n").unwrap();
        assert_eq!(params, json!({"msg": "hello", "count": 3, "fast": true}));
    }

    #[test]
    fn quoted_strings_unquote() {
        let params = parse_block_params("msg=\"two words\"\n").unwrap();
        assert_eq!(params["msg"], json!("two words"));
    }

    #[test]
    fn unparseable_scalar_stays_raw() {
        let params = parse_block_params("path=/tmp/file.txt\n").unwrap();
        assert_eq!(params["path"], json!("/tmp/file.txt"));
    }

    #[test]
    fn heredoc_verbatim() {
        let body = "script:<<<EOF\nline one\nline two=with equals\nEOF\nname=x\n";
        let params = parse_block_params(body).unwrap();
        assert_eq!(params["script"], json!("line one\nline two=with equals"));
        assert_eq!(params["name"], json!("x"));
    }

    #[test]
    fn unterminated_heredoc_positions_error() {
        let body = "intro=hi\nscript:<<<EOF\nno end\n";
        let err = parse_block_params(body).unwrap_err();
        assert!(err.message.contains("missing terminator 'EOF'"));
        assert_eq!(err.position, Some(9));
    }

    #[test]
    fn bare_line_is_an_error() {
        let err = parse_block_params("this is not a parameter\n").unwrap_err();
        assert!(err.message.contains("expected key=value"));
    }

    #[test]
    fn empty_body_is_empty_object() {
        assert_eq!(parse_block_params("").unwrap(), json!({}));
        assert_eq!(parse_block_params("\n  \n").unwrap(), json!({}));
    }
}
