//! Minimal EML header extraction.
//!
//! The rebuild engine only needs a handful of headers (subject, sender,
//! date, message id) from the header block; bodies are never parsed.
//! Used as the fallback when a message has no structured `.json`
//! sibling.

use crate::error::Result;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmlHeaders {
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub message_id: String,
}

/// Parse the header block of an EML file. Folded (continuation) lines
/// are unfolded; parsing stops at the first blank line.
pub fn parse_headers(path: &Path) -> Result<EmlHeaders> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);

    let mut unfolded: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if (line.starts_with(' ') || line.starts_with('\t')) && !unfolded.is_empty() {
            let last = unfolded.last_mut().unwrap();
            last.push(' ');
            last.push_str(line.trim_start());
        } else {
            unfolded.push(line.to_string());
        }
    }

    let mut headers = EmlHeaders::default();
    for line in unfolded {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.to_ascii_lowercase().as_str() {
            "subject" => headers.subject = value,
            "from" => headers.sender = value,
            "date" => headers.date = value,
            "message-id" => headers.message_id = value,
            _ => {}
        }
    }
    Ok(headers)
}

fn stem_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Encoded Graph message ids start with "AAMk".
    RE.get_or_init(|| Regex::new(r"_(AAMk[A-Za-z0-9_-]{10,})$").unwrap())
}

/// Best-effort `(subject_part, message_id_part)` from a filename stem
/// of the form `{safe_subject}_{safe_message_id}`. Falls back to the
/// whole stem for both parts.
pub fn split_stem(stem: &str) -> (String, String) {
    if let Some(caps) = stem_id_regex().captures(stem) {
        let id = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
        let subject = stem[..caps.get(0).map(|m| m.start()).unwrap_or(0)]
            .trim_matches('_')
            .to_string();
        return (subject, id);
    }
    (stem.to_string(), stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_eml(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_basic_headers() {
        let dir = TempDir::new().unwrap();
        let path = write_eml(
            &dir,
            "m.eml",
            "From: Alice <alice@example.com>\r\n\
             Subject: Quarterly report\r\n\
             Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
             Message-ID: <abc@example.com>\r\n\
             \r\n\
             Body text here\r\n",
        );

        let headers = parse_headers(&path).unwrap();
        assert_eq!(headers.subject, "Quarterly report");
        assert_eq!(headers.sender, "Alice <alice@example.com>");
        assert_eq!(headers.date, "Mon, 1 Jan 2024 10:00:00 +0000");
        assert_eq!(headers.message_id, "<abc@example.com>");
    }

    #[test]
    fn test_folded_subject_is_unfolded() {
        let dir = TempDir::new().unwrap();
        let path = write_eml(
            &dir,
            "m.eml",
            "Subject: A very long\n subject line\n\nBody\n",
        );

        let headers = parse_headers(&path).unwrap();
        assert_eq!(headers.subject, "A very long subject line");
    }

    #[test]
    fn test_headers_after_blank_line_ignored() {
        let dir = TempDir::new().unwrap();
        let path = write_eml(&dir, "m.eml", "Subject: Real\n\nFrom: fake@body\n");

        let headers = parse_headers(&path).unwrap();
        assert_eq!(headers.subject, "Real");
        assert_eq!(headers.sender, "");
    }

    #[test]
    fn test_split_stem_with_graph_id() {
        let (subject, id) = split_stem("Team_update_AAMkAGI2TG93AAA12345");
        assert_eq!(subject, "Team_update");
        assert_eq!(id, "AAMkAGI2TG93AAA12345");
    }

    #[test]
    fn test_split_stem_without_graph_id() {
        let (subject, id) = split_stem("random_filename");
        assert_eq!(subject, "random_filename");
        assert_eq!(id, "random_filename");
    }
}
