use crate::email::Email;
use anyhow::{anyhow, bail};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ANGLE_ADDR: Regex = Regex::new(r"<\s*([^<>\s]+@[^<>\s]+)\s*>").unwrap();
    static ref BARE_ADDR: Regex = Regex::new(r"^[^\s<>@,;:]+@[^\s<>@,;:]+$").unwrap();
}

/// Header names the rules look up, stored under this spelling whatever case
/// the message used.
const CANONICAL_HEADERS: &[&str] = &[
    "From",
    "Reply-To",
    "Return-Path",
    "Received",
    "DKIM-Signature",
    "Message-ID",
    "Subject",
];

fn canonical_name(name: &str) -> String {
    CANONICAL_HEADERS
        .iter()
        .find(|known| known.eq_ignore_ascii_case(name))
        .map(|known| known.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Parse a raw RFC 5322 message into an [`Email`].
///
/// Folded header lines are joined with a single space and every header
/// occurrence is kept in order.
pub fn parse_email(raw: &str) -> anyhow::Result<Email> {
    if raw.trim().is_empty() {
        bail!("empty email data");
    }

    let mut email = Email::new();
    let mut current: Option<(String, String)> = None;
    let mut in_headers = true;
    let mut body = String::new();

    for line in raw.lines() {
        if !in_headers {
            body.push_str(line);
            body.push('\n');
            continue;
        }

        if line.trim().is_empty() {
            in_headers = false;
            continue;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                None => bail!("message starts with a continuation line"),
            }
            continue;
        }

        // mbox envelope line
        if current.is_none() && email.headers.is_empty() && line.starts_with("From ") {
            continue;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("malformed header line: {line}"))?;
        if let Some((name, value)) = current.take() {
            email.add_header(&name, &value);
        }
        current = Some((canonical_name(name.trim()), value.trim().to_string()));
    }

    if let Some((name, value)) = current.take() {
        email.add_header(&name, &value);
    }
    if email.headers.is_empty() {
        bail!("message has no headers");
    }

    email.from = email.header_value("From").and_then(parse_address);
    email.reply_to = email.header_value("Reply-To").and_then(parse_address);
    email.return_path = email
        .header_value("Return-Path")
        .map(|path| path.trim().trim_start_matches('<').trim_end_matches('>').to_string());
    email.message_id = email.header_value("Message-ID").unwrap_or_default().to_string();
    email.subject = email.header_value("Subject").unwrap_or_default().to_string();
    email.body = body;

    log::debug!(
        "Parsed message {:?} with {} distinct headers",
        email.message_id,
        email.headers.len()
    );
    Ok(email)
}

/// Address from `Name <addr>` or a bare `addr`; `None` when neither form
/// matches.
pub fn parse_address(value: &str) -> Option<String> {
    if let Some(captures) = ANGLE_ADDR.captures(value) {
        return Some(captures[1].to_string());
    }
    let value = value.trim();
    BARE_ADDR.is_match(value).then(|| value.to_string())
}

/// Split an address into local part and domain.
pub fn extract_email_parts(address: &str) -> anyhow::Result<(String, String)> {
    let parts: Vec<&str> = address.split('@').collect();
    if parts.len() != 2 {
        bail!("invalid email format: {address}");
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGE: &str = "Return-Path: <bounce@mailer.example.net>\r\n\
Received: from mx.example.net (mx.example.net [198.51.100.7])\r\n\
\tby mail.example.org with ESMTPS\r\n\
Received: from app.example.com by mx.example.net\r\n\
dkim-signature: v=1; a=rsa-sha256; d=example.com;\r\n\
\ts=selector; h=from:subject\r\n\
From: \"Alice Example\" <alice@example.com>\r\n\
Reply-To: alice@example.org\r\n\
Subject: Quarterly report\r\n\
Message-ID: <1234@example.com>\r\n\
X-Custom: keep-me\r\n\
\r\n\
Hello,\r\n\
see attached.\r\n";

    #[test]
    fn test_parse_full_message() {
        let email = parse_email(MESSAGE).unwrap();

        assert_eq!(email.from.as_deref(), Some("alice@example.com"));
        assert_eq!(email.reply_to.as_deref(), Some("alice@example.org"));
        assert_eq!(email.return_path.as_deref(), Some("bounce@mailer.example.net"));
        assert_eq!(email.subject, "Quarterly report");
        assert_eq!(email.message_id, "<1234@example.com>");
        assert_eq!(email.body, "Hello,\nsee attached.\n");
    }

    #[test]
    fn test_folded_and_repeated_headers() {
        let email = parse_email(MESSAGE).unwrap();

        let received = email.header_values("Received");
        assert_eq!(received.len(), 2);
        assert_eq!(
            received[0],
            "from mx.example.net (mx.example.net [198.51.100.7]) by mail.example.org with ESMTPS"
        );
        assert_eq!(
            email.header_value("DKIM-Signature"),
            Some("v=1; a=rsa-sha256; d=example.com; s=selector; h=from:subject")
        );
        assert_eq!(email.header_value("X-Custom"), Some("keep-me"));
    }

    #[test]
    fn test_duplicate_from_headers_survive_parsing() {
        let raw = "From: a@example.com\nFROM: b@evil.test\nSubject: hi\n\nbody\n";
        let email = parse_email(raw).unwrap();

        assert_eq!(email.header_values("From").len(), 2);
        assert_eq!(email.from.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_skips_mbox_envelope_line() {
        let raw = "From alice@example.com Mon Jan  1 00:00:00 2024\nFrom: alice@example.com\n\n";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.header_values("From").len(), 1);
    }

    #[test]
    fn test_unparseable_address_is_absent() {
        let raw = "From: Undisclosed sender\nSubject: hi\n\n";
        let email = parse_email(raw).unwrap();
        assert_eq!(email.from, None);
    }

    #[test]
    fn test_rejects_empty_and_headerless_input() {
        assert!(parse_email("").is_err());
        assert!(parse_email("   \n").is_err());
        assert!(parse_email("no header separator here\n").is_err());
    }

    #[test]
    fn test_parse_address_forms() {
        assert_eq!(
            parse_address("Bob <bob@example.com>").as_deref(),
            Some("bob@example.com")
        );
        assert_eq!(parse_address(" bob@example.com ").as_deref(), Some("bob@example.com"));
        assert_eq!(parse_address("bob at example.com"), None);
    }

    #[test]
    fn test_extract_email_parts() {
        assert_eq!(
            extract_email_parts("bob@example.com").unwrap(),
            ("bob".to_string(), "example.com".to_string())
        );
        assert!(extract_email_parts("bob").is_err());
        assert!(extract_email_parts("a@b@c").is_err());
    }
}
