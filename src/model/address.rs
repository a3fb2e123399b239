//! Sender address parsing (RFC 5322 §3.4).

use crate::parser::header::decode_encoded_words;

/// A parsed sender address.
///
/// # Examples
/// - `"山田 <yamada@example.co.jp>"` → `display_name = "山田"`, `address = "yamada@example.co.jp"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

impl EmailAddress {
    /// Parse a single address from an unfolded `From:` value.
    ///
    /// The address part is split off first and only the display name is run
    /// through the encoded-word decoder, so a decoded name containing `<` or
    /// `,` cannot confuse the split.
    ///
    /// If parsing fails, the raw string is stored as `address`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        // "Display Name <address>" or "<address>"
        if let (Some(angle_start), Some(angle_end)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if angle_end > angle_start {
                let address = trimmed[angle_start + 1..angle_end].trim().to_string();
                let name_part = strip_quotes(&trimmed[..angle_start]);
                return Self {
                    display_name: decode_encoded_words(&name_part).trim().to_string(),
                    address,
                };
            }
        }

        // Obsolete "address (Display Name)" form
        if let (Some(open), Some(close)) = (trimmed.find('('), trimmed.rfind(')')) {
            if close > open && trimmed[..open].contains('@') {
                return Self {
                    display_name: decode_encoded_words(trimmed[open + 1..close].trim()),
                    address: trimmed[..open].trim().to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} <{}>", self.display_name, self.address)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("user@example.com");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "");
    }

    #[test]
    fn test_parse_name_and_address() {
        let addr = EmailAddress::parse("Sales Team <sales@example.com>");
        assert_eq!(addr.address, "sales@example.com");
        assert_eq!(addr.display_name, "Sales Team");
    }

    #[test]
    fn test_parse_encoded_name() {
        let addr = EmailAddress::parse("=?UTF-8?B?5bGx55Sw5aSq6YOO?= <taro@example.co.jp>");
        assert_eq!(addr.display_name, "山田太郎");
        assert_eq!(addr.address, "taro@example.co.jp");
    }

    #[test]
    fn test_parse_quoted_name() {
        let addr = EmailAddress::parse("\"Last, First\" <user@example.com>");
        assert_eq!(addr.display_name, "Last, First");
    }

    #[test]
    fn test_parse_comment_form() {
        let addr = EmailAddress::parse("user@example.com (User)");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "User");
    }

    #[test]
    fn test_display() {
        let addr = EmailAddress::parse("Alice <alice@example.com>");
        assert_eq!(addr.to_string(), "Alice <alice@example.com>");
        assert_eq!(EmailAddress::parse("").to_string(), "");
    }
}
