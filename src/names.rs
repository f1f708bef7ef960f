//! Validation of the name grammars used in message headers.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Maximum length of any name.
const MAX_NAME_LENGTH: usize = 255;

/// The kind of name that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// A well-known or unique bus name.
    Bus,
    /// An interface name.
    Interface,
    /// A method or signal member name.
    Member,
    /// An error name.
    Error,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameKind::Bus => f.write_str("bus"),
            NameKind::Interface => f.write_str("interface"),
            NameKind::Member => f.write_str("member"),
            NameKind::Error => f.write_str("error"),
        }
    }
}

fn invalid(kind: NameKind, name: &str, why: &'static str) -> Error {
    Error::new(ErrorKind::InvalidName {
        kind,
        name: name.into(),
        why,
    })
}

/// Validate a member name: `[A-Za-z_][A-Za-z0-9_]*`, at most 255 bytes.
pub(crate) fn validate_member(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(NameKind::Member, name, "name is empty"));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(NameKind::Member, name, "name is too long"));
    }

    let mut bytes = name.bytes();

    if !matches!(bytes.next(), Some(b'A'..=b'Z' | b'a'..=b'z' | b'_')) {
        return Err(invalid(
            NameKind::Member,
            name,
            "must start with a letter or underscore",
        ));
    }

    if !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(invalid(
            NameKind::Member,
            name,
            "contains a character outside [A-Za-z0-9_]",
        ));
    }

    Ok(())
}

/// Validate an interface name: two or more dot-separated elements of
/// `[A-Za-z_][A-Za-z0-9_]*`, at most 255 bytes.
pub(crate) fn validate_interface(name: &str) -> Result<()> {
    validate_dotted(NameKind::Interface, name)
}

/// Validate an error name, which shares the interface grammar.
pub(crate) fn validate_error_name(name: &str) -> Result<()> {
    validate_dotted(NameKind::Error, name)
}

fn validate_dotted(kind: NameKind, name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(kind, name, "name is too long"));
    }

    let mut elements = 0;

    for element in name.split('.') {
        elements += 1;

        let mut bytes = element.bytes();

        if !matches!(bytes.next(), Some(b'A'..=b'Z' | b'a'..=b'z' | b'_')) {
            return Err(invalid(
                kind,
                name,
                "element must start with a letter or underscore",
            ));
        }

        if !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(invalid(
                kind,
                name,
                "element contains a character outside [A-Za-z0-9_]",
            ));
        }
    }

    if elements < 2 {
        return Err(invalid(kind, name, "must have at least two elements"));
    }

    Ok(())
}

/// Validate a bus name, either unique (`:1.42`) or well-known
/// (`org.freedesktop.DBus`). Well-known elements additionally allow `-`;
/// unique-name elements may start with a digit.
pub(crate) fn validate_bus_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(NameKind::Bus, name, "name is too long"));
    }

    let (unique, rest) = match name.strip_prefix(':') {
        Some(rest) => (true, rest),
        None => (false, name),
    };

    let mut elements = 0;

    for element in rest.split('.') {
        elements += 1;

        let mut bytes = element.bytes();

        let leading = bytes.next();
        let leading_ok = match leading {
            Some(b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'-') => true,
            Some(b'0'..=b'9') => unique,
            _ => false,
        };

        if !leading_ok {
            return Err(invalid(NameKind::Bus, name, "element starts with an invalid character"));
        }

        if !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
            return Err(invalid(
                NameKind::Bus,
                name,
                "element contains an invalid character",
            ));
        }
    }

    if elements < 2 {
        return Err(invalid(NameKind::Bus, name, "must have at least two elements"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn members() {
        assert!(validate_member("Hello").is_ok());
        assert!(validate_member("_private2").is_ok());
        assert!(validate_member("").is_err());
        assert!(validate_member("2fast").is_err());
        assert!(validate_member("with-dash").is_err());
    }

    #[test]
    fn interfaces() {
        assert!(validate_interface("org.freedesktop.DBus").is_ok());
        assert!(validate_interface("a.b").is_ok());
        assert!(validate_interface("solo").is_err());
        assert!(validate_interface("a..b").is_err());
        assert!(validate_interface("a.2b").is_err());
        assert!(validate_interface(".a.b").is_err());
    }

    #[test]
    fn bus_names() {
        assert!(validate_bus_name("org.freedesktop.DBus").is_ok());
        assert!(validate_bus_name("com.example-x.Svc").is_ok());
        assert!(validate_bus_name(":1.42").is_ok());
        assert!(validate_bus_name("1.42").is_err());
        assert!(validate_bus_name(":x").is_err());
        assert!(validate_bus_name("solo").is_err());
    }
}
