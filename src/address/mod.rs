//! Parsing of D-Bus address strings.
//!
//! An address string is a semicolon-separated list of candidates, each of
//! the form `name:key=value,key=value,...`. Values are percent-encoded.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};


/// Characters that may appear unescaped in an address value.
fn optionally_escaped(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'/' | b'\\' | b'.' | b'*')
}

/// A single parsed address: a transport name plus its parameters.
///
/// # Examples
///
/// ```
/// use tokio_minibus::Address;
///
/// let list = Address::parse_list("unix:path=/run/user/1000/bus;tcp:host=localhost,port=4711").unwrap();
///
/// assert_eq!(list.len(), 2);
/// assert_eq!(list[0].name(), "unix");
/// assert_eq!(list[0].get("path"), Some("/run/user/1000/bus"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    name: String,
    params: Vec<(String, String)>,
}

impl Address {
    /// Parse a semicolon-separated candidate list, in fallback order.
    /// Empty entries are skipped, so a trailing semicolon is harmless.
    pub fn parse_list(input: &str) -> Result<Vec<Address>> {
        let mut out = Vec::new();

        for entry in input.split(';') {
            if entry.is_empty() {
                continue;
            }

            out.push(Self::parse(entry)?);
        }

        if out.is_empty() {
            return Err(invalid(input, "no addresses in list"));
        }

        Ok(out)
    }

    /// Parse a single address.
    pub fn parse(input: &str) -> Result<Address> {
        let Some((name, params)) = input.split_once(':') else {
            return Err(invalid(input, "missing `:` after the transport name"));
        };

        if name.is_empty() {
            return Err(invalid(input, "empty transport name"));
        }

        let mut address = Address {
            name: name.into(),
            params: Vec::new(),
        };

        for pair in params.split(',') {
            if pair.is_empty() {
                continue;
            }

            let Some((key, value)) = pair.split_once('=') else {
                return Err(invalid(input, "parameter is missing `=`"));
            };

            if key.is_empty() {
                return Err(invalid(input, "parameter has an empty key"));
            }

            if address.get(key).is_some() {
                return Err(invalid(input, "duplicate parameter key"));
            }

            let value = percent_decode(input, value)?;
            address.params.push((key.into(), value));
        }

        Ok(address)
    }

    /// The transport name, such as `unix` or `tcp`. Case-sensitive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a parameter by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Addresses display in the wire syntax, with values re-escaped.
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.name)?;

        for (n, (key, value)) in self.params.iter().enumerate() {
            if n > 0 {
                write!(f, ",")?;
            }

            write!(f, "{key}=")?;

            for &b in value.as_bytes() {
                if optionally_escaped(b) {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "%{b:02x}")?;
                }
            }
        }

        Ok(())
    }
}

fn invalid(input: &str, why: &str) -> Error {
    Error::new(ErrorKind::InvalidAddress(format!("`{input}`: {why}")))
}

/// Decode `%HH` escapes in a parameter value.
fn percent_decode(input: &str, value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let (Some(hi), Some(lo)) = (
                    bytes.get(i + 1).copied().and_then(hex_digit),
                    bytes.get(i + 2).copied().and_then(hex_digit),
                ) else {
                    return Err(invalid(input, "truncated percent escape"));
                };

                out.push(hi << 4 | lo);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).map_err(|_| invalid(input, "value is not valid utf-8"))
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
