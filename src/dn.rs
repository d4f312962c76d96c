//! Distinguished name parsing and comparison.
//!
//! Every DN check in the gateway (routing, bind DN ownership, container
//! matching) goes through [`Dn`]: names are parsed once and compared
//! structurally, attribute types and values case-insensitively.

use std::fmt;

use thiserror::Error;

/// Errors raised while parsing a distinguished name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DnError {
    #[error("relative name `{0}` has no `=`")]
    MissingEquals(String),

    #[error("empty attribute type in `{0}`")]
    EmptyType(String),

    #[error("invalid escape sequence in `{0}`")]
    InvalidEscape(String),

    #[error("value is not valid UTF-8 in `{0}`")]
    InvalidUtf8(String),
}

/// One `type=value` pair of a relative name.
#[derive(Debug, Clone)]
pub struct AttributeValue {
    /// Lower-cased attribute type.
    pub kind: String,
    /// Unescaped value, case preserved.
    pub value: String,
    normalized: String,
}

impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.normalized == other.normalized
    }
}

impl Eq for AttributeValue {}

/// Relative distinguished name, possibly multi-valued (`cn=a+uid=b`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    pub attributes: Vec<AttributeValue>,
}

impl Rdn {
    /// Value of `kind` in this relative name.
    pub fn get(&self, kind: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.kind.eq_ignore_ascii_case(kind))
            .map(|a| a.value.as_str())
    }
}

/// Parsed distinguished name, most specific component first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// Parse a string DN. The empty string is the (empty) root DN.
    pub fn parse(input: &str) -> Result<Self, DnError> {
        let mut rdns = Vec::new();
        if input.trim().is_empty() {
            return Ok(Self { rdns });
        }

        let mut attributes = Vec::new();
        let mut chars = input.chars().peekable();
        loop {
            // attribute type.
            let mut kind = String::new();
            loop {
                match chars.next() {
                    Some('=') => break,
                    Some(',' | ';' | '+') | None => {
                        return Err(DnError::MissingEquals(
                            kind.trim().to_owned(),
                        ));
                    },
                    Some(c) => kind.push(c),
                }
            }
            let kind = kind.trim().to_ascii_lowercase();
            if kind.is_empty() {
                return Err(DnError::EmptyType(input.to_owned()));
            }

            // attribute value.
            let mut bytes: Vec<u8> = Vec::new();
            let mut kept = 0;
            let mut separator = None;
            while let Some(c) = chars.next() {
                match c {
                    ',' | ';' | '+' => {
                        separator = Some(c);
                        break;
                    },
                    '\\' => {
                        let escaped = chars
                            .next()
                            .ok_or_else(|| DnError::InvalidEscape(input.into()))?;
                        if escaped.is_ascii_hexdigit() {
                            let low = chars
                                .next()
                                .filter(char::is_ascii_hexdigit)
                                .ok_or_else(|| {
                                    DnError::InvalidEscape(input.into())
                                })?;
                            let hex: String = [escaped, low].iter().collect();
                            let byte = u8::from_str_radix(&hex, 16)
                                .map_err(|_| DnError::InvalidEscape(input.into()))?;
                            bytes.push(byte);
                        } else {
                            let mut buf = [0; 4];
                            bytes.extend_from_slice(
                                escaped.encode_utf8(&mut buf).as_bytes(),
                            );
                        }
                        kept = bytes.len();
                    },
                    ' ' if bytes.is_empty() => {},
                    c => {
                        let mut buf = [0; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        if c != ' ' {
                            kept = bytes.len();
                        }
                    },
                }
            }
            // unescaped trailing spaces are not part of the value.
            bytes.truncate(kept);
            let value = String::from_utf8(bytes)
                .map_err(|_| DnError::InvalidUtf8(input.to_owned()))?;

            attributes.push(AttributeValue {
                normalized: value.to_lowercase(),
                kind,
                value,
            });

            match separator {
                Some('+') => continue,
                Some(_) => {
                    rdns.push(Rdn {
                        attributes: std::mem::take(&mut attributes),
                    });
                },
                None => {
                    rdns.push(Rdn { attributes });
                    break;
                },
            }
        }

        Ok(Self { rdns })
    }

    /// Number of relative components.
    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// Strict ancestor: `self` is a proper suffix of `other`.
    pub fn is_ancestor_of(&self, other: &Dn) -> bool {
        self.rdns.len() < other.rdns.len()
            && other.rdns.ends_with(&self.rdns)
    }

    /// Strict descendant: `other` is a proper suffix of `self`.
    pub fn is_descendant_of(&self, other: &Dn) -> bool {
        other.is_ancestor_of(self)
    }

    /// `self` equals `other` or is one of its ancestors.
    pub fn contains(&self, other: &Dn) -> bool {
        self == other || self.is_ancestor_of(other)
    }

    /// Value of `kind` in the first (most specific) relative component.
    pub fn first_value(&self, kind: &str) -> Option<&str> {
        self.rdns.first().and_then(|rdn| rdn.get(kind))
    }

    /// Distance between `self` and one of its descendants.
    pub fn depth_below(&self, ancestor: &Dn) -> Option<usize> {
        ancestor
            .contains(self)
            .then(|| self.rdns.len() - ancestor.rdns.len())
    }
}

impl fmt::Display for Dn {
    /// Canonical lower-cased form, used as a map key.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            for (j, attribute) in rdn.attributes.iter().enumerate() {
                if j > 0 {
                    f.write_str("+")?;
                }
                write!(f, "{}={}", attribute.kind, escape(&attribute.normalized))?;
            }
        }
        Ok(())
    }
}

/// Canonical key of a DN string, falling back to its lower-cased form when
/// it does not parse.
pub fn normalize(dn: &str) -> String {
    match Dn::parse(dn) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => dn.trim().to_lowercase(),
    }
}

/// Escape a value for use in a DN string.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            },
            '#' | ' ' if i == 0 => {
                out.push('\\');
                out.push(c);
            },
            ' ' if i == last => out.push_str("\\ "),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}
