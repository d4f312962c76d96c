//! Directory entries as produced by the searchers, before they are encoded
//! on the wire.

use ldap3_proto::proto::{LdapPartialAttribute, LdapSearchResultEntry};
use serde_json::{Map, Value};

use crate::constants::{
    OPERATIONAL_ATTRIBUTES, SEARCH_ATTRIBUTE_ALL_OPERATIONAL,
    SEARCH_ATTRIBUTE_ALL_USER, SEARCH_ATTRIBUTE_NONE,
};

/// Named, multi-valued attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn is_operational(&self) -> bool {
        OPERATIONAL_ATTRIBUTES
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&self.name))
    }
}

/// Directory entry. Attribute order is kept as inserted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    pub dn: String,
    pub attributes: Vec<Attribute>,
}

impl Entry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: Vec::new(),
        }
    }

    /// Append an attribute without checking for duplicates.
    pub fn with<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.push(Attribute::new(
            name,
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Values of an attribute, looked up case-insensitively.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.values.as_slice())
    }

    /// Insert `name` unless an attribute with that name already exists.
    /// Attributes without values are never inserted.
    pub fn ensure<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.get(name).is_some() {
            return;
        }
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if !values.is_empty() {
            self.attributes.push(Attribute::new(name, values));
        }
    }

    /// Keep only the attributes a client asked for.
    ///
    /// An empty list selects every user attribute, `1.1` on its own selects
    /// `objectClass` only, `*` and `+` select all user and all operational
    /// attributes respectively. Names are compared case-insensitively.
    pub fn select(&mut self, requested: &[String]) {
        if requested.len() == 1 && requested[0] == SEARCH_ATTRIBUTE_NONE {
            self.attributes
                .retain(|a| a.name.eq_ignore_ascii_case("objectClass"));
            return;
        }

        let mut all_user = requested.is_empty();
        let mut all_operational = false;
        let mut names = Vec::with_capacity(requested.len());
        for attribute in requested {
            match attribute.as_str() {
                SEARCH_ATTRIBUTE_ALL_USER => all_user = true,
                SEARCH_ATTRIBUTE_ALL_OPERATIONAL => all_operational = true,
                SEARCH_ATTRIBUTE_NONE => {},
                name => names.push(name),
            }
        }

        self.attributes.retain(|a| {
            let operational = a.is_operational();
            (all_user && !operational)
                || (all_operational && operational)
                || names.iter().any(|n| n.eq_ignore_ascii_case(&a.name))
        });
    }

    /// Convert into the wire representation.
    pub fn into_ldap(self) -> LdapSearchResultEntry {
        LdapSearchResultEntry {
            dn: self.dn,
            attributes: self
                .attributes
                .into_iter()
                .map(|a| LdapPartialAttribute {
                    atype: a.name,
                    vals: a.values.into_iter().map(String::into_bytes).collect(),
                })
                .collect(),
        }
    }
}

/// Turn a custom attribute key into a valid LDAP attribute name: dots are
/// dropped and slashes become dashes.
pub fn sanitize_key(key: &str) -> String {
    key.replace('.', "").replace('/', "-")
}

/// Flatten backend custom attributes into LDAP attributes. Each key is
/// emitted as-is and, when it differs, under its sanitized name too.
pub fn custom_attributes(attributes: &Map<String, Value>) -> Vec<Attribute> {
    let mut out: Vec<Attribute> = Vec::with_capacity(attributes.len());
    for (key, value) in attributes {
        let values = to_values(value);
        if values.is_empty() {
            continue;
        }

        let sanitized = sanitize_key(key);
        if sanitized != *key
            && !out.iter().any(|a| a.name.eq_ignore_ascii_case(&sanitized))
        {
            out.push(Attribute::new(sanitized, values.clone()));
        }
        if !out.iter().any(|a| a.name.eq_ignore_ascii_case(key)) {
            out.push(Attribute::new(key.clone(), values));
        }
    }
    out
}

fn to_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Bool(b) => vec![b.to_string()],
        Value::Number(n) => vec![n.to_string()],
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(to_values).collect(),
        Value::Object(_) => vec![value.to_string()],
    }
}
