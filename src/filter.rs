//! LDAP filter helpers: object class extraction, translation into API
//! query parameters, evaluation against synthesized entries and rendering
//! back to the RFC 4515 string form.

use ldap3_proto::proto::{LdapFilter, LdapSubstringFilter};

use crate::api::model::{GroupQuery, UserQuery};
use crate::constants::{
    ATTR_ACTIVE, ATTR_LEGACY_ACTIVE, ATTR_LEGACY_SUPERUSER, ATTR_SUPERUSER,
};
use crate::dn::Dn;
use crate::entry::Entry;
use crate::error::{GatewayError, Result};

/// Object class a filter narrows the search to: the last non-empty
/// `objectClass` equality found, lower-cased. Empty when there is none.
pub fn object_class(filter: &LdapFilter) -> String {
    fn walk(filter: &LdapFilter, found: &mut String) {
        match filter {
            LdapFilter::And(children) | LdapFilter::Or(children) => {
                children.iter().for_each(|c| walk(c, found))
            },
            LdapFilter::Not(child) => walk(child, found),
            LdapFilter::Equality(attribute, value)
                if attribute.eq_ignore_ascii_case("objectClass")
                    && !value.is_empty() =>
            {
                *found = value.to_lowercase();
            },
            _ => {},
        }
    }

    let mut found = String::new();
    walk(filter, &mut found);
    found
}

/// `key=value` pairs of a filter made of equalities joined by `AND`.
/// Nested `AND`s are flattened; any other operator contributes nothing.
fn equalities(filter: &LdapFilter) -> Vec<(&str, &str)> {
    match filter {
        LdapFilter::Equality(attribute, value) => {
            vec![(attribute.as_str(), value.as_str())]
        },
        LdapFilter::And(children) => {
            children.iter().flat_map(equalities).collect()
        },
        _ => Vec::new(),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn first_cn(value: &str) -> Option<String> {
    Dn::parse(value)
        .ok()
        .and_then(|dn| dn.first_value("cn").map(str::to_owned))
}

/// Users listing matching `filter`. `None` when the filter can never match
/// a user, in which case the API call is skipped.
pub fn user_query(filter: &LdapFilter) -> Option<UserQuery> {
    let mut query = UserQuery {
        ldap_filter: Some(render(filter)),
        ..Default::default()
    };

    for (attribute, value) in equalities(filter) {
        match attribute.to_ascii_lowercase().as_str() {
            "cn" | "samaccountname" => {
                query.username = Some(value.to_owned())
            },
            "name" | "displayname" => query.name = Some(value.to_owned()),
            "mail" => query.email = Some(value.to_owned()),
            "memberof" => query.groups_by_name.push(first_cn(value)?),
            a if a == ATTR_ACTIVE || a == ATTR_LEGACY_ACTIVE => {
                query.is_active = Some(parse_bool(value)?)
            },
            a if a == ATTR_SUPERUSER || a == ATTR_LEGACY_SUPERUSER => {
                query.is_superuser = Some(parse_bool(value)?)
            },
            _ => {},
        }
    }

    Some(query)
}

/// Groups listing matching `filter`. `None` when the filter can never
/// match a group.
pub fn group_query(filter: &LdapFilter) -> Option<GroupQuery> {
    let mut query = GroupQuery {
        ldap_filter: Some(render(filter)),
        ..Default::default()
    };

    for (attribute, value) in equalities(filter) {
        match attribute.to_ascii_lowercase().as_str() {
            "cn" => query.name = Some(value.to_owned()),
            "member" => query.members_by_username.push(first_cn(value)?),
            a if a == ATTR_SUPERUSER || a == ATTR_LEGACY_SUPERUSER => {
                query.is_superuser = Some(parse_bool(value)?)
            },
            _ => {},
        }
    }

    Some(query)
}

/// Evaluate `filter` against `entry`.
///
/// Equality and substring matches ignore case on both the attribute name
/// and the value. Ordering, approximate and extensible matches are refused.
pub fn matches(filter: &LdapFilter, entry: &Entry) -> Result<bool> {
    match filter {
        LdapFilter::And(children) => {
            for child in children {
                if !matches(child, entry)? {
                    return Ok(false);
                }
            }
            Ok(true)
        },
        LdapFilter::Or(children) => {
            for child in children {
                if matches(child, entry)? {
                    return Ok(true);
                }
            }
            Ok(false)
        },
        LdapFilter::Not(child) => Ok(!matches(child, entry)?),
        LdapFilter::Present(attribute) => Ok(attribute
            .eq_ignore_ascii_case("objectClass")
            || entry.get(attribute).is_some()),
        LdapFilter::Equality(attribute, value) => {
            let value = value.to_lowercase();
            Ok(entry
                .get(attribute)
                .is_some_and(|v| v.iter().any(|v| v.to_lowercase() == value)))
        },
        LdapFilter::Substring(attribute, substring) => {
            Ok(entry.get(attribute).is_some_and(|values| {
                values.iter().any(|v| substring_matches(v, substring))
            }))
        },
        other => Err(GatewayError::UnsupportedFilter(render(other))),
    }
}

fn substring_matches(value: &str, filter: &LdapSubstringFilter) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();

    if let Some(initial) = &filter.initial {
        match rest.strip_prefix(initial.to_lowercase().as_str()) {
            Some(remaining) => rest = remaining,
            None => return false,
        }
    }

    for any in &filter.any {
        let any = any.to_lowercase();
        match rest.find(&any) {
            Some(position) => rest = &rest[position + any.len()..],
            None => return false,
        }
    }

    match &filter.final_ {
        Some(last) => rest.ends_with(&last.to_lowercase()),
        None => true,
    }
}

/// Render a filter in its string form.
pub fn render(filter: &LdapFilter) -> String {
    match filter {
        LdapFilter::And(children) => {
            format!("(&{})", children.iter().map(render).collect::<String>())
        },
        LdapFilter::Or(children) => {
            format!("(|{})", children.iter().map(render).collect::<String>())
        },
        LdapFilter::Not(child) => format!("(!{})", render(child)),
        LdapFilter::Equality(attribute, value) => {
            format!("({attribute}={})", escape(value))
        },
        LdapFilter::Present(attribute) => format!("({attribute}=*)"),
        LdapFilter::Substring(attribute, substring) => {
            let mut out = format!("({attribute}=");
            if let Some(initial) = &substring.initial {
                out.push_str(&escape(initial));
            }
            out.push('*');
            for any in &substring.any {
                out.push_str(&escape(any));
                out.push('*');
            }
            if let Some(last) = &substring.final_ {
                out.push_str(&escape(last));
            }
            out.push(')');
            out
        },
        LdapFilter::GreaterOrEqual(attribute, value) => {
            format!("({attribute}>={})", escape(value))
        },
        LdapFilter::LessOrEqual(attribute, value) => {
            format!("({attribute}<={})", escape(value))
        },
        LdapFilter::Approx(attribute, value) => {
            format!("({attribute}~={})", escape(value))
        },
        other => format!("({other:?})"),
    }
}

fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
