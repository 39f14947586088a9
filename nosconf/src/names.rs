//! Fully qualified resource names.
//!
//! Resources are addressed as `/partition/[sub_path/]name`. When a name goes
//! into a URL path segment it is rewritten with `~` separators instead.
//! RESTCONF list keys are percent-escaped with [`encode_key`].

use crate::error::{Error, Result};

/// Escape a list key for use in a URL path, e.g. `a/b` becomes `a%2Fb`.
pub fn encode_key(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

fn is_numeric(value: &str) -> bool {
    value.parse::<i64>().is_ok()
}

/// Qualify `value` with `partition` (and `sub_path`, if given).
///
/// Names already starting with `/` are kept unless a sub-path must be
/// inserted, in which case the partition and leaf are taken from the name.
/// Numeric names are always qualified.
pub fn fq_name(partition: &str, value: &str, sub_path: Option<&str>) -> String {
    match sub_path.filter(|s| !s.is_empty()) {
        None => {
            if is_numeric(value) || !value.starts_with('/') {
                format!("/{}/{}", partition, value)
            } else {
                value.to_string()
            }
        }
        Some(sub) => {
            if !is_numeric(value) && value.starts_with('/') {
                let parts: Vec<&str> = value.split('/').filter(|p| !p.is_empty()).collect();
                if let (Some(first), Some(leaf)) = (parts.first(), parts.last()) {
                    if parts.len() > 1 {
                        return format!("/{}/{}/{}", first, sub, leaf);
                    }
                }
            }
            format!("/{}/{}/{}", partition, sub, value.trim_start_matches('/'))
        }
    }
}

/// Qualify every name in a list.
pub fn fq_list_names(partition: &str, names: &[String]) -> Vec<String> {
    names.iter().map(|n| fq_name(partition, n, None)).collect()
}

/// Rewrite a name for use inside a URL path segment, e.g.
/// `("Common", "foo/bar", "")` becomes `~Common~foo~bar`.
pub fn transform_name(partition: &str, name: &str, sub_path: &str) -> Result<String> {
    let mut name = name.to_string();
    if !partition.is_empty() {
        if let Some(rest) = name.strip_prefix(&format!("{}/", partition)) {
            name = rest.to_string();
        }
        if let Some(rest) = name.strip_prefix(&format!("/{}/", partition)) {
            name = rest.to_string();
        }
    }

    if !name.is_empty() {
        name = name.replace('/', "~").replace('%', "%25");
    }

    let mut partition = partition.replace('/', "~");
    if !partition.is_empty() {
        if !partition.starts_with('~') {
            partition.insert(0, '~');
        }
    } else if !sub_path.is_empty() {
        return Err(Error::validation(
            "When giving the subPath component include partition as well.",
        ));
    }

    let sub_path = if !sub_path.is_empty() && !partition.is_empty() {
        format!("~{}", sub_path)
    } else {
        sub_path.to_string()
    };

    if !name.is_empty() && !partition.is_empty() {
        name.insert(0, '~');
    }

    Ok(format!("{}{}{}", partition, sub_path, name))
}
