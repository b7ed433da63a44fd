use std::collections::HashMap;

use strata_domain::Host;

use crate::error::HostsError;

/// `"all"` or empty selects every host; otherwise a comma-separated list of
/// `key=value` pairs, ANDed together against a host's labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    All,
    Labels(HashMap<String, String>),
}

impl Selector {
    pub fn matches(&self, host: &Host) -> bool {
        match self {
            Selector::All => true,
            Selector::Labels(filter) => host.matches_labels(filter),
        }
    }
}

pub fn parse_selector(raw: &str) -> Result<Selector, HostsError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
        return Ok(Selector::All);
    }

    let mut labels = HashMap::new();
    for pair in trimmed.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = parse_label(pair, raw)?;
        labels.insert(key, value);
    }

    if labels.is_empty() {
        return Err(HostsError::Selector {
            selector: raw.to_string(),
            message: "no key=value pairs found".to_string(),
        });
    }

    Ok(Selector::Labels(labels))
}

fn parse_label(pair: &str, original: &str) -> Result<(String, String), HostsError> {
    let (key, value) = pair.split_once('=').ok_or_else(|| HostsError::Selector {
        selector: original.to_string(),
        message: format!("expected 'key=value', got '{pair}'"),
    })?;
    let key = key.trim();
    let value = value.trim();
    if key.is_empty() {
        return Err(HostsError::Selector {
            selector: original.to_string(),
            message: format!("empty key in '{pair}'"),
        });
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_all_select_everything() {
        assert_eq!(parse_selector("").unwrap(), Selector::All);
        assert_eq!(parse_selector("all").unwrap(), Selector::All);
        assert_eq!(parse_selector("ALL").unwrap(), Selector::All);
    }

    #[test]
    fn single_pair_parses_to_one_label() {
        let selector = parse_selector("env=prod").unwrap();
        match selector {
            Selector::Labels(labels) => {
                assert_eq!(labels.get("env"), Some(&"prod".to_string()));
                assert_eq!(labels.len(), 1);
            }
            Selector::All => panic!("expected Labels"),
        }
    }

    #[test]
    fn whitespace_around_pairs_is_trimmed() {
        let selector = parse_selector(" env = prod , role=db ").unwrap();
        match selector {
            Selector::Labels(labels) => {
                assert_eq!(labels.get("env"), Some(&"prod".to_string()));
                assert_eq!(labels.get("role"), Some(&"db".to_string()));
            }
            Selector::All => panic!("expected Labels"),
        }
    }

    #[test]
    fn missing_equals_sign_is_rejected() {
        assert!(parse_selector("env").is_err());
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(parse_selector("=prod").is_err());
    }
}
