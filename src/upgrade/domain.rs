//! Upgrade domain ordering and per-domain progress.

use serde::{Deserialize, Serialize};

/// How upgrade domain names are ordered into the walk sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Order of first appearance in the cluster snapshot.
    #[default]
    Default,
    /// Numeric names ascending; non-numeric names follow lexicographically.
    Numeric,
    Lexicographical,
    ReverseNumeric,
    ReverseLexicographical,
}

/// Sort upgrade domain names according to `order`.
pub fn sort_upgrade_domains(mut names: Vec<String>, order: SortOrder) -> Vec<String> {
    fn numeric_key(name: &str) -> (u8, Option<u64>, &str) {
        match name.parse::<u64>() {
            Ok(n) => (0, Some(n), name),
            Err(_) => (1, None, name),
        }
    }

    match order {
        SortOrder::Default => {}
        SortOrder::Lexicographical => names.sort(),
        SortOrder::ReverseLexicographical => {
            names.sort();
            names.reverse();
        }
        SortOrder::Numeric => names.sort_by(|a, b| numeric_key(a).cmp(&numeric_key(b))),
        SortOrder::ReverseNumeric => {
            names.sort_by(|a, b| numeric_key(a).cmp(&numeric_key(b)));
            names.reverse();
        }
    }
    names
}

/// Where one upgrade domain stands in the walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeDomainState {
    Pending,
    InProgress,
    Completed,
}

/// Wire-visible progress of one upgrade domain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeDomainProgress {
    pub name: String,
    pub state: UpgradeDomainState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_keeps_discovery_order() {
        let sorted = sort_upgrade_domains(names(&["UD2", "UD0", "UD1"]), SortOrder::Default);
        assert_eq!(sorted, names(&["UD2", "UD0", "UD1"]));
    }

    #[test]
    fn test_lexicographical_and_reverse() {
        let sorted =
            sort_upgrade_domains(names(&["UD2", "UD0", "UD1"]), SortOrder::Lexicographical);
        assert_eq!(sorted, names(&["UD0", "UD1", "UD2"]));

        let sorted =
            sort_upgrade_domains(names(&["UD2", "UD0", "UD1"]), SortOrder::ReverseLexicographical);
        assert_eq!(sorted, names(&["UD2", "UD1", "UD0"]));
    }

    #[test]
    fn test_numeric_orders_by_value_not_text() {
        let sorted = sort_upgrade_domains(names(&["10", "2", "1"]), SortOrder::Numeric);
        assert_eq!(sorted, names(&["1", "2", "10"]));

        let sorted = sort_upgrade_domains(names(&["10", "2", "1"]), SortOrder::ReverseNumeric);
        assert_eq!(sorted, names(&["10", "2", "1"]));
    }

    #[test]
    fn test_numeric_with_non_numeric_names() {
        let sorted = sort_upgrade_domains(names(&["rack-b", "2", "rack-a", "1"]), SortOrder::Numeric);
        assert_eq!(sorted, names(&["1", "2", "rack-a", "rack-b"]));
    }
}
