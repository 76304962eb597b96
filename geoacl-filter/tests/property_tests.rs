mod support;

use geoacl_filter::quoting::quote_string;
use geoacl_filter::{AccessControl, NO_FEATURES, RequestScope};
use proptest::prelude::*;
use std::collections::BTreeSet;
use support::*;

const KNOWN_GROUPS: [&str; 3] = ["east", "west", "admins"];

fn spatial_filter(groups: &[String]) -> String {
    let project = spatial_project("display_and_editing");
    let registry = vec![polygon_layer()];
    let layer = points_layer();
    let refs: Vec<&str> = groups.iter().map(String::as_str).collect();
    let identity = caller(&refs, "");
    let scope = RequestScope::new(&identity, Some(&project), &registry);
    AccessControl::default().layer_filter_subset_string(&scope, &layer)
}

/// Ids of an `"id" IN ( ... )` filter, empty for `NO_FEATURES`.
fn visible_ids(filter: &str) -> BTreeSet<i64> {
    filter
        .trim_start_matches("\"id\" IN (")
        .trim_end_matches(')')
        .split(',')
        .filter_map(|id| id.trim().parse().ok())
        .collect()
}

fn group_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("east".to_string()),
        Just("west".to_string()),
        Just("admins".to_string()),
        "[a-z]{1,8}",
    ]
}

proptest! {
    #[test]
    fn unmatched_groups_see_nothing(groups in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
        prop_assume!(groups.iter().all(|g| !KNOWN_GROUPS.contains(&g.as_str())));
        prop_assert_eq!(spatial_filter(&groups), NO_FEATURES);
    }

    #[test]
    fn filters_are_deterministic(groups in proptest::collection::vec(group_name(), 1..5)) {
        prop_assert_eq!(spatial_filter(&groups), spatial_filter(&groups));
    }

    #[test]
    fn more_groups_never_see_less(
        groups in proptest::collection::vec(group_name(), 1..4),
        extra in group_name(),
    ) {
        let before = visible_ids(&spatial_filter(&groups));
        let mut wider = groups.clone();
        wider.push(extra);
        let after = visible_ids(&spatial_filter(&wider));
        prop_assert!(before.is_subset(&after), "{:?} not within {:?}", before, after);
    }

    #[test]
    fn quoted_strings_stay_closed(text in ".*") {
        let quoted = quote_string(&text);
        let inner = &quoted[1..quoted.len() - 1];
        prop_assert!(!inner.replace("''", "").contains('\''));
    }
}
