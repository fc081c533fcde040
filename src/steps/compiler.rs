//! Step compiler: configuration entries in, ordered lookup specs out.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::{NavigationRef, ReferenceKind, StepConfigEntry, StepSpec};

/// Attribute the host page stamps on every rendered widget instance
pub const WIDGET_INSTANCE_ATTRIBUTE: &str = "data-sp-feature-instance-id";

/// Errors reading a raw tour configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("tour configuration must be a list of steps, got {0}")]
    NotAList(&'static str),
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Read the host widget's raw configuration into entries.
///
/// Anything other than a list is rejected. Individual list items that cannot
/// be read as an entry are skipped with a warning so one bad step does not
/// take the rest of the tour down.
pub fn parse_configuration(value: &Value) -> Result<Vec<StepConfigEntry>, ConfigurationError> {
    let Value::Array(items) = value else {
        return Err(ConfigurationError::NotAList(json_kind(value)));
    };

    let mut seen_ids = HashSet::new();
    let mut entries = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        match serde_json::from_value::<StepConfigEntry>(item.clone()) {
            Ok(entry) => {
                if !entry.id.is_empty() && !seen_ids.insert(entry.id.clone()) {
                    warn!(index, id = %entry.id, "Duplicate tour step id");
                }
                entries.push(entry);
            }
            Err(e) => {
                warn!(index, error = %e, "Skipping unreadable tour step entry");
            }
        }
    }

    Ok(entries)
}

/// Compile entries into ordered step specs.
///
/// Disabled entries are dropped; the rest are sorted by `order` with ties kept
/// in list order. Never fails: an entry whose target cannot be expressed as a
/// query gets an empty `lookup_query`.
pub fn compile(entries: &[StepConfigEntry]) -> Vec<StepSpec> {
    let mut enabled: Vec<&StepConfigEntry> = entries.iter().filter(|e| e.enabled).collect();

    // sort_by is stable
    enabled.sort_by(|a, b| {
        a.effective_order()
            .partial_cmp(&b.effective_order())
            .unwrap_or(Ordering::Equal)
    });

    enabled.into_iter().map(compile_entry).collect()
}

fn compile_entry(entry: &StepConfigEntry) -> StepSpec {
    let lookup_query = lookup_query(entry);
    if lookup_query.is_empty() {
        debug!(
            id = %entry.id,
            kind = entry.reference_kind.as_str(),
            target_ref = %entry.target_ref,
            "Tour step has no resolvable target"
        );
    }

    StepSpec {
        lookup_query,
        text: entry.text.clone(),
        placement: entry.placement,
        source_id: entry.id.clone(),
    }
}

fn lookup_query(entry: &StepConfigEntry) -> String {
    match entry.reference_kind {
        ReferenceKind::WidgetInstance => widget_query(&entry.target_ref),
        ReferenceKind::NavigationLink => NavigationRef::parse(&entry.target_ref)
            .map(|nav| navigation_query(&nav.url))
            .unwrap_or_default(),
        ReferenceKind::Unrecognized => String::new(),
    }
}

/// Query matching the element that carries a widget's instance id
pub fn widget_query(instance_id: &str) -> String {
    let instance_id = instance_id.trim();
    if instance_id.is_empty() {
        return String::new();
    }
    format!(
        "[{}='{}']",
        WIDGET_INSTANCE_ATTRIBUTE,
        escape_quoted(instance_id, '\'')
    )
}

/// Query matching an anchor whose `href` is exactly `url`
pub fn navigation_query(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    format!("a[href=\"{}\"]", escape_quoted(url, '"'))
}

fn escape_quoted(value: &str, quote: char) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == quote {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::Placement;
    use serde_json::json;

    fn entry(id: &str, order: f64) -> StepConfigEntry {
        StepConfigEntry {
            id: id.to_string(),
            enabled: true,
            order,
            target_ref: format!("wp-{id}"),
            reference_kind: ReferenceKind::WidgetInstance,
            text: format!("About {id}"),
            placement: Placement::Auto,
        }
    }

    fn ids(specs: &[StepSpec]) -> Vec<&str> {
        specs.iter().map(|s| s.source_id.as_str()).collect()
    }

    #[test]
    fn test_compile_sorts_by_order_with_stable_ties() {
        let entries = vec![entry("a", 2.0), entry("b", 1.0), entry("c", 1.0)];
        assert_eq!(ids(&compile(&entries)), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_compile_treats_missing_order_as_zero() {
        let entries = parse_configuration(&json!([
            { "id": "late", "enabled": true, "order": 1, "referenceKind": "WidgetInstance", "targetRef": "x" },
            { "id": "unordered", "enabled": true, "referenceKind": "WidgetInstance", "targetRef": "y" },
            { "id": "negative", "enabled": true, "order": -1, "referenceKind": "WidgetInstance", "targetRef": "z" }
        ]))
        .unwrap();

        assert_eq!(ids(&compile(&entries)), vec!["negative", "unordered", "late"]);
    }

    #[test]
    fn test_compile_drops_disabled_entries() {
        let mut hidden = entry("hidden", -10.0);
        hidden.enabled = false;
        let entries = vec![entry("a", 1.0), hidden, entry("b", 2.0)];

        let specs = compile(&entries);
        assert_eq!(ids(&specs), vec!["a", "b"]);
    }

    #[test]
    fn test_compile_is_idempotent_and_leaves_input_alone() {
        let entries = vec![entry("a", 3.0), entry("b", 1.0)];
        let before = entries.clone();

        let first = compile(&entries);
        let second = compile(&entries);

        assert_eq!(first, second);
        assert_eq!(entries, before);
    }

    #[test]
    fn test_compile_empty() {
        assert!(compile(&[]).is_empty());
    }

    #[test]
    fn test_widget_query_shape() {
        let specs = compile(&[entry("hero", 0.0)]);
        assert_eq!(
            specs[0].lookup_query,
            "[data-sp-feature-instance-id='wp-hero']"
        );
        assert_eq!(specs[0].text, "About hero");
    }

    #[test]
    fn test_widget_query_escapes_quotes() {
        assert_eq!(
            widget_query("it's"),
            "[data-sp-feature-instance-id='it\\'s']"
        );
        assert_eq!(widget_query("  "), "");
    }

    #[test]
    fn test_navigation_query_from_site_nav_reference() {
        let mut nav = entry("home", 0.0);
        nav.reference_kind = ReferenceKind::NavigationLink;
        nav.target_ref = "siteNav:/sites/x/Pages/Home.aspx".to_string();

        let specs = compile(&[nav]);
        assert_eq!(
            specs[0].lookup_query,
            "a[href=\"/sites/x/Pages/Home.aspx\"]"
        );
    }

    #[test]
    fn test_navigation_scope_does_not_change_query_shape() {
        let mut site = entry("site", 0.0);
        site.reference_kind = ReferenceKind::NavigationLink;
        site.target_ref = "siteNav:/sites/hub/News.aspx".to_string();

        let mut hub = site.clone();
        hub.id = "hub".to_string();
        hub.target_ref = "hubNav:/sites/hub/News.aspx".to_string();

        let specs = compile(&[site, hub]);
        assert_eq!(specs[0].lookup_query, specs[1].lookup_query);
    }

    #[test]
    fn test_unresolvable_entries_compile_to_empty_query() {
        let mut unknown = entry("unknown", 0.0);
        unknown.reference_kind = ReferenceKind::Unrecognized;

        let mut bare_url = entry("bare", 1.0);
        bare_url.reference_kind = ReferenceKind::NavigationLink;
        bare_url.target_ref = "/sites/x/Pages/Home.aspx".to_string();

        let mut blank = entry("blank", 2.0);
        blank.target_ref = String::new();

        let specs = compile(&[unknown, bare_url, blank]);
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().all(|s| !s.is_resolvable()));
    }

    #[test]
    fn test_malformed_kind_and_placement_keep_the_step() {
        let entries = parse_configuration(&json!([
            { "id": "null-kind", "enabled": true, "order": 1, "referenceKind": null, "targetRef": "x" },
            { "id": "num-kind", "enabled": true, "order": 2, "referenceKind": 3, "targetRef": "y" },
            { "id": "null-placement", "enabled": true, "order": 3, "referenceKind": "WidgetInstance", "targetRef": "z", "placement": null }
        ]))
        .unwrap();

        let specs = compile(&entries);

        assert_eq!(ids(&specs), vec!["null-kind", "num-kind", "null-placement"]);
        assert_eq!(specs[0].lookup_query, "");
        assert_eq!(specs[1].lookup_query, "");
        assert_eq!(specs[2].lookup_query, "[data-sp-feature-instance-id='z']");
        assert_eq!(specs[2].placement, Placement::Auto);
    }

    #[test]
    fn test_parse_configuration_rejects_non_list() {
        assert_eq!(
            parse_configuration(&json!({ "steps": [] })),
            Err(ConfigurationError::NotAList("an object"))
        );
        assert_eq!(
            parse_configuration(&Value::Null),
            Err(ConfigurationError::NotAList("null"))
        );
    }

    #[test]
    fn test_parse_configuration_skips_unreadable_items() {
        let entries = parse_configuration(&json!([
            { "id": "ok", "enabled": true, "referenceKind": "WidgetInstance", "targetRef": "x" },
            "not a step",
            { "id": "bad-text", "enabled": true, "text": 42 }
        ]))
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "ok");
    }
}
