//! Tour step model.
//!
//! Authors configure a list of [`StepConfigEntry`] records. The compiler turns
//! that list into ordered [`StepSpec`]s, each carrying the lookup query the
//! readiness scheduler probes the page with.

mod compiler;

use serde::{Deserialize, Deserializer, Serialize};

pub use compiler::{
    compile, navigation_query, parse_configuration, widget_query, ConfigurationError,
    WIDGET_INSTANCE_ATTRIBUTE,
};

/// Where the tooltip is placed relative to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Placement {
    Top,
    Right,
    Bottom,
    Left,
    #[default]
    Auto,
}

impl Placement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Placement::Top => "top",
            Placement::Right => "right",
            Placement::Bottom => "bottom",
            Placement::Left => "left",
            Placement::Auto => "auto",
        }
    }

    /// Parse a placement hint; anything unrecognized falls back to `Auto`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "top" => Placement::Top,
            "right" => Placement::Right,
            "bottom" => Placement::Bottom,
            "left" => Placement::Left,
            _ => Placement::Auto,
        }
    }
}

impl From<String> for Placement {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Placement> for String {
    fn from(value: Placement) -> Self {
        value.as_str().to_string()
    }
}

/// What kind of page element a step's `target_ref` names.
///
/// Decided when the step is authored; the compiler never guesses it from the
/// shape of the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReferenceKind {
    /// A widget instance on the page, referenced by its instance id
    WidgetInstance,
    /// A navigation link, referenced as `<scope>:<url>`
    NavigationLink,
    /// Missing or unknown kind; compiles to an unresolvable step
    #[default]
    Unrecognized,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::WidgetInstance => "WidgetInstance",
            ReferenceKind::NavigationLink => "NavigationLink",
            ReferenceKind::Unrecognized => "Unrecognized",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "widgetinstance" | "webpart" => ReferenceKind::WidgetInstance,
            "navigationlink" | "navigation" => ReferenceKind::NavigationLink,
            _ => ReferenceKind::Unrecognized,
        }
    }
}

impl From<String> for ReferenceKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<ReferenceKind> for String {
    fn from(value: ReferenceKind) -> Self {
        value.as_str().to_string()
    }
}

/// Navigation menu a link reference belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NavigationScope {
    Site,
    Hub,
}

impl NavigationScope {
    /// Prefix used in composite navigation references
    pub fn prefix(&self) -> &'static str {
        match self {
            NavigationScope::Site => "siteNav",
            NavigationScope::Hub => "hubNav",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        [NavigationScope::Site, NavigationScope::Hub]
            .into_iter()
            .find(|scope| scope.prefix() == prefix)
    }
}

/// A parsed `<scope>:<url>` navigation reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRef {
    pub scope: NavigationScope,
    pub url: String,
}

/// Separator between the scope prefix and the URL
pub const NAVIGATION_DELIMITER: char = ':';

impl NavigationRef {
    /// Parse a composite navigation reference.
    ///
    /// Splits on the first delimiter only, so URLs carrying a scheme or port
    /// stay intact. Returns `None` for an unknown scope or an empty URL.
    pub fn parse(target_ref: &str) -> Option<Self> {
        let (prefix, url) = target_ref.split_once(NAVIGATION_DELIMITER)?;
        let scope = NavigationScope::from_prefix(prefix.trim())?;
        let url = url.trim();
        if url.is_empty() {
            return None;
        }
        Some(Self {
            scope,
            url: url.to_string(),
        })
    }
}

/// One authored tour step, as stored by the hosting widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfigEntry {
    /// Stable identity used for list rendering
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
    /// Sort key; numbers or numeric strings, anything else reads as 0
    #[serde(default, deserialize_with = "lenient_order")]
    pub order: f64,
    #[serde(default)]
    pub target_ref: String,
    /// Non-string or unknown kinds read as `Unrecognized`
    #[serde(default, deserialize_with = "lenient_reference_kind")]
    pub reference_kind: ReferenceKind,
    #[serde(default)]
    pub text: String,
    /// Non-string or unknown placements read as `Auto`
    #[serde(default, deserialize_with = "lenient_placement")]
    pub placement: Placement,
}

impl StepConfigEntry {
    /// Order used for sorting, with NaN read as 0
    pub fn effective_order(&self) -> f64 {
        if self.order.is_nan() {
            0.0
        } else {
            self.order
        }
    }
}

fn lenient_order<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let order = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Some(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(order.filter(|o| !o.is_nan()).unwrap_or(0.0))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn lenient_reference_kind<'de, D>(deserializer: D) -> Result<ReferenceKind, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?
        .map(|s| ReferenceKind::parse(&s))
        .unwrap_or_default())
}

fn lenient_placement<'de, D>(deserializer: D) -> Result<Placement, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?
        .map(|s| Placement::parse(&s))
        .unwrap_or_default())
}

/// A compiled step: what to look for on the page and what to say about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Selector for the target; empty when the entry could not be resolved
    pub lookup_query: String,
    pub text: String,
    pub placement: Placement,
    pub source_id: String,
}

impl StepSpec {
    /// Whether the step has a query that can ever match
    pub fn is_resolvable(&self) -> bool {
        !self.lookup_query.is_empty()
    }
}
