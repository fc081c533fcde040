//! Tour widget controller.
//!
//! Owns one widget instance's readiness scheduler and publishes the committed
//! [`TourState`] whenever a configuration change settles. Only the most
//! recently started cycle commits.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::lookup::{DomLookup, ElementHandle};
use crate::readiness::{
    CycleToken, ReadinessError, ReadinessPolicy, ReadinessScheduler, ResolvedStep, Settlement,
};
use crate::steps::{compile, parse_configuration, Placement};

/// What the presentation layer sees
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TourState {
    pub steps: Vec<ResolvedStep>,
    /// Whether the tour entry point is disabled
    pub tour_disabled: bool,
}

impl Default for TourState {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            tour_disabled: true,
        }
    }
}

/// Where a tour stop points
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum TourTarget {
    /// The element was located when the tour opened
    Element(ElementHandle),
    /// Not located; the presentation engine gets the raw query
    Query(String),
}

/// One stop handed to the presentation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TourStop {
    pub target: TourTarget,
    pub text: String,
    pub placement: Placement,
}

/// A tour widget instance
pub struct TourWidget {
    scheduler: ReadinessScheduler,
    state: watch::Sender<TourState>,
    /// Last configuration accepted for resolution
    last_configuration: Mutex<Option<Value>>,
}

impl TourWidget {
    pub fn new(lookup: Arc<dyn DomLookup>, policy: ReadinessPolicy) -> Self {
        let (state, _) = watch::channel(TourState::default());
        Self {
            scheduler: ReadinessScheduler::new(lookup, policy),
            state,
            last_configuration: Mutex::new(None),
        }
    }

    /// Current committed state
    pub fn state(&self) -> TourState {
        self.state.borrow().clone()
    }

    /// Receive every committed state
    pub fn subscribe(&self) -> watch::Receiver<TourState> {
        self.state.subscribe()
    }

    pub fn scheduler(&self) -> &ReadinessScheduler {
        &self.scheduler
    }

    /// Apply a configuration from the host.
    ///
    /// Returns the settlement when this call committed a new state, `None` when
    /// the configuration was unchanged or unusable, and `Superseded` when a
    /// newer configuration arrived before this one settled.
    pub async fn configure(
        &self,
        configuration: &Value,
    ) -> Result<Option<Settlement>, ReadinessError> {
        let entries = match parse_configuration(configuration) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Disabling tour");
                self.scheduler.cancel();
                *self.last_accepted() = None;
                self.state.send_replace(TourState::default());
                return Ok(None);
            }
        };

        {
            let mut last = self.last_accepted();
            if last.as_ref() == Some(configuration) {
                debug!("Tour configuration unchanged");
                return Ok(None);
            }
            *last = Some(configuration.clone());
        }

        let specs = compile(&entries);
        debug!(
            entries = entries.len(),
            steps = specs.len(),
            "Compiled tour steps"
        );

        let token = self.scheduler.begin_cycle();
        let settlement = self.scheduler.run_cycle(token, &specs).await?;
        self.commit(token, &settlement)?;
        Ok(Some(settlement))
    }

    fn commit(&self, token: CycleToken, settlement: &Settlement) -> Result<(), ReadinessError> {
        if !self.scheduler.is_current(token) {
            return Err(ReadinessError::Superseded {
                cycle: token.id(),
                current: self.scheduler.current_cycle(),
            });
        }

        let tour_disabled = !settlement.tour_enabled();
        if tour_disabled {
            warn!("No tour step targets found, disabling tour");
        } else {
            info!(
                steps = settlement.steps.len(),
                found = settlement.found_count(),
                "Tour ready"
            );
        }

        self.state.send_replace(TourState {
            steps: settlement.steps.clone(),
            tour_disabled,
        });
        Ok(())
    }

    /// Build the stops for the presentation engine from the committed state
    pub fn open_tour(&self) -> Vec<TourStop> {
        let state = self.state();
        if state.tour_disabled || state.steps.is_empty() {
            warn!("No tour steps available, not opening tour");
            return Vec::new();
        }

        let lookup = self.scheduler.lookup();
        state
            .steps
            .into_iter()
            .map(|step| {
                let target = if step.lookup_query.is_empty() {
                    TourTarget::Query(step.lookup_query)
                } else {
                    match lookup.find(&step.lookup_query) {
                        Ok(Some(element)) => TourTarget::Element(element),
                        Ok(None) => TourTarget::Query(step.lookup_query),
                        Err(e) => {
                            debug!(query = %step.lookup_query, error = %e, "Target lookup failed");
                            TourTarget::Query(step.lookup_query)
                        }
                    }
                };
                TourStop {
                    target,
                    text: step.text,
                    placement: step.placement,
                }
            })
            .collect()
    }

    /// The host is going away; stop any cycle in flight
    pub fn unmount(&self) {
        self.scheduler.cancel();
        *self.last_accepted() = None;
    }

    fn last_accepted(&self) -> std::sync::MutexGuard<'_, Option<Value>> {
        self.last_configuration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::MockLookup;
    use serde_json::json;
    use std::time::Duration;

    const HERO: &str = "[data-sp-feature-instance-id='hero']";
    const NEWS: &str = "[data-sp-feature-instance-id='news']";

    fn widget(mock: &MockLookup, delay_ms: u64) -> TourWidget {
        TourWidget::new(
            Arc::new(mock.clone()),
            ReadinessPolicy::new(5, Duration::from_millis(delay_ms)),
        )
    }

    fn step(id: &str, order: i64) -> Value {
        json!({
            "id": id,
            "enabled": true,
            "order": order,
            "referenceKind": "WidgetInstance",
            "targetRef": id,
            "text": format!("This is {id}"),
        })
    }

    #[test]
    fn test_initial_state_is_disabled() {
        let widget = widget(&MockLookup::new(), 5);
        assert_eq!(widget.state(), TourState::default());
        assert!(widget.open_tour().is_empty());
    }

    #[tokio::test]
    async fn test_configure_commits_resolved_steps() {
        let mock = MockLookup::with_present([HERO, NEWS]);
        let widget = widget(&mock, 5);

        let settlement = widget
            .configure(&json!([step("news", 2), step("hero", 1)]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(settlement.attempts, 1);
        let state = widget.state();
        assert!(!state.tour_disabled);
        let ids: Vec<_> = state.steps.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(ids, vec!["hero", "news"]);
    }

    #[tokio::test]
    async fn test_non_list_configuration_disables_tour() {
        let mock = MockLookup::with_present([HERO]);
        let widget = widget(&mock, 5);
        widget.configure(&json!([step("hero", 1)])).await.unwrap();
        assert!(!widget.state().tour_disabled);

        let result = widget.configure(&json!("oops")).await.unwrap();

        assert!(result.is_none());
        assert_eq!(widget.state(), TourState::default());
    }

    #[tokio::test]
    async fn test_all_missing_disables_tour() {
        let mock = MockLookup::new();
        let widget = widget(&mock, 1);

        let settlement = widget
            .configure(&json!([step("hero", 1)]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(settlement.attempts, 5);
        let state = widget.state();
        assert!(state.tour_disabled);
        assert_eq!(state.steps.len(), 1);
        assert!(!state.steps[0].target_found);
    }

    #[tokio::test]
    async fn test_malformed_kind_settles_as_not_found() {
        let mock = MockLookup::with_present([HERO]);
        let widget = widget(&mock, 1);

        let settlement = widget
            .configure(&json!([
                step("hero", 1),
                { "id": "null-kind", "enabled": true, "order": 2, "referenceKind": null, "targetRef": "news" },
                { "id": "num-kind", "enabled": true, "order": 3, "referenceKind": 3, "targetRef": "news" }
            ]))
            .await
            .unwrap()
            .unwrap();

        let state = widget.state();
        assert!(!state.tour_disabled);
        let found: Vec<_> = state
            .steps
            .iter()
            .map(|s| (s.source_id.as_str(), s.target_found))
            .collect();
        assert_eq!(
            found,
            vec![("hero", true), ("null-kind", false), ("num-kind", false)]
        );
        assert_eq!(settlement.attempts, 5);
        // Unresolvable steps never reach the page lookup
        assert_eq!(mock.calls().len(), mock.check_count(HERO));
    }

    #[tokio::test]
    async fn test_empty_configuration_disables_tour() {
        let widget = widget(&MockLookup::new(), 5);
        let settlement = widget.configure(&json!([])).await.unwrap().unwrap();
        assert!(settlement.steps.is_empty());
        assert!(widget.state().tour_disabled);
    }

    #[tokio::test]
    async fn test_unchanged_configuration_is_skipped() {
        let mock = MockLookup::with_present([HERO]);
        let widget = widget(&mock, 5);
        let configuration = json!([step("hero", 1)]);

        assert!(widget.configure(&configuration).await.unwrap().is_some());
        assert!(widget.configure(&configuration).await.unwrap().is_none());
        assert_eq!(mock.check_count(HERO), 1);
    }

    #[tokio::test]
    async fn test_superseded_configuration_never_commits() {
        let mock = MockLookup::with_present([NEWS]);
        let widget = Arc::new(widget(&mock, 200));
        let mut updates = widget.subscribe();

        let first = {
            let widget = widget.clone();
            tokio::spawn(async move { widget.configure(&json!([step("hero", 1)])).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        widget
            .configure(&json!([step("news", 1)]))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            first.await.unwrap(),
            Err(ReadinessError::Superseded { .. })
        ));

        let state = widget.state();
        assert_eq!(state.steps.len(), 1);
        assert_eq!(state.steps[0].source_id, "news");

        // Exactly one commit reached subscribers
        assert!(updates.has_changed().unwrap());
        let _ = updates.borrow_and_update();
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_open_tour_falls_back_to_query_for_missing_targets() {
        let mock = MockLookup::with_present([HERO]);
        let widget = widget(&mock, 1);
        widget
            .configure(&json!([step("hero", 1), step("news", 2)]))
            .await
            .unwrap();

        let stops = widget.open_tour();

        assert_eq!(stops.len(), 2);
        assert!(matches!(stops[0].target, TourTarget::Element(_)));
        assert_eq!(stops[1].target, TourTarget::Query(NEWS.to_string()));
        assert_eq!(stops[1].text, "This is news");
    }

    #[tokio::test]
    async fn test_unmount_cancels_and_forgets_configuration() {
        let mock = MockLookup::new();
        let widget = Arc::new(widget(&mock, 200));
        let configuration = json!([step("hero", 1)]);

        let pending = {
            let widget = widget.clone();
            let configuration = configuration.clone();
            tokio::spawn(async move { widget.configure(&configuration).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        widget.unmount();

        assert!(pending.await.unwrap().is_err());
        assert!(widget.state().tour_disabled);

        // Remounting with the same configuration resolves again
        mock.add_present(HERO);
        let settlement = widget.configure(&configuration).await.unwrap();
        assert!(settlement.is_some());
        assert!(!widget.state().tour_disabled);
    }
}
