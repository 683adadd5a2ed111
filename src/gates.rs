//! Per-series diagnostic gates.
//!
//! Every gate is evaluated for every reconstructed series and its outcome is
//! logged. A gate only removes a series from the results when its action is
//! `GateAction::Exclude`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::change_detector::{has_spend_changed_at, ChangeVerdict};
use crate::config::{BacktestConfig, GateAction};
use crate::reconstruct::ReconstructedSeries;
use crate::tables::TrainMembership;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateCheck {
    Pass,
    Flagged(String),
    Indeterminate(String),
}

pub trait DiagnosticGate {
    fn name(&self) -> &'static str;
    fn action(&self) -> GateAction;
    fn check(&self, series: &ReconstructedSeries) -> GateCheck;
}

#[derive(Debug, Clone, Copy)]
pub struct MinLengthGate {
    pub min_rows: usize,
    pub action: GateAction,
}

impl DiagnosticGate for MinLengthGate {
    fn name(&self) -> &'static str {
        "min_length"
    }

    fn action(&self) -> GateAction {
        self.action
    }

    fn check(&self, series: &ReconstructedSeries) -> GateCheck {
        if series.rows.len() < self.min_rows {
            GateCheck::Flagged(format!(
                "{} rows < {} required",
                series.rows.len(),
                self.min_rows
            ))
        } else {
            GateCheck::Pass
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SpendChangeGate {
    pub alpha: f64,
    pub action: GateAction,
}

impl DiagnosticGate for SpendChangeGate {
    fn name(&self) -> &'static str {
        "spend_change"
    }

    fn action(&self) -> GateAction {
        self.action
    }

    fn check(&self, series: &ReconstructedSeries) -> GateCheck {
        let before = series.historical_spend();
        let after = series.forecast_spend();
        match has_spend_changed_at(&before, &after, self.alpha) {
            ChangeVerdict::Changed => GateCheck::Flagged(format!(
                "spend mean changed at alpha={} (before n={}, after n={})",
                self.alpha,
                before.len(),
                after.len()
            )),
            ChangeVerdict::Unchanged => GateCheck::Pass,
            ChangeVerdict::Indeterminate => GateCheck::Indeterminate(format!(
                "cannot test spend change (before n={}, after n={})",
                before.len(),
                after.len()
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TargetSumGate {
    pub min_total: f64,
    pub action: GateAction,
}

impl DiagnosticGate for TargetSumGate {
    fn name(&self) -> &'static str {
        "target_sum"
    }

    fn action(&self) -> GateAction {
        self.action
    }

    fn check(&self, series: &ReconstructedSeries) -> GateCheck {
        let total = series.target_sum();
        if total < self.min_total {
            GateCheck::Flagged(format!("target sum {total} < {}", self.min_total))
        } else {
            GateCheck::Pass
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrainMembershipGate<'a> {
    pub membership: &'a TrainMembership,
    pub action: GateAction,
}

impl DiagnosticGate for TrainMembershipGate<'_> {
    fn name(&self) -> &'static str {
        "train_membership"
    }

    fn action(&self) -> GateAction {
        self.action
    }

    fn check(&self, series: &ReconstructedSeries) -> GateCheck {
        if self.membership.campaign_count() == 0 {
            return GateCheck::Indeterminate("no training split loaded".to_string());
        }
        if self.membership.contains_campaign(series.key.campaign_id) {
            GateCheck::Pass
        } else {
            GateCheck::Flagged(format!(
                "campaign {} not in training split",
                series.key.campaign_id
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateFlag {
    pub gate: String,
    pub action: GateAction,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub flags: Vec<GateFlag>,
    pub excluded: bool,
}

pub struct GateSet<'a> {
    gates: Vec<Box<dyn DiagnosticGate + 'a>>,
}

impl<'a> GateSet<'a> {
    pub fn new(gates: Vec<Box<dyn DiagnosticGate + 'a>>) -> Self {
        Self { gates }
    }

    pub fn from_config(config: &BacktestConfig, membership: &'a TrainMembership) -> Self {
        let policy = config.gates;
        let gates: Vec<Box<dyn DiagnosticGate + 'a>> = vec![
            Box::new(MinLengthGate {
                min_rows: config.total_steps,
                action: policy.min_length,
            }),
            Box::new(SpendChangeGate {
                alpha: config.change_alpha,
                action: policy.spend_change,
            }),
            Box::new(TargetSumGate {
                min_total: config.total_steps as f64,
                action: policy.target_sum,
            }),
            Box::new(TrainMembershipGate {
                membership,
                action: policy.train_membership,
            }),
        ];
        Self::new(gates)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    pub fn evaluate(&self, series: &ReconstructedSeries) -> GateReport {
        let mut report = GateReport::default();

        for gate in &self.gates {
            match gate.check(series) {
                GateCheck::Pass => {}
                GateCheck::Indeterminate(detail) => {
                    debug!(
                        component = "gates",
                        event = "gates.indeterminate",
                        gate = gate.name(),
                        identifier = %series.key.identifier,
                        forecast_date = %series.forecast_date,
                        detail = %detail
                    );
                }
                GateCheck::Flagged(detail) => {
                    debug!(
                        component = "gates",
                        event = "gates.flagged",
                        gate = gate.name(),
                        action = ?gate.action(),
                        identifier = %series.key.identifier,
                        forecast_date = %series.forecast_date,
                        detail = %detail
                    );
                    if gate.action() == GateAction::Exclude {
                        report.excluded = true;
                    }
                    report.flags.push(GateFlag {
                        gate: gate.name().to_string(),
                        action: gate.action(),
                        detail,
                    });
                }
            }
        }

        if report.excluded {
            info!(
                component = "gates",
                event = "gates.series_excluded",
                identifier = %series.key.identifier,
                forecast_date = %series.forecast_date,
                flags = report.flags.len()
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentName;
    use crate::identifier::{parse_identifier, IdentifierScheme};
    use crate::reconstruct::SeriesRow;
    use crate::tables::TrainMembershipRow;
    use chrono::NaiveDate;

    fn series(spend: &[(i64, f64)], target: f64) -> ReconstructedSeries {
        let key = parse_identifier("3_search_purchase", IdentifierScheme::CampaignBudgetGroupEvent)
            .expect("valid identifier");
        let start = NaiveDate::from_ymd_opt(2021, 2, 1).expect("valid date");
        let rows = spend
            .iter()
            .zip(start.iter_days())
            .map(|((horizon, spend), date)| SeriesRow {
                identifier: key.identifier.clone(),
                campaign_id: key.campaign_id,
                date,
                horizon: *horizon,
                budget: None,
                budget_type: None,
                spend: Some(*spend),
                target: Some(target),
                forecast: Some(target),
                pacing: None,
                y_true: Some(target),
                y_pred: Some(target),
                y_pred_benchmark: Some(target),
            })
            .collect();
        ReconstructedSeries {
            key,
            forecast_date: start,
            rows,
        }
    }

    #[test]
    fn log_only_gates_flag_but_never_exclude() {
        let config = BacktestConfig::for_experiment(ExperimentName::Cg, ".");
        let membership = TrainMembership::default();
        let gates = GateSet::from_config(&config, &membership);
        assert_eq!(gates.len(), 4);

        let short = series(&[(-1, 1.0), (-1, 1.2), (0, 50.0), (1, 52.0)], 0.5);
        let report = gates.evaluate(&short);

        let names: Vec<&str> = report.flags.iter().map(|flag| flag.gate.as_str()).collect();
        assert_eq!(names, vec!["min_length", "spend_change", "target_sum"]);
        assert!(!report.excluded);
    }

    #[test]
    fn exclude_action_marks_series() {
        let mut config = BacktestConfig::for_experiment(ExperimentName::Cg, ".");
        config.gates.min_length = GateAction::Exclude;
        let membership = TrainMembership::default();
        let gates = GateSet::from_config(&config, &membership);

        let short = series(&[(-1, 1.0), (0, 1.0)], 20.0);
        assert!(gates.evaluate(&short).excluded);

        let full: Vec<(i64, f64)> = (-7..7).map(|h| (h, 10.0)).collect();
        assert!(!gates.evaluate(&series(&full, 20.0)).excluded);
    }

    #[test]
    fn train_membership_gate_checks_campaign() {
        let membership = TrainMembership::from_rows(&[TrainMembershipRow {
            campaign_id: 4,
            date: NaiveDate::from_ymd_opt(2021, 1, 1).expect("valid date"),
        }]);
        let gate = TrainMembershipGate {
            membership: &membership,
            action: GateAction::LogOnly,
        };
        assert!(matches!(
            gate.check(&series(&[(-1, 1.0)], 1.0)),
            GateCheck::Flagged(_)
        ));

        let empty = TrainMembership::default();
        let gate = TrainMembershipGate {
            membership: &empty,
            action: GateAction::LogOnly,
        };
        assert!(matches!(
            gate.check(&series(&[(-1, 1.0)], 1.0)),
            GateCheck::Indeterminate(_)
        ));
    }

    #[test]
    fn custom_gate_plugs_into_set() {
        struct AlwaysExclude;
        impl DiagnosticGate for AlwaysExclude {
            fn name(&self) -> &'static str {
                "always"
            }
            fn action(&self) -> GateAction {
                GateAction::Exclude
            }
            fn check(&self, _series: &ReconstructedSeries) -> GateCheck {
                GateCheck::Flagged("always".to_string())
            }
        }

        let boxed: Vec<Box<dyn DiagnosticGate>> = vec![Box::new(AlwaysExclude)];
        let gates = GateSet::new(boxed);
        let report = gates.evaluate(&series(&[(-1, 1.0)], 1.0));
        assert!(report.excluded);
        assert_eq!(report.flags.len(), 1);
    }
}
