//! Composite campaign identifier parsing.
//!
//! Identifiers join the campaign id with one or two categorical dimensions:
//! - `{campaign_id}_{target_event}` for the legacy scheme
//! - `{campaign_id}_{budget_group}_{target_event}` for the current scheme
//!
//! Only the leading underscores are separators, so target events such as
//! `omni_purchase` keep their own underscores.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierScheme {
    CampaignEvent,
    CampaignBudgetGroupEvent,
}

impl IdentifierScheme {
    fn part_count(self) -> usize {
        match self {
            Self::CampaignEvent => 2,
            Self::CampaignBudgetGroupEvent => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignKey {
    pub identifier: String,
    pub campaign_id: i64,
    pub budget_group: Option<String>,
    pub target_event: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("malformed identifier '{identifier}': expected {expected} '_'-separated parts")]
    Malformed { identifier: String, expected: usize },
    #[error("identifier '{identifier}' has non-integer campaign id '{value}'")]
    NonIntegerCampaignId { identifier: String, value: String },
}

pub fn parse_identifier(
    identifier: &str,
    scheme: IdentifierScheme,
) -> Result<CampaignKey, IdentifierError> {
    let expected = scheme.part_count();
    let parts: Vec<&str> = identifier.splitn(expected, '_').collect();
    if parts.len() != expected || parts.iter().any(|part| part.is_empty()) {
        return Err(IdentifierError::Malformed {
            identifier: identifier.to_string(),
            expected,
        });
    }

    let campaign_id = parse_campaign_id(parts[0]).ok_or_else(|| {
        IdentifierError::NonIntegerCampaignId {
            identifier: identifier.to_string(),
            value: parts[0].to_string(),
        }
    })?;

    let (budget_group, target_event) = match scheme {
        IdentifierScheme::CampaignEvent => (None, parts[1]),
        IdentifierScheme::CampaignBudgetGroupEvent => (Some(parts[1].to_string()), parts[2]),
    };

    Ok(CampaignKey {
        identifier: identifier.to_string(),
        campaign_id,
        budget_group,
        target_event: target_event.to_string(),
    })
}

// Float spellings such as "123.0" come from nullable integer columns.
fn parse_campaign_id(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(id) = trimmed.parse::<i64>() {
        return Some(id);
    }
    let as_float = trimmed.parse::<f64>().ok()?;
    if as_float.is_finite() && as_float.fract() == 0.0 && as_float.abs() < i64::MAX as f64 {
        Some(as_float as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_group_scheme_splits_on_first_two_underscores() {
        let key = parse_identifier("123_search_purchase", IdentifierScheme::CampaignBudgetGroupEvent)
            .expect("valid identifier");
        assert_eq!(key.campaign_id, 123);
        assert_eq!(key.budget_group.as_deref(), Some("search"));
        assert_eq!(key.target_event, "purchase");
    }

    #[test]
    fn event_keeps_trailing_underscores() {
        let key = parse_identifier(
            "77_cbo_action_omni_purchase",
            IdentifierScheme::CampaignBudgetGroupEvent,
        )
        .expect("valid identifier");
        assert_eq!(key.budget_group.as_deref(), Some("cbo"));
        assert_eq!(key.target_event, "action_omni_purchase");

        let legacy = parse_identifier("77_action_omni_purchase", IdentifierScheme::CampaignEvent)
            .expect("valid identifier");
        assert_eq!(legacy.campaign_id, 77);
        assert_eq!(legacy.budget_group, None);
        assert_eq!(legacy.target_event, "action_omni_purchase");
    }

    #[test]
    fn missing_parts_are_malformed() {
        let err = parse_identifier("123_purchase", IdentifierScheme::CampaignBudgetGroupEvent)
            .expect_err("two parts cannot satisfy the budget group scheme");
        assert_eq!(
            err,
            IdentifierError::Malformed {
                identifier: "123_purchase".to_string(),
                expected: 3
            }
        );

        assert!(parse_identifier("123", IdentifierScheme::CampaignEvent).is_err());
        assert!(parse_identifier("123__purchase", IdentifierScheme::CampaignBudgetGroupEvent).is_err());
    }

    #[test]
    fn campaign_id_must_be_integral() {
        let err = parse_identifier("abc_search_purchase", IdentifierScheme::CampaignBudgetGroupEvent)
            .expect_err("campaign id is not numeric");
        assert!(matches!(err, IdentifierError::NonIntegerCampaignId { value, .. } if value == "abc"));

        let key = parse_identifier("42.0_purchase", IdentifierScheme::CampaignEvent)
            .expect("float spelling of an integer is accepted");
        assert_eq!(key.campaign_id, 42);
        assert!(parse_identifier("42.5_purchase", IdentifierScheme::CampaignEvent).is_err());
    }
}
