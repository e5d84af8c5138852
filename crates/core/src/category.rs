//! Notification categories and their per-category fanout policies.
//!
//! A *category* is one kind of platform notification (MSP price digest,
//! weather alert, ...). Each category carries an explicit fanout policy
//! that decides how a user's preferred channel list is interpreted. The
//! policy is fixed per category; a per-user override is a documented
//! extension point and deliberately not implemented here.

use serde::Serialize;

/// Daily minimum-support-price digest for subscribed crops.
pub const CATEGORY_MSP_UPDATES: &str = "msp_updates";

/// Severe weather alerts for the user's district.
pub const CATEGORY_WEATHER_ALERTS: &str = "weather_alerts";

/// Government scheme announcements and deadline reminders.
pub const CATEGORY_SCHEME_NOTIFICATIONS: &str = "scheme_notifications";

/// Mandi price movement alerts for watched commodities.
pub const CATEGORY_MARKET_ALERTS: &str = "market_alerts";

/// Every category the pipeline knows about, in display order.
pub const ALL_CATEGORIES: [&str; 4] = [
    CATEGORY_MSP_UPDATES,
    CATEGORY_WEATHER_ALERTS,
    CATEGORY_SCHEME_NOTIFICATIONS,
    CATEGORY_MARKET_ALERTS,
];

// ---------------------------------------------------------------------------
// Fanout policy
// ---------------------------------------------------------------------------

/// How a campaign expands a user's preferred channel list into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutPolicy {
    /// Try channels in preference order; stop at the first that delivers.
    /// One record per user; the record's channel advances on permanent
    /// per-channel failure.
    FirstAvailable,
    /// Deliver on every preferred channel independently. One record per
    /// (user, channel), no cross-channel coupling.
    AllChannels,
}

/// Fanout policy for a category.
///
/// Unknown categories (e.g. future ad-hoc broadcasts) default to
/// [`FanoutPolicy::FirstAvailable`], the cheaper of the two.
pub fn fanout_policy(category: &str) -> FanoutPolicy {
    match category {
        CATEGORY_SCHEME_NOTIFICATIONS => FanoutPolicy::AllChannels,
        CATEGORY_MSP_UPDATES | CATEGORY_WEATHER_ALERTS | CATEGORY_MARKET_ALERTS => {
            FanoutPolicy::FirstAvailable
        }
        _ => FanoutPolicy::FirstAvailable,
    }
}

/// Whether `category` is one the pipeline recognises.
pub fn is_known_category(category: &str) -> bool {
    ALL_CATEGORIES.contains(&category)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_notices_fan_out_to_all_channels() {
        assert_eq!(
            fanout_policy(CATEGORY_SCHEME_NOTIFICATIONS),
            FanoutPolicy::AllChannels
        );
    }

    #[test]
    fn price_and_weather_use_first_available() {
        for cat in [
            CATEGORY_MSP_UPDATES,
            CATEGORY_WEATHER_ALERTS,
            CATEGORY_MARKET_ALERTS,
        ] {
            assert_eq!(fanout_policy(cat), FanoutPolicy::FirstAvailable);
        }
    }

    #[test]
    fn unknown_category_defaults_to_first_available() {
        assert_eq!(fanout_policy("beekeeping_tips"), FanoutPolicy::FirstAvailable);
    }

    #[test]
    fn all_categories_are_known() {
        for cat in ALL_CATEGORIES {
            assert!(is_known_category(cat));
        }
        assert!(!is_known_category("nope"));
    }
}
