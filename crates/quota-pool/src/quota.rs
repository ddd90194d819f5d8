//! Provider-documented quota costs and ceilings
//!
//! Video platform costs are points against a daily per-client budget.
//! Translation cost is the number of characters sent.

/// Daily quota of one video platform client.
pub const VIDEO_DAILY_CEILING: u64 = 10_000;

pub const SEARCH_LIST_COST: u64 = 100;
pub const VIDEOS_LIST_COST: u64 = 1;
pub const VIDEOS_UPDATE_COST: u64 = 50;
pub const CAPTIONS_LIST_COST: u64 = 50;
pub const CAPTIONS_DOWNLOAD_COST: u64 = 200;
pub const CAPTIONS_INSERT_COST: u64 = 400;

/// Listing supported languages is free but still needs a key.
pub const TRANSLATION_LANGUAGES_COST: u64 = 0;

/// Cost of translating `texts`: total characters.
pub fn translation_cost(texts: &[String]) -> u64 {
    texts.iter().map(|t| t.chars().count() as u64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_cost_counts_characters_not_bytes() {
        let texts = vec!["Hello".to_string(), "Grüße".to_string(), String::new()];
        assert_eq!(translation_cost(&texts), 10);
    }

    #[test]
    fn full_run_fits_daily_budget_for_a_few_languages() {
        let fixed = VIDEOS_LIST_COST + CAPTIONS_LIST_COST + CAPTIONS_DOWNLOAD_COST + VIDEOS_UPDATE_COST;
        let per_language = CAPTIONS_INSERT_COST;
        assert!(fixed + 20 * per_language <= VIDEO_DAILY_CEILING);
        assert!(fixed + 25 * per_language > VIDEO_DAILY_CEILING);
    }
}
