//! Filter engine: conjunctive predicates over the dataset, a sampling cap and
//! a completeness pass for map display.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data::{Dataset, FilterBounds, University};

/// Upper bound on records handed to the map.
pub const MAX_RESULTS: usize = 300;
pub const ALL_STATES: &str = "All";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StateSelection {
    All,
    Only(String),
}

impl StateSelection {
    pub fn selected(&self) -> Option<&str> {
        match self {
            StateSelection::All => None,
            StateSelection::Only(state) => Some(state),
        }
    }

    /// Exact, case-sensitive comparison. An absent state only passes `All`.
    pub fn matches(&self, state: Option<&str>) -> bool {
        match self {
            StateSelection::All => true,
            StateSelection::Only(wanted) => state == Some(wanted.as_str()),
        }
    }
}

impl From<String> for StateSelection {
    fn from(value: String) -> Self {
        if value == ALL_STATES {
            StateSelection::All
        } else {
            StateSelection::Only(value)
        }
    }
}

impl From<StateSelection> for String {
    fn from(value: StateSelection) -> Self {
        match value {
            StateSelection::All => ALL_STATES.to_string(),
            StateSelection::Only(state) => state,
        }
    }
}

/// Inclusive enrollment range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: u64,
    pub max: u64,
}

impl SizeRange {
    pub fn contains(&self, size: Option<f64>) -> bool {
        match size {
            Some(s) => s >= self.min as f64 && s <= self.max as f64,
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub state: StateSelection,
    #[serde(default)]
    pub keyword: String,
    pub size: SizeRange,
    pub max_total_cost: f64,
}

impl FilterCriteria {
    /// Initial form selection: every state, no keyword, full size range,
    /// default budget.
    pub fn defaults(bounds: &FilterBounds) -> Self {
        Self {
            state: StateSelection::All,
            keyword: String::new(),
            size: SizeRange {
                min: bounds.size_min,
                max: bounds.size_max,
            },
            max_total_cost: bounds.budget_default as f64,
        }
    }

    pub fn matches(&self, uni: &University) -> bool {
        Predicate::new(self).matches(uni)
    }
}

struct Predicate<'c> {
    criteria: &'c FilterCriteria,
    keyword: Option<String>,
}

impl<'c> Predicate<'c> {
    fn new(criteria: &'c FilterCriteria) -> Self {
        let keyword = if criteria.keyword.is_empty() {
            None
        } else {
            Some(criteria.keyword.to_lowercase())
        };
        Self { criteria, keyword }
    }

    fn matches(&self, uni: &University) -> bool {
        let within_budget = uni
            .total_estimated_cost()
            .map_or(false, |cost| cost <= self.criteria.max_total_cost);
        if !within_budget {
            return false;
        }
        if !self.criteria.state.matches(uni.state.as_deref()) {
            return false;
        }
        if let Some(keyword) = &self.keyword {
            let hit = uni
                .program_code
                .as_deref()
                .map_or(false, |code| code.to_lowercase().contains(keyword.as_str()));
            if !hit {
                return false;
            }
        }
        self.criteria.size.contains(uni.enrollment)
    }
}

/// Records shown for one filter submission.
#[derive(Debug, Clone)]
pub struct ResultSet<'a> {
    records: Vec<&'a University>,
    eligible: usize,
    sampled: bool,
}

impl<'a> ResultSet<'a> {
    pub fn records(&self) -> &[&'a University] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows that passed every predicate, before sampling.
    pub fn eligible_count(&self) -> usize {
        self.eligible
    }

    pub fn was_sampled(&self) -> bool {
        self.sampled
    }
}

/// Every record passing all predicates, in table order.
pub fn eligible<'a>(records: &'a [University], criteria: &FilterCriteria) -> Vec<&'a University> {
    let predicate = Predicate::new(criteria);
    records.iter().filter(|u| predicate.matches(u)).collect()
}

/// Filter, cap at [`MAX_RESULTS`] by uniform sampling, then drop records that
/// cannot be placed on the map.
pub fn apply<'a, R: Rng + ?Sized>(
    records: &'a [University],
    criteria: &FilterCriteria,
    rng: &mut R,
) -> ResultSet<'a> {
    let eligible = eligible(records, criteria);
    let eligible_count = eligible.len();
    let sampled = eligible_count > MAX_RESULTS;
    let capped: Vec<&University> = if sampled {
        eligible.choose_multiple(rng, MAX_RESULTS).copied().collect()
    } else {
        eligible
    };

    ResultSet {
        records: capped.into_iter().filter(|u| u.is_mappable()).collect(),
        eligible: eligible_count,
        sampled,
    }
}

pub fn apply_filters<'a>(dataset: &'a Dataset, criteria: &FilterCriteria) -> ResultSet<'a> {
    apply(dataset.records(), criteria, &mut rand::thread_rng())
}
