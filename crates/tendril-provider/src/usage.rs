//! Token usage and cost accounting.

use crate::model::ModelTier;
use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// USD per million tokens at the Sonnet base rate.
pub const BASE_RATE_PER_MILLION: f64 = 3.0;

const INPUT_MULTIPLIER: f64 = 1.0;
const CACHE_WRITE_MULTIPLIER: f64 = 1.25;
const CACHE_READ_MULTIPLIER: f64 = 0.1;
const OUTPUT_MULTIPLIER: f64 = 5.0;

/// Raw usage counts as reported by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenCounts {
    /// Create counts with input and output tokens only.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }
}

/// Which model(s) an account was accrued on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTag {
    #[default]
    Sonnet,
    Opus,
    /// Accrued on more than one model. Cost is still exact.
    Mixed,
}

impl From<ModelTier> for ModelTag {
    fn from(tier: ModelTier) -> Self {
        match tier {
            ModelTier::Sonnet => ModelTag::Sonnet,
            ModelTier::Opus => ModelTag::Opus,
        }
    }
}

impl ModelTag {
    fn join(self, other: ModelTag) -> ModelTag {
        if self == other {
            self
        } else {
            ModelTag::Mixed
        }
    }
}

/// Accumulated token counts and dollar cost.
///
/// Addition is associative and commutative. An empty account is the
/// identity: its model tag never turns a single-model total into `mixed`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct UsageAccount {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_write_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost: f64,
    pub model: ModelTag,
}

impl UsageAccount {
    /// The zero account.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Price a set of counts for the model that served them.
    pub fn from_counts(counts: &TokenCounts, model: ModelTier) -> Self {
        let rate = BASE_RATE_PER_MILLION * model.price_multiplier() / 1_000_000.0;
        let cost = rate
            * (counts.input_tokens as f64 * INPUT_MULTIPLIER
                + counts.cache_creation_input_tokens as f64 * CACHE_WRITE_MULTIPLIER
                + counts.cache_read_input_tokens as f64 * CACHE_READ_MULTIPLIER
                + counts.output_tokens as f64 * OUTPUT_MULTIPLIER);

        Self {
            input_tokens: counts.input_tokens,
            output_tokens: counts.output_tokens,
            cache_write_tokens: counts.cache_creation_input_tokens,
            cache_read_tokens: counts.cache_read_input_tokens,
            cost,
            model: model.into(),
        }
    }

    /// Whether nothing has been accrued.
    pub fn is_empty(&self) -> bool {
        self.total_tokens() == 0 && self.cost == 0.0
    }

    /// All tokens across the four counters.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_write_tokens + self.cache_read_tokens
    }

    fn combined_tag(&self, other: &UsageAccount) -> ModelTag {
        match (self.is_empty(), other.is_empty()) {
            (true, false) => other.model,
            (false, true) => self.model,
            _ => self.model.join(other.model),
        }
    }
}

impl Add for UsageAccount {
    type Output = UsageAccount;

    fn add(self, other: UsageAccount) -> UsageAccount {
        UsageAccount {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_write_tokens: self.cache_write_tokens + other.cache_write_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
            cost: self.cost + other.cost,
            model: self.combined_tag(&other),
        }
    }
}

impl AddAssign for UsageAccount {
    fn add_assign(&mut self, other: UsageAccount) {
        *self = *self + other;
    }
}

impl Sum for UsageAccount {
    fn sum<I: Iterator<Item = UsageAccount>>(iter: I) -> Self {
        iter.fold(UsageAccount::zero(), Add::add)
    }
}

impl<'a> Sum<&'a UsageAccount> for UsageAccount {
    fn sum<I: Iterator<Item = &'a UsageAccount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_pricing_per_token_type() {
        let counts = TokenCounts {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_creation_input_tokens: 1_000_000,
            cache_read_input_tokens: 1_000_000,
        };
        let sonnet = UsageAccount::from_counts(&counts, ModelTier::Sonnet);
        assert!(approx(sonnet.cost, 3.0 + 15.0 + 3.75 + 0.3));

        let opus = UsageAccount::from_counts(&counts, ModelTier::Opus);
        assert!(approx(opus.cost, sonnet.cost * 5.0));
        assert_eq!(opus.model, ModelTag::Opus);
    }

    #[test]
    fn test_zero_is_identity() {
        let opus = UsageAccount::from_counts(&TokenCounts::new(10, 5), ModelTier::Opus);
        assert_eq!(UsageAccount::zero() + opus, opus);
        assert_eq!(opus + UsageAccount::zero(), opus);
        assert_eq!([opus].iter().sum::<UsageAccount>(), opus);
    }

    #[test]
    fn test_mixing_models_is_tagged_mixed() {
        let sonnet = UsageAccount::from_counts(&TokenCounts::new(100, 10), ModelTier::Sonnet);
        let opus = UsageAccount::from_counts(&TokenCounts::new(100, 10), ModelTier::Opus);

        let total = sonnet + opus;
        assert_eq!(total.model, ModelTag::Mixed);
        assert_eq!(total.input_tokens, 200);
        assert!(approx(total.cost, sonnet.cost + opus.cost));

        let more = total + sonnet;
        assert_eq!(more.model, ModelTag::Mixed);
    }

    #[test]
    fn test_addition_is_associative_and_commutative() {
        let a = UsageAccount::from_counts(&TokenCounts::new(3, 1), ModelTier::Sonnet);
        let b = UsageAccount::zero();
        let c = UsageAccount::from_counts(&TokenCounts::new(7, 2), ModelTier::Opus);

        let left = (a + b) + c;
        let right = a + (b + c);
        assert_eq!(left.model, right.model);
        assert_eq!(left.total_tokens(), right.total_tokens());
        assert!(approx(left.cost, right.cost));

        let swapped = c + b + a;
        assert_eq!(swapped.model, left.model);
        assert!(approx(swapped.cost, left.cost));
    }

    #[test]
    fn test_counts_tolerate_missing_fields() {
        let counts: TokenCounts =
            serde_json::from_str(r#"{"input_tokens": 12, "output_tokens": 3}"#).unwrap();
        assert_eq!(counts.cache_read_input_tokens, 0);
        assert_eq!(UsageAccount::from_counts(&counts, ModelTier::Sonnet).total_tokens(), 15);
    }
}
