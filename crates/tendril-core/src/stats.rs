//! Per-interaction usage summary.

use crate::battery::Battery;
use crate::render::STATS_AVATAR;
use std::time::Duration;
use tendril_protocol::{ChatRole, UiBlock, UiElement};
use tendril_provider::UsageAccount;

/// One summary line: emoji, change during this interaction, running total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsLine {
    pub emoji: &'static str,
    pub delta: String,
    pub total: String,
}

impl StatsLine {
    fn new(emoji: &'static str, delta: String, total: String) -> Self {
        Self { emoji, delta, total }
    }
}

/// Format a count with `k`/`M` suffixes: `950`, `1.5k`, `2M`.
pub fn format_number(num: u64) -> String {
    if num < 1_000 {
        num.to_string()
    } else if num < 1_000_000 {
        format!("{:.1}k", num as f64 / 1_000.0).replace(".0k", "k")
    } else {
        format!("{:.1}M", num as f64 / 1_000_000.0).replace(".0M", "M")
    }
}

/// Format a duration as `{m}m{s}s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m{}s", secs / 60, secs % 60)
}

/// Lines for token counters, cost and battery.
pub fn stats_lines(
    usage: &UsageAccount,
    total: &UsageAccount,
    battery: Battery,
    prev_battery: Battery,
    low_threshold: f64,
) -> Vec<StatsLine> {
    let counters = [
        ("➕", usage.input_tokens, total.input_tokens),
        ("🖋️", usage.output_tokens, total.output_tokens),
        ("📀", usage.cache_write_tokens, total.cache_write_tokens),
        ("♻️", usage.cache_read_tokens, total.cache_read_tokens),
    ];

    let mut lines: Vec<StatsLine> = counters
        .into_iter()
        .map(|(emoji, delta, total)| {
            StatsLine::new(emoji, format!("+{}", format_number(delta)), format_number(total))
        })
        .collect();

    lines.push(StatsLine::new(
        "💰",
        format!("+${:.2}", usage.cost),
        format!("${:.2}", total.cost),
    ));

    let (delta, total) = match (battery.percent(), prev_battery.percent()) {
        (Some(now), Some(before)) => (format!("{:+.1}%", now - before), format!("{now:.1}%")),
        (Some(now), None) => ("n/a".to_string(), format!("{now:.1}%")),
        (None, _) => ("n/a".to_string(), "❌ counting failed".to_string()),
    };
    lines.push(StatsLine::new(battery.emoji(low_threshold), delta, total));

    lines
}

/// Header plus aligned lines.
pub fn stats_text(lines: &[StatsLine], elapsed: Duration, index: usize) -> String {
    let width = lines
        .iter()
        .map(|line| line.delta.chars().count())
        .max()
        .unwrap_or(0);
    let body = lines
        .iter()
        .map(|line| format!("{} {:>width$}  {}", line.emoji, line.delta, line.total))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Interaction {index} completed in {}\n\n{body}",
        format_elapsed(elapsed)
    )
}

/// The 💰 element shown at the end of an interaction.
pub fn stats_element(text: String) -> UiElement {
    UiElement::single(STATS_AVATAR, ChatRole::System, UiBlock::code(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tendril_provider::{ModelTier, TokenCounts};

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(950), "950");
        assert_eq!(format_number(1_000), "1k");
        assert_eq!(format_number(1_500), "1.5k");
        assert_eq!(format_number(2_000_000), "2M");
        assert_eq!(format_number(2_340_000), "2.3M");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m5s");
        assert_eq!(format_elapsed(Duration::from_millis(900)), "0m0s");
    }

    #[test]
    fn test_stats_text_layout() {
        let usage = UsageAccount::from_counts(&TokenCounts::new(1_500, 20), ModelTier::Sonnet);
        let total = usage + usage;
        let lines = stats_lines(&usage, &total, Battery::Percent(90.0), Battery::FULL, 20.0);
        let text = stats_text(&lines, Duration::from_secs(61), 3);

        let mut rows = text.lines();
        assert_eq!(rows.next(), Some("Interaction 3 completed in 1m1s"));
        assert_eq!(rows.next(), Some(""));
        assert_eq!(rows.next(), Some("➕  +1.5k  3k"));
        assert_eq!(rows.next(), Some("🖋️    +20  40"));
        assert!(text.ends_with("🔋 -10.0%  90.0%"));
    }

    #[test]
    fn test_failed_battery_line() {
        let zero = UsageAccount::zero();
        let lines = stats_lines(&zero, &zero, Battery::CountingFailed, Battery::FULL, 20.0);
        let battery = lines.last().unwrap();
        assert_eq!(battery.delta, "n/a");
        assert_eq!(battery.total, "❌ counting failed");
    }
}
