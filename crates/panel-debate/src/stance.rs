//! Stance classification by keyword scan
//!
//! Mirrors the keyword routing used for query intents: English keywords are
//! matched as whole words, Chinese keywords as substrings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Directional stance of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Bullish,
    Bearish,
    Neutral,
    Unclear,
}

impl Stance {
    /// Tie-break order for majority votes
    pub const ALL: [Stance; 4] = [Self::Bullish, Self::Bearish, Self::Neutral, Self::Unclear];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullish => "bullish",
            Self::Bearish => "bearish",
            Self::Neutral => "neutral",
            Self::Unclear => "unclear",
        }
    }

    /// Whether two stances point in opposite directions
    pub fn opposes(&self, other: Stance) -> bool {
        matches!(
            (self, other),
            (Self::Bullish, Self::Bearish) | (Self::Bearish, Self::Bullish)
        )
    }
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

mod keywords_en {
    pub const BULLISH: &[&str] = &[
        "bullish",
        "buy",
        "accumulate",
        "upside",
        "outperform",
        "overweight",
        "undervalued",
        "rally",
        "breakout",
        "uptrend",
        "positive",
        "strong",
    ];

    pub const BEARISH: &[&str] = &[
        "bearish",
        "sell",
        "reduce",
        "downside",
        "underperform",
        "underweight",
        "overvalued",
        "decline",
        "breakdown",
        "downtrend",
        "negative",
        "weak",
    ];

    pub const NEUTRAL: &[&str] = &[
        "neutral", "hold", "sideways", "mixed", "balanced", "wait", "range",
    ];
}

mod keywords_zh {
    pub const BULLISH: &[&str] = &["看涨", "看多", "买入", "上涨", "增持"];
    pub const BEARISH: &[&str] = &["看跌", "看空", "卖出", "下跌", "减持"];
    pub const NEUTRAL: &[&str] = &["中性", "持有", "观望", "震荡"];
}

fn count_hits(words: &[String], text: &str, en: &[&str], zh: &[&str]) -> usize {
    let en_hits = words.iter().filter(|w| en.contains(&w.as_str())).count();
    let zh_hits = zh.iter().filter(|k| text.contains(*k)).count();
    en_hits + zh_hits
}

/// Classify argument text into a stance
///
/// The side with more keyword hits wins; a tie with any hits, or neutral
/// keywords alone, gives `Neutral`; no hits at all gives `Unclear`.
pub fn classify(text: &str) -> Stance {
    let lower = text.to_lowercase();
    let words: Vec<String> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect();

    let bullish = count_hits(&words, &lower, keywords_en::BULLISH, keywords_zh::BULLISH);
    let bearish = count_hits(&words, &lower, keywords_en::BEARISH, keywords_zh::BEARISH);
    let neutral = count_hits(&words, &lower, keywords_en::NEUTRAL, keywords_zh::NEUTRAL);

    match bullish.cmp(&bearish) {
        std::cmp::Ordering::Greater => Stance::Bullish,
        std::cmp::Ordering::Less => Stance::Bearish,
        std::cmp::Ordering::Equal if bullish > 0 || neutral > 0 => Stance::Neutral,
        std::cmp::Ordering::Equal => Stance::Unclear,
    }
}
