use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction an agent votes for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalSide {
    Long,
    Short,
    Flat,
}

impl SignalSide {
    pub const ALL: [SignalSide; 3] = [SignalSide::Long, SignalSide::Short, SignalSide::Flat];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Long => "LONG",
            SignalSide::Short => "SHORT",
            SignalSide::Flat => "FLAT",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            SignalSide::Long => SignalSide::Short,
            SignalSide::Short => SignalSide::Long,
            SignalSide::Flat => SignalSide::Flat,
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, SignalSide::Flat)
    }
}

impl std::fmt::Display for SignalSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One agent's vote for one tick. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub agent_id: String,
    pub symbol: String,
    pub side: SignalSide,
    /// Nominally in [0, 1]; clamped by consumers, never rejected
    pub confidence: f64,
    /// Suggested position size as a fraction of account capital
    pub size_fraction: f64,
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(agent_id: &str, symbol: &str, side: SignalSide, confidence: f64) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            side,
            confidence,
            size_fraction: 0.0,
            rationale: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_size_fraction(mut self, fraction: f64) -> Self {
        self.size_fraction = fraction;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Confidence clamped to [0, 1]; NaN counts as zero.
    pub fn normalized_confidence(&self) -> f64 {
        clamp_unit(self.confidence)
    }

    /// Size fraction clamped to [0, 1]; NaN counts as zero.
    pub fn normalized_size_fraction(&self) -> f64 {
        clamp_unit(self.size_fraction)
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_normalization() {
        let s = Signal::new("a", "BTC-USD", SignalSide::Long, 1.7);
        assert_eq!(s.normalized_confidence(), 1.0);

        let s = Signal::new("a", "BTC-USD", SignalSide::Long, -0.3);
        assert_eq!(s.normalized_confidence(), 0.0);

        let s = Signal::new("a", "BTC-USD", SignalSide::Long, f64::NAN);
        assert_eq!(s.normalized_confidence(), 0.0);
    }

    #[test]
    fn test_side_serde_uppercase() {
        let json = serde_json::to_string(&SignalSide::Short).unwrap();
        assert_eq!(json, "\"SHORT\"");
        assert_eq!(SignalSide::Long.opposite(), SignalSide::Short);
        assert_eq!(SignalSide::Flat.opposite(), SignalSide::Flat);
    }
}
