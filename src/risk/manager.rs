use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::limits::{RiskLimits, SizingMode};
use crate::domain::{ConsensusDecision, MarketSnapshot, OrderSide, PortfolioState, SignalSide};

/// Quantity precision sent to the exchange
const QUANTITY_DP: u32 = 8;

/// Checks in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCheck {
    ConfidenceFloor,
    PositionSize,
    Volatility,
    Exposure,
    Drawdown,
    Cooldown,
}

impl RiskCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCheck::ConfidenceFloor => "CONFIDENCE_FLOOR",
            RiskCheck::PositionSize => "POSITION_SIZE",
            RiskCheck::Volatility => "VOLATILITY",
            RiskCheck::Exposure => "EXPOSURE",
            RiskCheck::Drawdown => "DRAWDOWN",
            RiskCheck::Cooldown => "COOLDOWN",
        }
    }
}

impl std::fmt::Display for RiskCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Adjusted { from: Decimal, to: Decimal },
    Vetoed,
    Skipped,
}

/// One line of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub check: RiskCheck,
    pub outcome: CheckOutcome,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VetoReason {
    NotActionable,
    LowConfidence,
    Unpriceable,
    SizeBelowMinimum,
    VolatilityTooHigh,
    ExposureLimit,
    DrawdownExceeded,
    Cooldown,
}

impl VetoReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            VetoReason::NotActionable => "NOT_ACTIONABLE",
            VetoReason::LowConfidence => "LOW_CONFIDENCE",
            VetoReason::Unpriceable => "UNPRICEABLE",
            VetoReason::SizeBelowMinimum => "SIZE_BELOW_MINIMUM",
            VetoReason::VolatilityTooHigh => "VOLATILITY_TOO_HIGH",
            VetoReason::ExposureLimit => "EXPOSURE_LIMIT",
            VetoReason::DrawdownExceeded => "DRAWDOWN_EXCEEDED",
            VetoReason::Cooldown => "COOLDOWN",
        }
    }
}

impl std::fmt::Display for VetoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a decision through the check chain. Immutable.
///
/// `approved` implies `0 < adjusted_size <= requested_size` and a positive
/// `quantity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub decision_id: Uuid,
    pub symbol: String,
    pub side: SignalSide,
    pub approved: bool,
    /// Notional implied by the decision
    pub requested_size: Decimal,
    /// Notional after every downsizing check
    pub adjusted_size: Decimal,
    /// Order quantity at `reference_price`, rounded toward zero
    pub quantity: Decimal,
    pub reference_price: Decimal,
    /// Decision closes or shrinks an existing opposite position
    pub risk_reducing: bool,
    pub veto_reason: Option<VetoReason>,
    /// Last check that downsized or vetoed
    pub limit: Option<RiskCheck>,
    pub checks: Vec<CheckRecord>,
    pub evaluated_at: DateTime<Utc>,
}

impl RiskVerdict {
    pub fn order_side(&self) -> Option<OrderSide> {
        OrderSide::from_signal(self.side)
    }

    pub fn outcome_of(&self, check: RiskCheck) -> Option<&CheckOutcome> {
        self.checks
            .iter()
            .find(|r| r.check == check)
            .map(|r| &r.outcome)
    }
}

/// Ordered risk check chain.
///
/// A veto short-circuits the chain; a downsize carries the smaller size into
/// the next check. Time is taken from the decision, so the same inputs always
/// produce the same verdict.
pub struct RiskManager;

impl RiskManager {
    pub fn evaluate(
        decision: &ConsensusDecision,
        portfolio: &PortfolioState,
        market: &MarketSnapshot,
        limits: &RiskLimits,
    ) -> RiskVerdict {
        let price = market.last_price();
        let mut eval = Evaluation::new(decision, price);

        // 1. confidence floor
        if !decision.is_actionable() {
            return eval.veto(
                RiskCheck::ConfidenceFloor,
                VetoReason::NotActionable,
                format!("decision is {} with confidence {:.3}", decision.side, decision.confidence),
            );
        }
        if decision.confidence <= limits.min_confidence {
            return eval.veto(
                RiskCheck::ConfidenceFloor,
                VetoReason::LowConfidence,
                format!(
                    "confidence {:.3} <= floor {:.3}",
                    decision.confidence, limits.min_confidence
                ),
            );
        }
        eval.pass(
            RiskCheck::ConfidenceFloor,
            format!("confidence {:.3}", decision.confidence),
        );

        // 2. position size
        if price <= Decimal::ZERO || !market.is_priceable() {
            return eval.veto(
                RiskCheck::PositionSize,
                VetoReason::Unpriceable,
                format!("no usable price for {}", decision.symbol),
            );
        }

        let position = portfolio.position(&decision.symbol);
        let closing = position.filter(|p| p.direction() == decision.side.opposite());
        eval.reducing = closing.is_some();

        let capital = portfolio.capital.max(Decimal::ZERO);
        let cap = capital * cap_fraction(decision.confidence, limits);
        let suggested = capital * to_decimal(decision.size_fraction);
        eval.requested = if suggested > Decimal::ZERO { suggested } else { cap };
        eval.size = eval.requested;

        let mut notes = Vec::new();
        if eval.size > cap {
            eval.size = cap;
            notes.push(format!("capped at {} of capital", cap_fraction(decision.confidence, limits)));
        }
        if decision.arbitration {
            let multiplier = to_decimal(limits.arbitration_size_multiplier).min(Decimal::ONE);
            eval.size *= multiplier;
            notes.push(format!("arbitrated x{}", multiplier));
        }
        if let Some(open) = closing {
            let open_notional = open.net_quantity.abs() * price;
            if eval.size > open_notional {
                eval.size = open_notional;
                notes.push("capped at open position".to_string());
            }
        }

        if eval.size <= Decimal::ZERO
            || (!eval.reducing && eval.size < limits.min_order_notional)
        {
            let detail = format!(
                "size {} below minimum {}",
                eval.size.round_dp(2),
                limits.min_order_notional
            );
            return eval.veto(RiskCheck::PositionSize, VetoReason::SizeBelowMinimum, detail);
        }
        if eval.size < eval.requested {
            let (from, to) = (eval.requested, eval.size);
            eval.adjusted(RiskCheck::PositionSize, from, to, notes.join(", "));
        } else {
            eval.pass(RiskCheck::PositionSize, format!("size {}", eval.size.round_dp(2)));
        }

        if eval.reducing {
            for check in [RiskCheck::Volatility, RiskCheck::Exposure, RiskCheck::Drawdown] {
                eval.skip(check, "risk-reducing decision".to_string());
            }
        } else {
            // 3. volatility-adjusted stop
            let stop_distance = market.volatility.max(Decimal::ZERO) * limits.stop_atr_multiple;
            // A stop that rounds to nothing against the price carries no estimate
            let loss_per_notional = stop_distance / price;
            if stop_distance > Decimal::ZERO && !loss_per_notional.is_zero() {
                let budget = capital * limits.max_loss_per_trade_fraction;
                let loss_at_minimum = limits.min_order_notional.max(Decimal::ONE) * loss_per_notional;
                if loss_at_minimum > budget {
                    return eval.veto(
                        RiskCheck::Volatility,
                        VetoReason::VolatilityTooHigh,
                        format!(
                            "stop {} risks {} at minimum size, budget {}",
                            stop_distance.round_dp(4),
                            loss_at_minimum.round_dp(2),
                            budget.round_dp(2)
                        ),
                    );
                }
                let max_notional = budget / loss_per_notional;
                if eval.size > max_notional {
                    eval.resize(
                        RiskCheck::Volatility,
                        max_notional,
                        format!("stop {} limits loss to {}", stop_distance.round_dp(4), budget.round_dp(2)),
                    );
                } else {
                    eval.pass(RiskCheck::Volatility, format!("stop {}", stop_distance.round_dp(4)));
                }
            } else {
                eval.pass(RiskCheck::Volatility, "no volatility estimate".to_string());
            }

            // 4. gross and correlated exposure
            let gross_room = capital * limits.max_gross_exposure_fraction - portfolio.gross_exposure();
            let group = limits.correlated_with(&decision.symbol);
            let group_exposure = portfolio.exposure_where(|s| group.iter().any(|g| g == s));
            let group_room = capital * limits.max_correlated_exposure_fraction - group_exposure;
            let room = gross_room.min(group_room);

            if room <= Decimal::ZERO || room < limits.min_order_notional {
                return eval.veto(
                    RiskCheck::Exposure,
                    VetoReason::ExposureLimit,
                    format!(
                        "no exposure room (gross {}, group {} {})",
                        gross_room.round_dp(2),
                        group.join("+"),
                        group_room.round_dp(2)
                    ),
                );
            }
            if eval.size > room {
                eval.resize(
                    RiskCheck::Exposure,
                    room,
                    format!("exposure room {}", room.round_dp(2)),
                );
            } else {
                eval.pass(RiskCheck::Exposure, format!("exposure room {}", room.round_dp(2)));
            }

            // 5. drawdown breaker
            let drawdown = portfolio.drawdown();
            if drawdown > limits.max_drawdown {
                return eval.veto(
                    RiskCheck::Drawdown,
                    VetoReason::DrawdownExceeded,
                    format!("drawdown {} > limit {}", drawdown.round_dp(4), limits.max_drawdown),
                );
            }
            eval.pass(RiskCheck::Drawdown, format!("drawdown {}", drawdown.round_dp(4)));
        }

        // 6. cooldown
        if eval.reducing && !limits.cooldown_applies_to_exits {
            eval.skip(RiskCheck::Cooldown, "exits are not rate limited".to_string());
        } else {
            let window = Duration::seconds(limits.cooldown_secs as i64);
            match portfolio.last_trade_at.get(&decision.symbol) {
                Some(last) if decision.timestamp - *last < window => {
                    return eval.veto(
                        RiskCheck::Cooldown,
                        VetoReason::Cooldown,
                        format!(
                            "last trade {}s ago, cooldown {}s",
                            (decision.timestamp - *last).num_seconds(),
                            limits.cooldown_secs
                        ),
                    );
                }
                _ => eval.pass(RiskCheck::Cooldown, String::new()),
            }
        }

        let mut quantity =
            (eval.size / price).round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero);
        if let Some(open) = closing {
            quantity = quantity.min(open.net_quantity.abs());
        }
        if quantity <= Decimal::ZERO {
            return eval.veto(
                RiskCheck::PositionSize,
                VetoReason::SizeBelowMinimum,
                "quantity rounds to zero".to_string(),
            );
        }

        eval.approve(quantity)
    }
}

/// Capital fraction allowed for one position
fn cap_fraction(confidence: f64, limits: &RiskLimits) -> Decimal {
    let max = limits.max_position_fraction.max(Decimal::ZERO);
    match limits.sizing {
        SizingMode::FixedFraction => max,
        SizingMode::Kelly => {
            let kelly = limits.kelly_multiplier * (2.0 * confidence - 1.0);
            to_decimal(kelly).max(Decimal::ZERO).min(max)
        }
    }
}

fn to_decimal(value: f64) -> Decimal {
    if !value.is_finite() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(QUANTITY_DP))
        .unwrap_or(Decimal::ZERO)
}

struct Evaluation<'a> {
    decision: &'a ConsensusDecision,
    reference_price: Decimal,
    requested: Decimal,
    size: Decimal,
    reducing: bool,
    checks: Vec<CheckRecord>,
    limit: Option<RiskCheck>,
}

impl<'a> Evaluation<'a> {
    fn new(decision: &'a ConsensusDecision, reference_price: Decimal) -> Self {
        Self {
            decision,
            reference_price,
            requested: Decimal::ZERO,
            size: Decimal::ZERO,
            reducing: false,
            checks: Vec::new(),
            limit: None,
        }
    }

    fn record(&mut self, check: RiskCheck, outcome: CheckOutcome, detail: String) {
        self.checks.push(CheckRecord {
            check,
            outcome,
            detail,
        });
    }

    fn pass(&mut self, check: RiskCheck, detail: String) {
        self.record(check, CheckOutcome::Passed, detail);
    }

    fn skip(&mut self, check: RiskCheck, detail: String) {
        self.record(check, CheckOutcome::Skipped, detail);
    }

    fn adjusted(&mut self, check: RiskCheck, from: Decimal, to: Decimal, detail: String) {
        self.limit = Some(check);
        self.record(check, CheckOutcome::Adjusted { from, to }, detail);
    }

    fn resize(&mut self, check: RiskCheck, to: Decimal, detail: String) {
        let from = self.size;
        self.size = to.min(from);
        self.adjusted(check, from, self.size, detail);
    }

    fn veto(mut self, check: RiskCheck, reason: VetoReason, detail: String) -> RiskVerdict {
        self.limit = Some(check);
        self.record(check, CheckOutcome::Vetoed, detail);
        self.finish(false, Decimal::ZERO, Decimal::ZERO, Some(reason))
    }

    fn approve(self, quantity: Decimal) -> RiskVerdict {
        let size = self.size;
        self.finish(true, size, quantity, None)
    }

    fn finish(
        self,
        approved: bool,
        adjusted_size: Decimal,
        quantity: Decimal,
        veto_reason: Option<VetoReason>,
    ) -> RiskVerdict {
        RiskVerdict {
            decision_id: self.decision.id,
            symbol: self.decision.symbol.clone(),
            side: self.decision.side,
            approved,
            requested_size: self.requested,
            adjusted_size,
            quantity,
            reference_price: self.reference_price,
            risk_reducing: self.reducing,
            veto_reason,
            limit: self.limit,
            checks: self.checks,
            evaluated_at: self.decision.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SideScores;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn decision(symbol: &str, side: SignalSide, confidence: f64, size_fraction: f64) -> ConsensusDecision {
        ConsensusDecision {
            id: Uuid::nil(),
            symbol: symbol.into(),
            side,
            confidence,
            size_fraction,
            contributions: vec![],
            scores: SideScores::default(),
            arbitration: false,
            flat_reason: None,
            weights_version: 0,
            timestamp: at(),
        }
    }

    fn market(symbol: &str, price: Decimal, volatility: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.into(),
            timestamp: at(),
            best_bid: price - dec!(1),
            best_ask: price + dec!(1),
            last_trades: vec![],
            volatility,
        }
    }

    fn btc() -> MarketSnapshot {
        market("BTC-USD", dec!(50000), dec!(100))
    }

    /// 10k capital, 21% below peak, long 1 ETH bought at 3000 and marked at 2500
    fn drawn_down_portfolio() -> PortfolioState {
        let mut portfolio = PortfolioState::new(dec!(10000));
        let opened = at() - Duration::hours(2);
        portfolio.apply_fill("ETH-USD", OrderSide::Buy, dec!(1), dec!(3000), opened);
        portfolio.mark("ETH-USD", dec!(2500), opened);
        portfolio.realized_pnl = dec!(-1600);
        portfolio
    }

    #[test]
    fn test_drawdown_vetoes_new_risk() {
        let portfolio = drawn_down_portfolio();
        assert_eq!(portfolio.drawdown(), dec!(0.21));

        let verdict = RiskManager::evaluate(
            &decision("BTC-USD", SignalSide::Long, 0.8, 0.05),
            &portfolio,
            &btc(),
            &RiskLimits::default(),
        );
        assert!(!verdict.approved);
        assert_eq!(verdict.veto_reason, Some(VetoReason::DrawdownExceeded));
        assert_eq!(verdict.veto_reason.map(|r| r.to_string()).as_deref(), Some("DRAWDOWN_EXCEEDED"));
        assert_eq!(verdict.limit, Some(RiskCheck::Drawdown));
        assert_eq!(verdict.adjusted_size, Decimal::ZERO);
    }

    #[test]
    fn test_drawdown_still_allows_closing_a_loser() {
        let portfolio = drawn_down_portfolio();
        let verdict = RiskManager::evaluate(
            &decision("ETH-USD", SignalSide::Short, 0.8, 0.5),
            &portfolio,
            &market("ETH-USD", dec!(2500), dec!(40)),
            &RiskLimits::default(),
        );
        assert!(verdict.approved, "{:?}", verdict.checks);
        assert!(verdict.risk_reducing);
        assert_eq!(verdict.outcome_of(RiskCheck::Drawdown), Some(&CheckOutcome::Skipped));
        // capped at 10% of capital: 1000 / 2500
        assert_eq!(verdict.quantity, dec!(0.4));
        assert!(verdict.quantity <= dec!(1));
    }

    #[test]
    fn test_exit_is_capped_at_open_position() {
        let portfolio = drawn_down_portfolio();
        let limits = RiskLimits {
            max_position_fraction: dec!(1),
            ..Default::default()
        };
        let verdict = RiskManager::evaluate(
            &decision("ETH-USD", SignalSide::Short, 0.9, 0.9),
            &portfolio,
            &market("ETH-USD", dec!(2500), dec!(40)),
            &limits,
        );
        assert!(verdict.approved);
        assert_eq!(verdict.quantity, dec!(1));
        assert_eq!(verdict.adjusted_size, dec!(2500));
    }

    #[test]
    fn test_flat_and_low_confidence_are_vetoed() {
        let portfolio = PortfolioState::new(dec!(10000));
        let limits = RiskLimits::default();

        let flat = RiskManager::evaluate(
            &decision("BTC-USD", SignalSide::Flat, 0.0, 0.0),
            &portfolio,
            &btc(),
            &limits,
        );
        assert_eq!(flat.veto_reason, Some(VetoReason::NotActionable));

        let weak = RiskManager::evaluate(
            &decision("BTC-USD", SignalSide::Long, 0.55, 0.05),
            &portfolio,
            &btc(),
            &limits,
        );
        assert_eq!(weak.veto_reason, Some(VetoReason::LowConfidence));
        assert_eq!(weak.checks.len(), 1);
    }

    #[test]
    fn test_size_cap_downsizes() {
        let verdict = RiskManager::evaluate(
            &decision("BTC-USD", SignalSide::Long, 0.8, 0.5),
            &PortfolioState::new(dec!(10000)),
            &btc(),
            &RiskLimits::default(),
        );
        assert!(verdict.approved);
        assert_eq!(verdict.requested_size, dec!(5000));
        assert_eq!(verdict.adjusted_size, dec!(1000));
        assert_eq!(verdict.quantity, dec!(0.02));
        assert_eq!(
            verdict.outcome_of(RiskCheck::PositionSize),
            Some(&CheckOutcome::Adjusted {
                from: dec!(5000),
                to: dec!(1000)
            })
        );
        assert_eq!(verdict.limit, Some(RiskCheck::PositionSize));
    }

    #[test]
    fn test_kelly_sizing_and_arbitration_multiplier() {
        let limits = RiskLimits {
            sizing: SizingMode::Kelly,
            max_position_fraction: dec!(0.2),
            ..Default::default()
        };
        let mut d = decision("BTC-USD", SignalSide::Long, 0.7, 0.0);
        let verdict = RiskManager::evaluate(&d, &PortfolioState::new(dec!(10000)), &btc(), &limits);
        // 0.25 * (2 * 0.7 - 1) = 0.1
        assert_eq!(verdict.adjusted_size, dec!(1000));

        d.arbitration = true;
        let verdict = RiskManager::evaluate(&d, &PortfolioState::new(dec!(10000)), &btc(), &limits);
        assert_eq!(verdict.adjusted_size, dec!(500));
        assert!(verdict.adjusted_size <= verdict.requested_size);
    }

    #[test]
    fn test_volatility_veto_and_downsize() {
        let portfolio = PortfolioState::new(dec!(10000));
        let limits = RiskLimits::default();
        let d = decision("BTC-USD", SignalSide::Long, 0.8, 0.1);

        let wild = RiskManager::evaluate(&d, &portfolio, &market("BTC-USD", dec!(50000), dec!(300000)), &limits);
        assert_eq!(wild.veto_reason, Some(VetoReason::VolatilityTooHigh));

        // stop 2 * 2500 on 50000 = 10% of notional; budget 100 -> 1000 max
        let choppy = RiskManager::evaluate(&d, &portfolio, &market("BTC-USD", dec!(50000), dec!(2500)), &limits);
        assert!(choppy.approved);
        assert_eq!(choppy.adjusted_size, dec!(1000));

        let jumpy = RiskManager::evaluate(&d, &portfolio, &market("BTC-USD", dec!(50000), dec!(6250)), &limits);
        assert!(jumpy.approved);
        assert_eq!(jumpy.adjusted_size, dec!(400));
        assert_eq!(jumpy.limit, Some(RiskCheck::Volatility));
    }

    #[test]
    fn test_dust_size_is_vetoed_with_detail() {
        // 0.0005 of 10k is 5, under the 10 minimum
        let verdict = RiskManager::evaluate(
            &decision("BTC-USD", SignalSide::Long, 0.8, 0.0005),
            &PortfolioState::new(dec!(10000)),
            &btc(),
            &RiskLimits::default(),
        );
        assert_eq!(verdict.veto_reason, Some(VetoReason::SizeBelowMinimum));
        assert_eq!(verdict.limit, Some(RiskCheck::PositionSize));
        let record = verdict.checks.last().unwrap();
        assert_eq!(record.outcome, CheckOutcome::Vetoed);
        assert_eq!(record.detail, "size 5.00 below minimum 10");
    }

    #[test]
    fn test_vanishing_stop_counts_as_no_estimate() {
        let verdict = RiskManager::evaluate(
            &decision("BTC-USD", SignalSide::Long, 0.8, 0.05),
            &PortfolioState::new(dec!(10000)),
            &market("BTC-USD", dec!(50000), dec!(0.0000000000000000000000000001)),
            &RiskLimits::default(),
        );
        assert!(verdict.approved, "{:?}", verdict.checks);
        assert_eq!(verdict.outcome_of(RiskCheck::Volatility), Some(&CheckOutcome::Passed));
        assert_eq!(verdict.adjusted_size, dec!(500));
    }

    #[test]
    fn test_correlated_exposure() {
        let mut limits = RiskLimits::default();
        limits.correlation_groups.insert(
            "majors".into(),
            vec!["BTC-USD".into(), "ETH-USD".into()],
        );
        let d = decision("BTC-USD", SignalSide::Long, 0.8, 0.05);

        let mut portfolio = PortfolioState::new(dec!(10000));
        portfolio.reserve(
            "other",
            crate::domain::Reservation {
                symbol: "ETH-USD".into(),
                side: SignalSide::Long,
                notional: dec!(2300),
            },
        );
        let verdict = RiskManager::evaluate(&d, &portfolio, &btc(), &limits);
        assert!(verdict.approved);
        assert_eq!(verdict.adjusted_size, dec!(200));
        assert_eq!(verdict.limit, Some(RiskCheck::Exposure));

        portfolio.reserve(
            "third",
            crate::domain::Reservation {
                symbol: "BTC-USD".into(),
                side: SignalSide::Long,
                notional: dec!(195),
            },
        );
        let verdict = RiskManager::evaluate(&d, &portfolio, &btc(), &limits);
        assert_eq!(verdict.veto_reason, Some(VetoReason::ExposureLimit));
    }

    #[test]
    fn test_cooldown() {
        let mut portfolio = PortfolioState::new(dec!(10000));
        portfolio
            .last_trade_at
            .insert("BTC-USD".into(), at() - Duration::seconds(60));
        let d = decision("BTC-USD", SignalSide::Long, 0.8, 0.05);

        let verdict = RiskManager::evaluate(&d, &portfolio, &btc(), &RiskLimits::default());
        assert_eq!(verdict.veto_reason, Some(VetoReason::Cooldown));

        let relaxed = RiskLimits {
            cooldown_secs: 30,
            ..Default::default()
        };
        assert!(RiskManager::evaluate(&d, &portfolio, &btc(), &relaxed).approved);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let portfolio = drawn_down_portfolio();
        let limits = RiskLimits::default();
        let m = market("ETH-USD", dec!(2500), dec!(40));
        for side in [SignalSide::Long, SignalSide::Short] {
            let d = decision("ETH-USD", side, 0.75, 0.03);
            assert_eq!(
                RiskManager::evaluate(&d, &portfolio, &m, &limits),
                RiskManager::evaluate(&d, &portfolio, &m, &limits)
            );
        }
    }

    #[test]
    fn test_approved_size_never_exceeds_request() {
        let portfolio = PortfolioState::new(dec!(10000));
        let limits = RiskLimits::default();
        for fraction in [0.0, 0.001, 0.01, 0.05, 0.2, 1.0, 5.0] {
            for confidence in [0.6, 0.8, 1.0] {
                let verdict = RiskManager::evaluate(
                    &decision("BTC-USD", SignalSide::Short, confidence, fraction),
                    &portfolio,
                    &btc(),
                    &limits,
                );
                if verdict.approved {
                    assert!(verdict.adjusted_size > Decimal::ZERO);
                    assert!(verdict.adjusted_size <= verdict.requested_size);
                    assert!(verdict.quantity > Decimal::ZERO);
                } else {
                    assert!(verdict.veto_reason.is_some());
                }
            }
        }
    }
}
