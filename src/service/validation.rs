//! 抽取结果校验
//!
//! 纯函数: 检查报价与明细的算术一致性, 输出告警列表与综合置信度,
//! 并给出 `completed` / `review_needed` 的判定。判定只在这里计算。

use crate::config::PipelineConfig;
use crate::models::{LineItemFields, LineType, QuoteFields, Warning, WarningCheck};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 每条阻断告警扣减的置信度
const BLOCKING_PENALTY: f64 = 0.25;
/// 每条提示告警扣减的置信度
const ADVISORY_PENALTY: f64 = 0.1;

/// 校验判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    NeedsReview,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub warnings: Vec<Warning>,
    pub overall_confidence: f64,
}

impl ValidationReport {
    pub fn verdict(&self, review_threshold: f64) -> Verdict {
        let blocked = self.warnings.iter().any(Warning::is_blocking);
        if !blocked && self.overall_confidence >= review_threshold {
            Verdict::Clean
        } else {
            Verdict::NeedsReview
        }
    }

    pub fn warnings_for(&self, check: WarningCheck) -> impl Iterator<Item = &Warning> {
        self.warnings.iter().filter(move |w| w.check == check)
    }
}

/// 容差与阈值
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub relative_tolerance: BigDecimal,
    pub absolute_tolerance: BigDecimal,
    pub review_threshold: f64,
}

impl ValidationPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            relative_tolerance: decimal_from_f64(config.relative_tolerance),
            absolute_tolerance: decimal_from_f64(config.absolute_tolerance),
            review_threshold: config.review_threshold,
        }
    }

    /// |expected - actual| 不超过 expected 的相对容差, 或不超过绝对容差
    pub fn within_tolerance(&self, expected: &BigDecimal, actual: &BigDecimal) -> bool {
        let diff = (expected - actual).abs();
        diff <= self.absolute_tolerance || diff <= expected.abs() * &self.relative_tolerance
    }
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

fn decimal_from_f64(value: f64) -> BigDecimal {
    BigDecimal::from_str(&value.to_string()).unwrap_or_else(|_| BigDecimal::zero())
}

/// 校验器
#[derive(Debug, Clone, Default)]
pub struct Validator {
    policy: ValidationPolicy,
}

impl Validator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    pub fn verdict(&self, report: &ValidationReport) -> Verdict {
        report.verdict(self.policy.review_threshold)
    }

    /// 校验一份报价
    ///
    /// `reported_confidence` 为抽取服务自报的各字段/各行置信度; 为空时视为 1.0。
    pub fn validate<T: AsRef<LineItemFields>>(
        &self,
        quote: &QuoteFields,
        supplier_present: bool,
        line_items: &[T],
        reported_confidence: &[f64],
    ) -> ValidationReport {
        let items: Vec<&LineItemFields> = line_items.iter().map(|i| i.as_ref()).collect();
        let mut warnings = Vec::new();

        if !supplier_present {
            warnings.push(Warning::blocking(
                WarningCheck::MissingSupplier,
                "supplier could not be identified",
            ));
        }
        if items.is_empty() {
            warnings.push(Warning::blocking(
                WarningCheck::MissingLineItems,
                "quote has no line items",
            ));
        }

        for (idx, item) in items.iter().enumerate() {
            self.check_values(idx, item, &mut warnings);
            if item.line_type == LineType::Material {
                self.check_line_arithmetic(idx, item, &mut warnings);
            }
        }

        self.check_subtotal(quote, &items, &mut warnings);
        self.check_totals(quote, &mut warnings);
        self.check_tax_rate(quote, &mut warnings);

        let overall_confidence = overall_confidence(&warnings, reported_confidence);
        ValidationReport {
            warnings,
            overall_confidence,
        }
    }

    fn check_values(&self, idx: usize, item: &LineItemFields, warnings: &mut Vec<Warning>) {
        let zero = BigDecimal::zero();
        let hundred = BigDecimal::from(100);
        let mut invalid = |what: &str, value: &BigDecimal| {
            warnings.push(
                Warning::blocking(
                    WarningCheck::InvalidValue,
                    format!("line {}: {} {} is out of range", idx + 1, what, value),
                )
                .at_line(idx),
            );
        };

        if let Some(qty) = item.quantity.as_ref().filter(|q| **q < zero) {
            invalid("quantity", qty);
        }
        if let Some(price) = item.unit_price.as_ref().filter(|p| **p < zero) {
            invalid("unit price", price);
        }
        if let Some(pct) = item.discount_pct.as_ref().filter(|p| **p < zero || **p > hundred) {
            invalid("discount percentage", pct);
        }
        if let Some(amount) = item.discount_amount.as_ref().filter(|a| **a < zero) {
            invalid("discount amount", amount);
        }
    }

    fn check_line_arithmetic(&self, idx: usize, item: &LineItemFields, warnings: &mut Vec<Warning>) {
        let (Some(qty), Some(price), Some(total)) = (&item.quantity, &item.unit_price, &item.line_total) else {
            return;
        };

        let expected = qty * price;
        if self.policy.within_tolerance(&expected, total) {
            return;
        }
        // 行金额已含折扣时按折后单价核对
        if let Some(effective) = item.effective_unit_price() {
            if self.policy.within_tolerance(&(qty * &effective), total) {
                return;
            }
        }

        warnings.push(
            Warning::blocking(
                WarningCheck::LineArithmetic,
                format!(
                    "line {}: quantity {} x unit price {} = {}, but line total is {}",
                    idx + 1,
                    qty,
                    price,
                    expected,
                    total
                ),
            )
            .with_values(expected, total.clone())
            .at_line(idx),
        );
    }

    fn check_subtotal(&self, quote: &QuoteFields, items: &[&LineItemFields], warnings: &mut Vec<Warning>) {
        let Some(subtotal) = &quote.subtotal else {
            return;
        };

        let materials: Vec<_> = items.iter().filter(|i| i.is_material()).collect();
        if materials.is_empty() {
            return;
        }
        let Some(material_sum) = sum_totals(materials.iter().map(|i| i.computed_total())) else {
            return;
        };
        if self.policy.within_tolerance(&material_sum, subtotal) {
            return;
        }

        // 小计里也可能包含费用行与折扣行
        let adjustments = items
            .iter()
            .filter(|i| matches!(i.line_type, LineType::Fee | LineType::Discount))
            .map(|i| {
                i.computed_total().map(|t| match i.line_type {
                    LineType::Discount => -t.abs(),
                    _ => t,
                })
            });
        if let Some(adjustment) = sum_totals(adjustments) {
            if self.policy.within_tolerance(&(&material_sum + &adjustment), subtotal) {
                return;
            }
        }

        warnings.push(
            Warning::blocking(
                WarningCheck::SubtotalReconciliation,
                format!("material lines sum to {}, but subtotal is {}", material_sum, subtotal),
            )
            .with_values(material_sum, subtotal.clone()),
        );
    }

    fn check_totals(&self, quote: &QuoteFields, warnings: &mut Vec<Warning>) {
        let (Some(subtotal), Some(delivery), Some(tax), Some(total)) =
            (&quote.subtotal, &quote.delivery_cost, &quote.tax_amount, &quote.total_amount)
        else {
            return;
        };

        let expected = subtotal + delivery + tax;
        if self.policy.within_tolerance(&expected, total) {
            return;
        }
        warnings.push(
            Warning::blocking(
                WarningCheck::TotalsReconciliation,
                format!(
                    "subtotal {} + delivery {} + tax {} = {}, but total is {}",
                    subtotal, delivery, tax, expected, total
                ),
            )
            .with_values(expected, total.clone()),
        );
    }

    fn check_tax_rate(&self, quote: &QuoteFields, warnings: &mut Vec<Warning>) {
        let (Some(subtotal), Some(rate), Some(tax)) = (&quote.subtotal, &quote.tax_rate, &quote.tax_amount) else {
            return;
        };

        let expected = (subtotal * rate / BigDecimal::from(100)).round(2);
        if self.policy.within_tolerance(&expected, tax) {
            return;
        }
        warnings.push(
            Warning::advisory(
                WarningCheck::TaxRateConsistency,
                format!("tax rate {}% of subtotal {} is {}, but tax is {}", rate, subtotal, expected, tax),
            )
            .with_values(expected, tax.clone()),
        );
    }
}

/// 全部可计算时求和, 任一缺失返回 None
fn sum_totals(totals: impl Iterator<Item = Option<BigDecimal>>) -> Option<BigDecimal> {
    totals.fold(Some(BigDecimal::zero()), |acc, t| Some(acc? + t?))
}

fn overall_confidence(warnings: &[Warning], reported: &[f64]) -> f64 {
    let (blocking, advisory) = warnings.iter().fold((0usize, 0usize), |(b, a), w| {
        if w.is_blocking() {
            (b + 1, a)
        } else {
            (b, a + 1)
        }
    });
    let penalty = blocking as f64 * BLOCKING_PENALTY + advisory as f64 * ADVISORY_PENALTY;
    let derived = (1.0 - penalty).max(0.0);
    let self_reported = reported.iter().copied().fold(1.0_f64, f64::min);

    (derived.min(self_reported) * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn line(qty: &str, price: &str, total: &str) -> LineItemFields {
        LineItemFields {
            description: "item".to_string(),
            quantity: Some(dec(qty)),
            unit_price: Some(dec(price)),
            line_total: Some(dec(total)),
            line_type: LineType::Material,
            ..Default::default()
        }
    }

    fn header(subtotal: &str, delivery: &str, tax: &str, total: &str) -> QuoteFields {
        QuoteFields {
            subtotal: Some(dec(subtotal)),
            delivery_cost: Some(dec(delivery)),
            tax_amount: Some(dec(tax)),
            total_amount: Some(dec(total)),
            ..Default::default()
        }
    }

    #[test]
    fn totals_mismatch_yields_single_warning() {
        let items = vec![line("100", "6", "600"), line("50", "8", "400")];
        let report = Validator::default().validate(&header("1000", "50", "70", "1130"), true, &items, &[]);

        assert_eq!(report.warnings.len(), 1, "{:?}", report.warnings);
        let w = &report.warnings[0];
        assert_eq!(w.check, WarningCheck::TotalsReconciliation);
        assert_eq!(w.expected, Some(dec("1120")));
        assert_eq!(w.actual, Some(dec("1130")));
        assert_eq!(Validator::default().verdict(&report), Verdict::NeedsReview);
    }

    #[test]
    fn consistent_quote_is_clean() {
        let items = vec![line("100", "6", "600"), line("50", "8", "400")];
        let report = Validator::default().validate(&header("1000", "50", "70", "1120"), true, &items, &[0.93, 0.88]);

        assert!(report.warnings.is_empty());
        assert_eq!(report.overall_confidence, 0.88);
        assert_eq!(report.verdict(0.7), Verdict::Clean);
    }

    #[test]
    fn line_arithmetic_mismatch_is_blocking() {
        let items = vec![line("10", "5", "40"), line("2", "3", "6")];
        let report = Validator::default().validate(&QuoteFields::default(), true, &items, &[]);

        let warnings: Vec<_> = report.warnings_for(WarningCheck::LineArithmetic).collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].line, Some(0));
        assert_eq!(warnings[0].expected, Some(dec("50")));
        assert_eq!(warnings[0].actual, Some(dec("40")));
        assert_eq!(warnings[0].severity, Severity::Blocking);
        assert_eq!(report.overall_confidence, 0.75);
        assert_eq!(report.verdict(0.7), Verdict::NeedsReview);
    }

    #[test]
    fn line_total_after_discount_is_accepted() {
        let mut item = line("10", "5", "45");
        item.discount_pct = Some(dec("10"));
        let report = Validator::default().validate(&QuoteFields::default(), true, &[item], &[]);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn arithmetic_skipped_when_operand_missing() {
        let mut item = line("10", "5", "40");
        item.quantity = None;
        let report = Validator::default().validate(&QuoteFields::default(), true, &[item], &[]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn small_rounding_differences_are_tolerated() {
        let items = vec![line("3", "3.333", "10.00")];
        let report = Validator::default().validate(&QuoteFields::default(), true, &items, &[]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn subtotal_checked_against_material_lines() {
        let items = vec![line("1", "600", "600"), line("1", "300", "300")];
        let quote = QuoteFields {
            subtotal: Some(dec("1000")),
            ..Default::default()
        };
        let report = Validator::default().validate(&quote, true, &items, &[]);
        let w: Vec<_> = report.warnings_for(WarningCheck::SubtotalReconciliation).collect();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].expected, Some(dec("900")));
        assert_eq!(w[0].actual, Some(dec("1000")));
    }

    #[test]
    fn subtotal_may_include_fees_and_discounts() {
        let fee = LineItemFields {
            description: "cutting fee".to_string(),
            line_total: Some(dec("120")),
            line_type: LineType::Fee,
            ..Default::default()
        };
        let discount = LineItemFields {
            description: "loyalty".to_string(),
            line_total: Some(dec("20")),
            line_type: LineType::Discount,
            ..Default::default()
        };
        let items = vec![line("1", "900", "900"), fee, discount];
        let quote = QuoteFields {
            subtotal: Some(dec("1000")),
            ..Default::default()
        };
        let report = Validator::default().validate(&quote, true, &items, &[]);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn missing_fields_block() {
        let empty: Vec<LineItemFields> = Vec::new();
        let report = Validator::default().validate(&QuoteFields::default(), false, &empty, &[]);
        let checks: Vec<_> = report.warnings.iter().map(|w| w.check).collect();
        assert_eq!(checks, vec![WarningCheck::MissingSupplier, WarningCheck::MissingLineItems]);
        assert_eq!(report.overall_confidence, 0.5);
    }

    #[test]
    fn out_of_range_values_block() {
        let mut item = line("-1", "5", "-5");
        item.discount_pct = Some(dec("120"));
        let report = Validator::default().validate(&QuoteFields::default(), true, &[item], &[]);
        assert_eq!(report.warnings_for(WarningCheck::InvalidValue).count(), 2);
    }

    #[test]
    fn tax_rate_mismatch_is_advisory() {
        let items = vec![line("1", "1000", "1000")];
        let mut quote = header("1000", "0", "70", "1070");
        quote.tax_rate = Some(dec("8"));
        let report = Validator::default().validate(&quote, true, &items, &[]);

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].check, WarningCheck::TaxRateConsistency);
        assert!(!report.warnings[0].is_blocking());
        assert_eq!(report.overall_confidence, 0.9);
        assert_eq!(report.verdict(0.7), Verdict::Clean);
    }

    #[test]
    fn low_reported_confidence_needs_review() {
        let items = vec![line("1", "10", "10")];
        let report = Validator::default().validate(&QuoteFields::default(), true, &items, &[0.95, 0.42]);
        assert!(report.warnings.is_empty());
        assert_eq!(report.overall_confidence, 0.42);
        assert_eq!(report.verdict(0.7), Verdict::NeedsReview);
    }

    #[test]
    fn validation_is_deterministic() {
        let items = vec![line("10", "5", "40")];
        let quote = header("40", "5", "3", "50");
        let v = Validator::default();
        assert_eq!(v.validate(&quote, true, &items, &[0.9]), v.validate(&quote, true, &items, &[0.9]));
    }
}
