use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 校验项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCheck {
    LineArithmetic,
    SubtotalReconciliation,
    TotalsReconciliation,
    TaxRateConsistency,
    MissingSupplier,
    MissingLineItems,
    InvalidValue,
}

impl WarningCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LineArithmetic => "line_arithmetic",
            Self::SubtotalReconciliation => "subtotal_reconciliation",
            Self::TotalsReconciliation => "totals_reconciliation",
            Self::TaxRateConsistency => "tax_rate_consistency",
            Self::MissingSupplier => "missing_supplier",
            Self::MissingLineItems => "missing_line_items",
            Self::InvalidValue => "invalid_value",
        }
    }
}

impl fmt::Display for WarningCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// 仅提示, 只影响置信度
    Advisory,
    /// 必须人工复核
    Blocking,
}

/// 校验告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub check: WarningCheck,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<BigDecimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<BigDecimal>,
    /// 对应明细行的下标 (按 sort_order 排列后的位置)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Warning {
    pub fn blocking(check: WarningCheck, message: impl Into<String>) -> Self {
        Self {
            check,
            severity: Severity::Blocking,
            message: message.into(),
            expected: None,
            actual: None,
            line: None,
        }
    }

    pub fn advisory(check: WarningCheck, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Advisory,
            ..Self::blocking(check, message)
        }
    }

    pub fn with_values(mut self, expected: BigDecimal, actual: BigDecimal) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}
