use bigdecimal::{BigDecimal, Zero};

/// 折后单价保留的小数位
pub const PRICE_SCALE: i64 = 4;

/// 计算折后单价
///
/// 优先级: 单价为空 → None; 折扣率 > 0 → `单价 × (1 - 折扣率/100)`;
/// 折扣金额 > 0 且数量 > 0 → `单价 - 折扣金额/数量`; 否则原单价。
/// 结果不低于 0, 并四舍五入到 4 位小数, 避免反复重算产生漂移。
pub fn effective_unit_price(
    unit_price: Option<&BigDecimal>,
    discount_pct: Option<&BigDecimal>,
    discount_amount: Option<&BigDecimal>,
    quantity: Option<&BigDecimal>,
) -> Option<BigDecimal> {
    let unit_price = unit_price?;
    let zero = BigDecimal::zero();

    let raw = match (discount_pct, discount_amount, quantity) {
        (Some(pct), _, _) if *pct > zero => {
            let factor = BigDecimal::from(1) - pct / BigDecimal::from(100);
            unit_price * factor
        }
        (_, Some(amount), Some(qty)) if *amount > zero && *qty > zero => unit_price - amount / qty,
        _ => unit_price.clone(),
    };

    let floored = if raw < zero { zero } else { raw };
    Some(floored.round(PRICE_SCALE))
}
