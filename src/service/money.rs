//! 金额舍入工具
//!
//! 日伙食费按整数货币单位四舍五入; 其他金额最多保留两位小数。

use bigdecimal::{BigDecimal, Zero};

/// 金额展示精度
const CURRENCY_SCALE: i64 = 2;

fn half_unit(scale: i64) -> BigDecimal {
    // 0.5 * 10^-scale, 精确除法
    BigDecimal::from(1) / BigDecimal::from(2 * 10i64.pow(scale as u32))
}

/// 四舍五入 (远离零) 到 `scale` 位小数
pub fn round_half_up(value: &BigDecimal, scale: i64) -> BigDecimal {
    let (_, current_scale) = value.as_bigint_and_exponent();
    if current_scale <= scale {
        return value.clone();
    }
    if *value < BigDecimal::zero() {
        let positive = -value.clone();
        return -round_half_up(&positive, scale);
    }
    // with_scale 向零截断
    (value + half_unit(scale)).with_scale(scale)
}

/// 整数货币单位
pub fn round_to_unit(value: &BigDecimal) -> BigDecimal {
    round_half_up(value, 0)
}

/// 最多两位小数
pub fn round_currency(value: &BigDecimal) -> BigDecimal {
    round_half_up(value, CURRENCY_SCALE)
}

pub fn clamp_non_negative(value: BigDecimal) -> BigDecimal {
    if value < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        value
    }
}
