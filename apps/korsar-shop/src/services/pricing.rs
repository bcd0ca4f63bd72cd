//! Money arithmetic. Everything internal is integer kopecks; floats
//! only appear at the edges where a provider wants a decimal amount.

/// Half-up percentage discount in kopecks.
pub fn discounted_price(price_kop: i64, discount_percent: i64) -> i64 {
    if discount_percent <= 0 {
        return price_kop;
    }
    let discount = (price_kop * discount_percent.min(100) + 50) / 100;
    (price_kop - discount).max(0)
}

/// Referral reward, half-up.
pub fn referral_reward(amount_kop: i64, percent: i64) -> i64 {
    if percent <= 0 || amount_kop <= 0 {
        return 0;
    }
    (amount_kop * percent + 50) / 100
}

/// Telegram Stars price for a ruble amount. Rounds up so the shop is
/// never underpaid; a non-zero price always costs at least one star.
pub fn rub_to_stars(amount_kop: i64, rate_kop_per_star: i64) -> i64 {
    if amount_kop <= 0 || rate_kop_per_star <= 0 {
        return 0;
    }
    ((amount_kop + rate_kop_per_star - 1) / rate_kop_per_star).max(1)
}

/// Provider-facing decimal amount with an exchange margin on top, so
/// rate drift between invoice and confirmation stays covered.
pub fn rub_to_foreign(amount_kop: i64, rub_per_unit: f64, margin_percent: f64, decimals: u32) -> f64 {
    if amount_kop <= 0 || rub_per_unit <= 0.0 {
        return 0.0;
    }
    let rub = amount_kop as f64 / 100.0;
    let raw = rub / rub_per_unit * (1.0 + margin_percent / 100.0);
    let scale = 10f64.powi(decimals as i32);
    (raw * scale).ceil() / scale
}

/// Human ruble rendering: whole rubles without the fraction, kopecks
/// with two digits.
pub fn fmt_rub(amount_kop: i64) -> String {
    if amount_kop % 100 == 0 {
        format!("{} ₽", amount_kop / 100)
    } else {
        format!("{}.{:02} ₽", amount_kop / 100, (amount_kop % 100).abs())
    }
}

pub fn kop_to_decimal(amount_kop: i64) -> f64 {
    amount_kop as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_rounds_half_up() {
        // 10% off 99.99 -> discount 10.00 (999.9 rounds to 1000)
        assert_eq!(discounted_price(9999, 10), 8999);
        // 3% off 1.50 -> discount 0.05 (4.5 rounds up)
        assert_eq!(discounted_price(150, 3), 145);
        assert_eq!(discounted_price(150, 0), 150);
        assert_eq!(discounted_price(150, 100), 0);
        assert_eq!(discounted_price(150, 250), 0);
    }

    #[test]
    fn referral_reward_rounds_half_up() {
        assert_eq!(referral_reward(9999, 10), 1000);
        assert_eq!(referral_reward(101, 10), 10);
        assert_eq!(referral_reward(105, 10), 11);
        assert_eq!(referral_reward(0, 10), 0);
        assert_eq!(referral_reward(100, 0), 0);
    }

    #[test]
    fn stars_price_rounds_up_and_never_hits_zero() {
        // 150 RUB at 2.50 RUB per star -> 60 stars exactly
        assert_eq!(rub_to_stars(15000, 250), 60);
        // 150.01 RUB -> 61 stars
        assert_eq!(rub_to_stars(15001, 250), 61);
        // 1 kopeck still costs one star
        assert_eq!(rub_to_stars(1, 250), 1);
        assert_eq!(rub_to_stars(0, 250), 0);
    }

    #[test]
    fn foreign_amount_carries_margin_and_rounds_up() {
        // 800 RUB at 80 RUB/USD with 2% margin -> 10.20 USD
        assert_eq!(rub_to_foreign(80000, 80.0, 2.0, 2), 10.2);
        // Rounding is upward at the last decimal.
        assert_eq!(rub_to_foreign(10000, 300.0, 0.0, 2), 0.34);
        assert_eq!(rub_to_foreign(0, 80.0, 2.0, 2), 0.0);
    }

    #[test]
    fn ruble_formatting() {
        assert_eq!(fmt_rub(15000), "150 ₽");
        assert_eq!(fmt_rub(15050), "150.50 ₽");
        assert_eq!(fmt_rub(99), "0.99 ₽");
    }
}
