//! Conversion pricing against the base currency.
//!
//! Every quote is a bid/ask against the base currency, so a pair either has
//! the base currency on one side (a single leg) or is routed through it (two
//! legs). All amounts are rounded half-up to wallet scale at each leg.

use kantor_common::{
    max_amount, round_amount, round_rate, within_amount_range, Currency, RateQuote,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FxError, FxResult};

/// How a pair is priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionPath {
    /// Base into foreign: the user pays the ask.
    BuyForeign { currency: Currency },
    /// Foreign into base: the user receives the bid.
    SellForeign { currency: Currency },
    /// Foreign into foreign, pivoting through the base currency.
    Cross { from: Currency, to: Currency },
}

impl ConversionPath {
    /// Pick the path for a pair.
    pub fn resolve(base: &Currency, from: &Currency, to: &Currency) -> FxResult<Self> {
        if from == to {
            return Err(FxError::SameCurrency(from.clone()));
        }
        Ok(if from == base {
            ConversionPath::BuyForeign {
                currency: to.clone(),
            }
        } else if to == base {
            ConversionPath::SellForeign {
                currency: from.clone(),
            }
        } else {
            ConversionPath::Cross {
                from: from.clone(),
                to: to.clone(),
            }
        })
    }

    /// Currencies whose quotes are needed, in the order `Conversion::compute` expects.
    pub fn quoted_currencies(&self) -> Vec<&Currency> {
        match self {
            ConversionPath::BuyForeign { currency } | ConversionPath::SellForeign { currency } => {
                vec![currency]
            }
            ConversionPath::Cross { from, to } => vec![from, to],
        }
    }

    pub fn is_cross(&self) -> bool {
        matches!(self, ConversionPath::Cross { .. })
    }
}

/// A priced conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    pub from_currency: Currency,
    pub to_currency: Currency,
    /// Amount debited, at wallet scale.
    pub amount: Decimal,
    /// Amount credited, at wallet scale.
    pub target_amount: Decimal,
    /// Rate recorded on the transaction, at quote scale.
    pub applied_rate: Decimal,
    /// Intermediate base-currency amount of a cross conversion.
    pub base_amount: Option<Decimal>,
    pub path: ConversionPath,
    /// Quotes used, in path order.
    pub quotes: Vec<RateQuote>,
}

impl Conversion {
    /// Price `amount` along `path` with the given quotes.
    pub fn compute(
        base: &Currency,
        path: ConversionPath,
        amount: Decimal,
        quotes: Vec<RateQuote>,
    ) -> FxResult<Self> {
        let expected = path.quoted_currencies();
        if quotes.len() != expected.len() {
            return Err(FxError::InvalidQuote {
                currency: expected.first().map(|c| (*c).clone()).unwrap_or_else(|| base.clone()),
                reason: format!("expected {} quote(s), got {}", expected.len(), quotes.len()),
            });
        }
        for (quote, currency) in quotes.iter().zip(expected.iter()) {
            check_quote(quote, currency)?;
        }

        let amount = checked_leg(Some(amount))?;
        let (from_currency, to_currency, target_amount, applied_rate, base_amount) = match &path {
            ConversionPath::BuyForeign { currency } => {
                let ask = quotes[0].ask;
                let target = checked_leg(amount.checked_div(ask))?;
                (base.clone(), currency.clone(), target, ask, None)
            }
            ConversionPath::SellForeign { currency } => {
                let bid = quotes[0].bid;
                let target = checked_leg(amount.checked_mul(bid))?;
                (currency.clone(), base.clone(), target, bid, None)
            }
            ConversionPath::Cross { from, to } => {
                let base_amount = checked_leg(amount.checked_mul(quotes[0].bid))?;
                let target = checked_leg(base_amount.checked_div(quotes[1].ask))?;
                let effective = target.checked_div(amount).unwrap_or(Decimal::ZERO);
                (from.clone(), to.clone(), target, effective, Some(base_amount))
            }
        };

        Ok(Self {
            from_currency,
            to_currency,
            amount,
            target_amount,
            applied_rate: round_rate(applied_rate),
            base_amount,
            path,
            quotes,
        })
    }
}

/// Round one leg to wallet scale, refusing results a balance cannot hold.
fn checked_leg(value: Option<Decimal>) -> FxResult<Decimal> {
    match value {
        Some(v) if within_amount_range(v) => Ok(round_amount(v)),
        Some(v) => Err(FxError::AmountOutOfRange(format!(
            "{} exceeds the maximum of {}",
            v,
            max_amount()
        ))),
        None => Err(FxError::AmountOutOfRange("arithmetic overflow".to_string())),
    }
}

fn check_quote(quote: &RateQuote, currency: &Currency) -> FxResult<()> {
    if &quote.currency != currency {
        return Err(FxError::InvalidQuote {
            currency: currency.clone(),
            reason: format!("received quote for {}", quote.currency),
        });
    }
    if quote.bid <= Decimal::ZERO || quote.ask <= Decimal::ZERO {
        return Err(FxError::InvalidQuote {
            currency: currency.clone(),
            reason: format!("non-positive bid/ask {}/{}", quote.bid, quote.ask),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kantor_common::{ExchangeRate, AMOUNT_SCALE};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn quote(code: Currency, bid: Decimal, ask: Decimal) -> RateQuote {
        ExchangeRate::new(
            code,
            None,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            bid,
            ask,
        )
        .quote()
    }

    #[test]
    fn test_resolve_paths() {
        let pln = Currency::pln();
        assert_eq!(
            ConversionPath::resolve(&pln, &pln, &Currency::usd()).unwrap(),
            ConversionPath::BuyForeign {
                currency: Currency::usd()
            }
        );
        assert_eq!(
            ConversionPath::resolve(&pln, &Currency::usd(), &pln).unwrap(),
            ConversionPath::SellForeign {
                currency: Currency::usd()
            }
        );
        assert!(ConversionPath::resolve(&pln, &Currency::eur(), &Currency::usd())
            .unwrap()
            .is_cross());
        assert!(matches!(
            ConversionPath::resolve(&pln, &pln, &pln),
            Err(FxError::SameCurrency(_))
        ));
    }

    #[test]
    fn test_buy_uses_ask() {
        let pln = Currency::pln();
        let path = ConversionPath::resolve(&pln, &pln, &Currency::usd()).unwrap();
        let conversion = Conversion::compute(
            &pln,
            path,
            dec!(100),
            vec![quote(Currency::usd(), dec!(3.90), dec!(4.00))],
        )
        .unwrap();

        assert_eq!(conversion.target_amount, dec!(25.00));
        assert_eq!(conversion.applied_rate.to_string(), "4.000000");
        assert_eq!(conversion.base_amount, None);
    }

    #[test]
    fn test_sell_uses_bid() {
        let pln = Currency::pln();
        let path = ConversionPath::resolve(&pln, &Currency::usd(), &pln).unwrap();
        let conversion = Conversion::compute(
            &pln,
            path,
            dec!(50),
            vec![quote(Currency::usd(), dec!(4.00), dec!(4.10))],
        )
        .unwrap();

        assert_eq!(conversion.target_amount.to_string(), "200.00");
        assert_eq!(conversion.from_currency, Currency::usd());
        assert_eq!(conversion.to_currency, pln);
    }

    #[test]
    fn test_cross_pivots_through_base() {
        let pln = Currency::pln();
        let path = ConversionPath::resolve(&pln, &Currency::eur(), &Currency::usd()).unwrap();
        let conversion = Conversion::compute(
            &pln,
            path,
            dec!(10),
            vec![
                quote(Currency::eur(), dec!(4.30), dec!(4.40)),
                quote(Currency::usd(), dec!(3.90), dec!(4.00)),
            ],
        )
        .unwrap();

        assert_eq!(conversion.base_amount, Some(dec!(43.00)));
        assert_eq!(conversion.target_amount, dec!(10.75));
        assert_eq!(conversion.applied_rate.to_string(), "1.075000");
    }

    #[test]
    fn test_rounding_is_half_up() {
        let pln = Currency::pln();
        let path = ConversionPath::resolve(&pln, &pln, &Currency::usd()).unwrap();
        // 0.01 / 2 = 0.005 rounds up to 0.01
        let conversion = Conversion::compute(
            &pln,
            path,
            dec!(0.01),
            vec![quote(Currency::usd(), dec!(1.9), dec!(2))],
        )
        .unwrap();
        assert_eq!(conversion.target_amount, dec!(0.01));
    }

    #[test]
    fn test_rejects_bad_quotes() {
        let pln = Currency::pln();
        let path = ConversionPath::resolve(&pln, &pln, &Currency::usd()).unwrap();

        let wrong = Conversion::compute(
            &pln,
            path.clone(),
            dec!(10),
            vec![quote(Currency::eur(), dec!(4), dec!(4))],
        );
        assert!(matches!(wrong, Err(FxError::InvalidQuote { .. })));

        let zero = Conversion::compute(
            &pln,
            path.clone(),
            dec!(10),
            vec![quote(Currency::usd(), dec!(4), Decimal::ZERO)],
        );
        assert!(matches!(zero, Err(FxError::InvalidQuote { .. })));

        let missing = Conversion::compute(&pln, path, dec!(10), vec![]);
        assert!(matches!(missing, Err(FxError::InvalidQuote { .. })));
    }

    #[test]
    fn test_amounts_beyond_wallet_range_are_refused() {
        let pln = Currency::pln();
        let usd = quote(Currency::usd(), dec!(4.00), dec!(4.10));
        let sell = ConversionPath::resolve(&pln, &Currency::usd(), &pln).unwrap();

        let too_large = Conversion::compute(&pln, sell.clone(), max_amount(), vec![usd.clone()]);
        assert!(matches!(too_large, Err(FxError::AmountOutOfRange(_))));

        let overflow = Conversion::compute(&pln, sell, Decimal::MAX, vec![usd]);
        let err: kantor_common::ExchangeError = overflow.unwrap_err().into();
        assert_eq!(err.error_code(), "INVALID_AMOUNT");
    }

    fn cents() -> impl Strategy<Value = Decimal> {
        (1i64..10_000_000).prop_map(|c| Decimal::new(c, 2))
    }

    fn quote_value() -> impl Strategy<Value = Decimal> {
        (1_000i64..100_000_000).prop_map(|v| Decimal::new(v, 6))
    }

    proptest! {
        #[test]
        fn prop_targets_are_wallet_scale_and_monotonic(
            a in cents(),
            b in cents(),
            bid in quote_value(),
            spread in 0i64..1_000_000,
        ) {
            let pln = Currency::pln();
            let ask = bid + Decimal::new(spread, 6);
            let usd = quote(Currency::usd(), bid, ask);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

            for path in [
                ConversionPath::BuyForeign { currency: Currency::usd() },
                ConversionPath::SellForeign { currency: Currency::usd() },
            ] {
                let low = Conversion::compute(&pln, path.clone(), lo, vec![usd.clone()]).unwrap();
                let high = Conversion::compute(&pln, path, hi, vec![usd.clone()]).unwrap();

                prop_assert_eq!(low.target_amount.scale(), AMOUNT_SCALE);
                prop_assert!(low.target_amount >= Decimal::ZERO);
                prop_assert!(low.target_amount <= high.target_amount);
            }
        }

        #[test]
        fn prop_cross_matches_two_single_legs(
            amount in cents(),
            eur_bid in quote_value(),
            usd_ask in quote_value(),
        ) {
            let pln = Currency::pln();
            let eur = quote(Currency::eur(), eur_bid, eur_bid);
            let usd = quote(Currency::usd(), usd_ask, usd_ask);

            let sell = Conversion::compute(
                &pln,
                ConversionPath::SellForeign { currency: Currency::eur() },
                amount,
                vec![eur.clone()],
            ).unwrap();
            let buy = Conversion::compute(
                &pln,
                ConversionPath::BuyForeign { currency: Currency::usd() },
                sell.target_amount,
                vec![usd.clone()],
            ).unwrap();
            let cross = Conversion::compute(
                &pln,
                ConversionPath::Cross { from: Currency::eur(), to: Currency::usd() },
                amount,
                vec![eur, usd],
            ).unwrap();

            prop_assert_eq!(cross.base_amount, Some(sell.target_amount));
            prop_assert_eq!(cross.target_amount, buy.target_amount);
        }
    }
}
