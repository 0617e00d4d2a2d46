//! 订单号校验
//!
//! 订单号必须是通过 Luhn 校验和的纯数字串。

use crate::error::{LoyaltyError, Result};

/// 校验订单号
///
/// 从右往左每隔一位乘 2（结果大于 9 时减 9），所有位求和后能被 10 整除即有效。
/// 空串或包含非数字字符同样视为无效订单号。
pub fn validate_order_number(number: &str) -> Result<()> {
    let invalid = || LoyaltyError::InvalidOrderNumber {
        number: number.to_string(),
    };

    if number.is_empty() {
        return Err(invalid());
    }

    let mut sum: u32 = 0;
    for (position, ch) in number.chars().rev().enumerate() {
        let digit = ch.to_digit(10).ok_or_else(invalid)?;
        sum += if position % 2 == 1 {
            let doubled = digit * 2;
            if doubled > 9 { doubled - 9 } else { doubled }
        } else {
            digit
        };
    }

    if sum % 10 == 0 { Ok(()) } else { Err(invalid()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_order_numbers() {
        let valid = [
            "4242424242424242",
            "4012888888881881",
            "5496198584584769",
            "5555555555554444",
            "4111110000000112",
            "4000000000000069",
            "4000000000000002",
            "5105105105105100",
            "620282061",
            "79927398713",
        ];

        for number in valid {
            assert!(
                validate_order_number(number).is_ok(),
                "{number} 应通过校验"
            );
        }
    }

    #[test]
    fn test_invalid_order_numbers() {
        for number in ["123", "0001", "510510510517777", "79927398710"] {
            let err = validate_order_number(number).unwrap_err();
            assert!(
                matches!(err, LoyaltyError::InvalidOrderNumber { number: ref n } if n == number),
                "{number} 应被拒绝"
            );
        }
    }

    #[test]
    fn test_non_digit_and_empty_rejected() {
        assert!(matches!(
            validate_order_number(""),
            Err(LoyaltyError::InvalidOrderNumber { .. })
        ));
        assert!(matches!(
            validate_order_number("4242-4242"),
            Err(LoyaltyError::InvalidOrderNumber { .. })
        ));
    }
}
