//! Pickup identifier generation
//!
//! A 3-digit pickup number and a 4-digit PIN identify the order at physical
//! handoff. Both must be unique within the order date; we rejection-sample
//! against the orders table and fall back to a time-derived value if the
//! space is exhausted.

use chrono::{NaiveDate, Utc};
use rand::Rng;
use sqlx::{Postgres, Transaction};

use crate::Result;

const MAX_ATTEMPTS: u32 = 100;

async fn pickup_number_taken(
    tx: &mut Transaction<'_, Postgres>,
    order_date: NaiveDate,
    candidate: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM orders WHERE order_date = $1 AND pickup_number = $2",
    )
    .bind(order_date)
    .bind(candidate)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count > 0)
}

async fn pin_code_taken(
    tx: &mut Transaction<'_, Postgres>,
    order_date: NaiveDate,
    candidate: &str,
) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE order_date = $1 AND pin_code = $2")
            .bind(order_date)
            .bind(candidate)
            .fetch_one(&mut **tx)
            .await?;
    Ok(count > 0)
}

/// Generate a pickup number unique within the order date: 001-999.
pub async fn generate_pickup_number(
    tx: &mut Transaction<'_, Postgres>,
    order_date: NaiveDate,
) -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = format!("{:03}", rand::thread_rng().gen_range(1..=999));
        if !pickup_number_taken(tx, order_date, &candidate).await? {
            return Ok(candidate);
        }
    }

    // All sampled numbers taken: derive from the clock
    let stamp = Utc::now().format("%H%M%S").to_string();
    Ok(stamp[stamp.len() - 3..].to_string())
}

/// Generate a PIN code unique within the order date: 1000-9999.
pub async fn generate_pin_code(
    tx: &mut Transaction<'_, Postgres>,
    order_date: NaiveDate,
) -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let candidate = format!("{}", rand::thread_rng().gen_range(1000..=9999));
        if !pin_code_taken(tx, order_date, &candidate).await? {
            return Ok(candidate);
        }
    }

    // Fallback: current second plus two random digits
    let suffix = rand::thread_rng().gen_range(10..=99);
    Ok(format!("{}{}", Utc::now().format("%S"), suffix))
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_pickup_number_format() {
        use rand::Rng;
        for _ in 0..100 {
            let candidate = format!("{:03}", rand::thread_rng().gen_range(1..=999));
            assert_eq!(candidate.len(), 3);
            let value: u32 = candidate.parse().unwrap();
            assert!((1..=999).contains(&value));
        }
    }

    #[test]
    fn test_pin_code_format() {
        use rand::Rng;
        for _ in 0..100 {
            let candidate = format!("{}", rand::thread_rng().gen_range(1000..=9999));
            assert_eq!(candidate.len(), 4);
        }
    }
}
