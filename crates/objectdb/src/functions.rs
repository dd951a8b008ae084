//! Custom scalar/aggregate SQL bindings, installed on every
//! connection the database façade opens — the same "install right after
//! `open`, before anything else touches the connection" idiom this
//! codebase uses for its own SQL extensions (e.g. `regexp`).

use rusqlite::functions::{Aggregate, Context, FunctionFlags};
use rusqlite::Connection;

use crate::error::Result;

const FLAGS: FunctionFlags = FunctionFlags::SQLITE_UTF8.union(FunctionFlags::SQLITE_DETERMINISTIC);

pub fn install(conn: &Connection) -> Result<()> {
    conn.create_scalar_function("xor", -1, FLAGS, xor)?;
    conn.create_aggregate_function("std", 1, FLAGS, StdDev)?;
    Ok(())
}

/// `xor(i64...)`: left-fold bitwise xor over all arguments.
fn xor(ctx: &Context<'_>) -> rusqlite::Result<i64> {
    let mut acc: i64 = 0;
    for i in 0..ctx.len() {
        acc ^= ctx.get::<i64>(i)?;
    }
    Ok(acc)
}

/// `std(x)`: `sqrt(mean(square(x - mean)))`, computed with a deterministic,
/// order-independent two-pass accumulation (collect then reduce) rather than
/// Welford's single-pass recurrence, so floating-point rounding does not
/// depend on row visitation order.
#[derive(Default)]
struct StdState {
    values: Vec<f64>,
}

struct StdDev;

impl Aggregate<StdState, Option<f64>> for StdDev {
    fn init(&self, _ctx: &mut Context<'_>) -> rusqlite::Result<StdState> {
        Ok(StdState::default())
    }

    fn step(&self, ctx: &mut Context<'_>, state: &mut StdState) -> rusqlite::Result<()> {
        state.values.push(ctx.get::<f64>(0)?);
        Ok(())
    }

    fn finalize(
        &self,
        _ctx: &mut Context<'_>,
        state: Option<StdState>,
    ) -> rusqlite::Result<Option<f64>> {
        let values = match state {
            Some(state) if !state.values.is_empty() => state.values,
            _ => return Ok(None),
        };
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        Ok(Some(variance.sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_left_folds() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        let result: i64 = conn
            .query_row("SELECT xor(1, 2, 4)", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, 1 ^ 2 ^ 4);
    }

    #[test]
    fn std_matches_known_sample_deviation() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        conn.execute_batch(
            "CREATE TABLE nums(x);
             INSERT INTO nums VALUES (1), (2), (3), (4), (5);",
        )
        .unwrap();
        let result: f64 = conn
            .query_row("SELECT std(x) FROM nums", [], |row| row.get(0))
            .unwrap();
        assert!((result - 2f64.sqrt()).abs() < 1e-9, "got {result}");
    }

    #[test]
    fn std_of_single_row_is_zero() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        conn.execute_batch("CREATE TABLE nums(x); INSERT INTO nums VALUES (7);")
            .unwrap();
        let result: f64 = conn
            .query_row("SELECT std(x) FROM nums", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, 0.0);
    }

    #[test]
    fn std_of_no_rows_is_null() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        conn.execute_batch("CREATE TABLE nums(x);").unwrap();
        let result: Option<f64> = conn
            .query_row("SELECT std(x) FROM nums", [], |row| row.get(0))
            .unwrap();
        assert_eq!(result, None);
    }
}
