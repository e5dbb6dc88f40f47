//! Volume-matching wash detection over a contiguous trade slice.
//!
//! A slice is one (SCC, token, time-window) partition of the canonical
//! table, in timestamp order. The engine finds the longest prefix whose
//! per-account net position, normalized by the prefix's mean trade amount,
//! stays within the margin for every account.

use std::collections::HashMap;

/// Length of the longest balanced prefix of `rows`, or 0 if none balances.
///
/// `rows` holds table row indices; `buyers`, `sellers`, and `amounts` are
/// the full table columns those indices point into. Amounts are assumed
/// non-negative and finite (the preprocessor enforces this).
///
/// Runs one forward pass to accumulate per-account balances, then walks the
/// prefix length down from `n`, backing one trade out per step, until the
/// balance predicate holds.
pub fn longest_balanced_prefix(
    rows: &[usize],
    buyers: &[u32],
    sellers: &[u32],
    amounts: &[f64],
    margin: f64,
) -> usize {
    let n = rows.len();
    if n == 0 {
        return 0;
    }

    let mut balance: HashMap<u32, f64> = HashMap::new();
    let mut running_sum = 0.0;
    for &row in rows {
        let amount = amounts[row];
        running_sum += amount;
        *balance.entry(buyers[row]).or_insert(0.0) += amount;
        *balance.entry(sellers[row]).or_insert(0.0) -= amount;
    }

    let mut k = n;
    loop {
        if is_balanced(&balance, running_sum, k, margin) {
            return k;
        }
        if k == 1 {
            return 0;
        }

        // back out trade k-1
        let row = rows[k - 1];
        let amount = amounts[row];
        running_sum -= amount;
        if let Some(buyer_balance) = balance.get_mut(&buyers[row]) {
            *buyer_balance -= amount;
        }
        if let Some(seller_balance) = balance.get_mut(&sellers[row]) {
            *seller_balance += amount;
        }
        k -= 1;
    }
}

/// Balance predicate for a prefix of length `k`.
///
/// With a zero mean (all amounts zero) the prefix is balanced only if every
/// account nets exactly zero; otherwise each |balance| / mean must stay
/// within the margin.
fn is_balanced(balance: &HashMap<u32, f64>, running_sum: f64, k: usize, margin: f64) -> bool {
    let mean = running_sum / k as f64;
    if mean == 0.0 {
        return balance.values().all(|net| *net == 0.0);
    }
    balance.values().all(|net| (net / mean).abs() <= margin)
}
