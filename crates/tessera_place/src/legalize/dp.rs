//! Order-preserving column placement by dynamic programming.
//!
//! Units of one column are taken in order of their target coordinate and
//! laid onto rows without changing that order. With `f[i][j]` the cheapest
//! way to place the first `i` units within rows `0..j`:
//!
//! ```text
//! f[i][j] = min(f[i][j-1], f[i-1][j-h] + cost(i-1, j-h))
//! ```
//!
//! where `h` is the row span of unit `i-1` and the second term requires a
//! valid footprint starting at row `j-h`.

/// Chooses a start row for every unit, or `None` if they cannot all fit.
///
/// `spans[i]` is the row span of unit `i`; `valid(i, row)` says whether unit
/// `i` may start at `row`; `cost(i, row)` prices that start. Ties keep the
/// lowest rows.
pub fn place_in_order(
    spans: &[usize],
    rows: usize,
    valid: impl Fn(usize, usize) -> bool,
    cost: impl Fn(usize, usize) -> f64,
) -> Option<Vec<usize>> {
    let n = spans.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let width = rows + 1;
    let mut f = vec![f64::INFINITY; (n + 1) * width];
    let mut take = vec![false; (n + 1) * width];
    for j in 0..=rows {
        f[j] = 0.0;
    }
    for i in 1..=n {
        let h = spans[i - 1].max(1);
        for j in 1..=rows {
            let mut best = f[i * width + j - 1];
            if j >= h && valid(i - 1, j - h) {
                let prev = f[(i - 1) * width + j - h];
                if prev.is_finite() {
                    let candidate = prev + cost(i - 1, j - h);
                    if candidate < best {
                        best = candidate;
                        take[i * width + j] = true;
                    }
                }
            }
            f[i * width + j] = best;
        }
    }
    if !f[n * width + rows].is_finite() {
        return None;
    }

    let mut starts = vec![0; n];
    let (mut i, mut j) = (n, rows);
    while i > 0 {
        if take[i * width + j] {
            let h = spans[i - 1].max(1);
            starts[i - 1] = j - h;
            j -= h;
            i -= 1;
        } else {
            j -= 1;
        }
    }
    Some(starts)
}
