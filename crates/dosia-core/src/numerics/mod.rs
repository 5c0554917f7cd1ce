#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extrapolation {
    /// Continue the boundary segment's gradient past the table ends.
    Linear,
    /// Hold the nearest endpoint's value past the table ends.
    Hold,
}

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for &value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

/// Piecewise-linear lookup of `x` over a non-decreasing `x_grid`.
///
/// Returns `None` for grids shorter than two points, mismatched lengths or
/// grids that are not sorted ascending.
pub fn interpolate_piecewise(
    x: f64,
    x_grid: &[f64],
    y_grid: &[f64],
    extrapolation: Extrapolation,
) -> Option<f64> {
    if x_grid.len() < 2 || x_grid.len() != y_grid.len() {
        return None;
    }

    if !x_grid.windows(2).all(|window| window[0] <= window[1]) {
        return None;
    }

    let last_segment = x_grid.len() - 2;
    let lower = if x >= x_grid[last_segment] {
        last_segment
    } else {
        x_grid
            .windows(2)
            .position(|window| x <= window[1])
            .unwrap_or(last_segment)
    };

    let (x0, x1) = (x_grid[lower], x_grid[lower + 1]);
    let (mut y0, mut y1) = (y_grid[lower], y_grid[lower + 1]);
    if extrapolation == Extrapolation::Hold {
        if x < x0 {
            y1 = y0;
        }
        if x > x1 {
            y0 = y1;
        }
    }

    if x1 == x0 {
        return Some(if x < x0 { y0 } else { y1 });
    }

    let gradient = (y1 - y0) / (x1 - x0);
    Some(y0 + gradient * (x - x0))
}

pub fn within_closed_range(value: f64, lower: f64, upper: f64) -> bool {
    value >= lower && value <= upper
}

#[cfg(test)]
mod tests {
    use super::{Extrapolation, interpolate_piecewise, stable_sum, within_closed_range};

    #[test]
    fn stable_sum_reduces_order_loss_for_large_and_small_values() {
        let input = [1.0e16, 1.0, -1.0e16];
        assert_eq!(stable_sum(&input), 0.0);
    }

    #[test]
    fn interpolation_inside_the_table_is_linear() {
        let x_grid = [0.0, 1.0, 3.0];
        let y_grid = [10.0, 20.0, 40.0];

        for extrapolation in [Extrapolation::Linear, Extrapolation::Hold] {
            assert_eq!(
                interpolate_piecewise(0.5, &x_grid, &y_grid, extrapolation),
                Some(15.0)
            );
            assert_eq!(
                interpolate_piecewise(2.0, &x_grid, &y_grid, extrapolation),
                Some(30.0)
            );
            assert_eq!(
                interpolate_piecewise(3.0, &x_grid, &y_grid, extrapolation),
                Some(40.0)
            );
        }
    }

    #[test]
    fn linear_extrapolation_continues_boundary_gradients() {
        let x_grid = [0.0, 1.0, 3.0];
        let y_grid = [10.0, 20.0, 40.0];

        assert_eq!(
            interpolate_piecewise(-1.0, &x_grid, &y_grid, Extrapolation::Linear),
            Some(0.0)
        );
        assert_eq!(
            interpolate_piecewise(5.0, &x_grid, &y_grid, Extrapolation::Linear),
            Some(60.0)
        );
    }

    #[test]
    fn hold_extrapolation_keeps_endpoint_values() {
        let x_grid = [0.0, 1.0, 3.0];
        let y_grid = [10.0, 20.0, 40.0];

        assert_eq!(
            interpolate_piecewise(-1.0, &x_grid, &y_grid, Extrapolation::Hold),
            Some(10.0)
        );
        assert_eq!(
            interpolate_piecewise(5.0, &x_grid, &y_grid, Extrapolation::Hold),
            Some(40.0)
        );
    }

    #[test]
    fn interpolation_rejects_invalid_grids() {
        assert_eq!(
            interpolate_piecewise(0.5, &[0.0], &[1.0], Extrapolation::Linear),
            None
        );
        assert_eq!(
            interpolate_piecewise(0.5, &[0.0, 1.0], &[1.0], Extrapolation::Linear),
            None
        );
        assert_eq!(
            interpolate_piecewise(0.5, &[0.0, 2.0, 1.0], &[0.0, 2.0, 1.0], Extrapolation::Hold),
            None
        );
    }

    #[test]
    fn closed_range_includes_bounds() {
        assert!(within_closed_range(0.9999, 0.9999, 1.0001));
        assert!(within_closed_range(1.0001, 0.9999, 1.0001));
        assert!(!within_closed_range(0.5, 0.9999, 1.0001));
    }
}
