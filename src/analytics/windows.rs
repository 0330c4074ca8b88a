//! Windowing strategies that supply slices to primitives.

/// Fixed-length trailing window (e.g., rolling sum of squared returns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    size: usize,
}

impl FixedWindow {
    /// Creates a window holding the `size` most recent values (at least one).
    pub fn new(size: usize) -> Self {
        FixedWindow { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Applies the primitive to complete windows only.
    ///
    /// The output has `data.len() - size + 1` values (empty when the data is
    /// shorter than the window); value `k` covers `data[k..k + size]`.
    pub fn apply_complete<F>(&self, data: &[f64], primitive: F) -> Vec<f64>
    where
        F: FnMut(&[f64]) -> f64,
    {
        data.windows(self.size).map(primitive).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::FixedWindow;

    #[test]
    fn complete_windows_drop_the_prefix() {
        let window = FixedWindow::new(3);
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let result = window.apply_complete(&data, |slice| slice.iter().sum());
        assert_eq!(result, vec![6.0, 9.0]);
        assert!(window.apply_complete(&[1.0, 2.0], |s| s[0]).is_empty());
    }

    #[test]
    fn zero_size_is_clamped_to_one() {
        assert_eq!(FixedWindow::new(0).size(), 1);
    }
}
