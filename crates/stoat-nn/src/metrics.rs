use std::fmt;
use std::time::Duration;

use stoat_core::{Error, Result, Tensor, TensorView};

// Test metrics and reporting

/// Summary of one `Network::test` run.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Number of examples tested.
    pub data_count: usize,
    /// Fraction of examples the interpreter accepted, in [0, 1].
    pub accuracy: f32,
    /// Average sum-of-squared-error cost per example.
    pub avg_cost: f32,
    /// Wall-clock time of the whole run.
    pub elapsed: Duration,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Data count: {}", self.data_count)?;
        writeln!(f, "Time taken: {} ms", self.elapsed.as_millis())?;
        writeln!(f, "Avg cost: {:.6}", self.avg_cost)?;
        write!(f, "Accuracy: {:.2}%", self.accuracy * 100.0)
    }
}

fn argmax(values: &[f32]) -> Result<usize> {
    let mut best = 0usize;
    let mut best_value = *values
        .first()
        .ok_or(Error::Uninitialized("argmax of an empty tensor"))?;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > best_value {
            best_value = v;
            best = i;
        }
    }
    Ok(best)
}

/// The default same-result interpreter for classification: do output and
/// label point at the same class (arg-max match)?
pub fn same_classification(output: &Tensor, label: &TensorView<'_>) -> Result<bool> {
    let actual = output.to_vec()?;
    let expected = label.to_vec()?;
    if actual.len() != expected.len() {
        return Err(Error::FormatMismatch {
            expected: output.format(),
            got: label.format(),
        });
    }
    Ok(argmax(&actual)? == argmax(&expected)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_picks_first_maximum() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9, 0.2]).unwrap(), 1);
        assert_eq!(argmax(&[3.0]).unwrap(), 0);
    }

    #[test]
    fn test_same_classification() {
        let output = Tensor::from_slice((1, 3, 1), &[0.1, 0.7, 0.2]).unwrap();
        let hit = Tensor::from_slice((1, 3, 1), &[0.0, 1.0, 0.0]).unwrap();
        let miss = Tensor::from_slice((1, 3, 1), &[1.0, 0.0, 0.0]).unwrap();
        assert!(same_classification(&output, &hit.view()).unwrap());
        assert!(!same_classification(&output, &miss.view()).unwrap());
    }

    #[test]
    fn test_result_display() {
        let r = TestResult {
            data_count: 10,
            accuracy: 0.8,
            avg_cost: 0.25,
            elapsed: Duration::from_millis(12),
        };
        let s = format!("{r}");
        assert!(s.contains("Data count: 10"));
        assert!(s.contains("Accuracy: 80.00%"));
    }
}
