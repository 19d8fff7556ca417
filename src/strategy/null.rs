//! Strategy that never actuates.

use std::time::Duration;

use super::ControlStrategy;
use crate::actuator::Actuator;

/// No-op strategy; the loop still measures and prints.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStrategy;

impl ControlStrategy for NullStrategy {
    fn name(&self) -> &'static str {
        "null"
    }

    fn evaluate(
        &mut self,
        _actuators: &mut [Actuator],
        _measurements: &[f64],
        setpoints: &[Option<f64>],
        _dt: Duration,
    ) -> bool {
        !super::all_setpoints_none(setpoints)
    }

    fn output(&self) -> Option<Vec<f64>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::IdAllocator;

    #[test]
    fn test_null_never_mutates() {
        let mut ids = IdAllocator::new();
        let mut acts = vec![Actuator::integer(&mut ids, "a", 7)];
        let mut s = NullStrategy;
        assert!(s.evaluate(&mut acts, &[1.0], &[Some(50.0)], Duration::from_secs(1)));
        assert_eq!(acts[0].value_f64(), 7.0);
        assert!(s.output().is_none());
    }

    #[test]
    fn test_null_all_none_setpoints_returns_false() {
        let mut s = NullStrategy;
        assert!(!s.evaluate(&mut [], &[], &[None, None], Duration::from_secs(1)));
    }
}
