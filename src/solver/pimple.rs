use serde::{Deserialize, Serialize};

/// Iteration counts of the merged PISO/SIMPLE outer loop.
///
/// `n_outer_correctors = 1` gives plain PISO behaviour;
/// `n_non_orthogonal_correctors` counts the *extra* passes beyond the one
/// solve every corrector performs.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PimpleConfig {
    pub n_outer_correctors: usize,
    pub n_correctors: usize,
    pub n_non_orthogonal_correctors: usize,
}

impl Default for PimpleConfig {
    fn default() -> Self {
        Self {
            n_outer_correctors: 1,
            n_correctors: 2,
            n_non_orthogonal_correctors: 0,
        }
    }
}

/// One pass of the non-orthogonal correction loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonOrthPass {
    pub index: usize,
    pub is_final: bool,
}

/// Where the outer controller currently is, passed into the corrector as
/// an explicit value instead of ambient state: outer iteration index,
/// inner (pressure-corrector) index, and the non-orthogonal pass count.
#[derive(Clone, Copy, Debug)]
pub struct IterationContext {
    outer: usize,
    n_outer: usize,
    inner: usize,
    n_inner: usize,
    non_orth_passes: usize,
}

impl IterationContext {
    pub fn new(config: &PimpleConfig, outer: usize, inner: usize) -> Self {
        debug_assert!(outer < config.n_outer_correctors);
        debug_assert!(inner < config.n_correctors);
        Self {
            outer,
            n_outer: config.n_outer_correctors,
            inner,
            n_inner: config.n_correctors,
            non_orth_passes: config.n_non_orthogonal_correctors + 1,
        }
    }

    /// Override the number of non-orthogonal passes, including down to
    /// zero (the corrector then falls back to the provisional flux).
    pub fn with_non_orth_passes(mut self, passes: usize) -> Self {
        self.non_orth_passes = passes;
        self
    }

    pub fn outer_index(&self) -> usize {
        self.outer
    }

    pub fn inner_index(&self) -> usize {
        self.inner
    }

    pub fn final_outer_iter(&self) -> bool {
        self.outer + 1 == self.n_outer
    }

    /// True on the very last pressure solve of the time step; selects the
    /// tight solver tolerance tier.
    pub fn final_inner_iter(&self) -> bool {
        self.final_outer_iter() && self.inner + 1 == self.n_inner
    }

    /// The non-orthogonal passes to run, the last one flagged final.
    pub fn non_orthogonal_passes(&self) -> impl Iterator<Item = NonOrthPass> {
        let n = self.non_orth_passes;
        (0..n).map(move |index| NonOrthPass {
            index,
            is_final: index + 1 == n,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_runs_one_pass() {
        let cfg = PimpleConfig::default();
        let ctx = IterationContext::new(&cfg, 0, 0);
        let passes: Vec<_> = ctx.non_orthogonal_passes().collect();
        assert_eq!(passes.len(), 1);
        assert!(passes[0].is_final);
    }

    #[test]
    fn extra_correctors_flag_only_last_pass_final() {
        let cfg = PimpleConfig {
            n_non_orthogonal_correctors: 2,
            ..Default::default()
        };
        let ctx = IterationContext::new(&cfg, 0, 0);
        let passes: Vec<_> = ctx.non_orthogonal_passes().collect();
        assert_eq!(passes.len(), 3);
        assert!(!passes[0].is_final);
        assert!(!passes[1].is_final);
        assert!(passes[2].is_final);
    }

    #[test]
    fn final_inner_iter_requires_last_outer_and_inner() {
        let cfg = PimpleConfig {
            n_outer_correctors: 2,
            n_correctors: 2,
            n_non_orthogonal_correctors: 0,
        };
        assert!(!IterationContext::new(&cfg, 0, 0).final_inner_iter());
        assert!(!IterationContext::new(&cfg, 0, 1).final_inner_iter());
        assert!(!IterationContext::new(&cfg, 1, 0).final_inner_iter());
        assert!(IterationContext::new(&cfg, 1, 1).final_inner_iter());
    }

    #[test]
    fn zero_pass_override_yields_no_passes() {
        let ctx = IterationContext::new(&PimpleConfig::default(), 0, 0).with_non_orth_passes(0);
        assert_eq!(ctx.non_orthogonal_passes().count(), 0);
    }

    #[test]
    fn config_serde_round_trip() {
        let cfg = PimpleConfig {
            n_outer_correctors: 3,
            n_correctors: 1,
            n_non_orthogonal_correctors: 2,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PimpleConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_outer_correctors, 3);
        assert_eq!(back.n_non_orthogonal_correctors, 2);
    }
}
