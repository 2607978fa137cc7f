//! Strategy parameter optimization.
//!
//! This module runs one independent backtest per parameter combination. The `Optimizer`
//! shares the read-only bars across runs, while the `ParameterCombination` trait defines
//! how to generate parameter sets.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Backtest, Bar, Params, RunConfig, RunStatus, Strategy};
use crate::errors::Result;

use rayon::prelude::*;

/// Trait defining how to generate parameter combinations for optimization.
///
/// Implement this trait for your parameter types to define how combinations should be generated.
pub trait ParameterCombination: Sync {
    /// Type representing a single parameter combination (e.g., `(usize, f64)`).
    type Output: Clone + Send + Sync;

    /// Generates all possible parameter combinations to test.
    fn generate() -> Vec<Self::Output>;
}

/// Runs a strategy once per parameter combination, in parallel.
pub struct Optimizer<PC: ParameterCombination> {
    bars: Arc<[Bar]>,
    config: RunConfig,
    _marker: PhantomData<PC>,
}

impl<PC: ParameterCombination> From<&Backtest> for Optimizer<PC> {
    fn from(value: &Backtest) -> Self {
        Self {
            bars: Arc::clone(value.bars()),
            config: value.config().clone(),
            _marker: PhantomData,
        }
    }
}

impl<PC: ParameterCombination> Optimizer<PC> {
    /// Creates a new `Optimizer` over `bars` with the run parameters shared by every run.
    pub fn new(bars: impl Into<Arc<[Bar]>>, config: RunConfig) -> Self {
        Self {
            bars: bars.into(),
            config,
            _marker: PhantomData,
        }
    }

    /// Runs every combination.
    ///
    /// ### Arguments
    /// * `factory` - Builds the strategy and its parameter overrides for one combination.
    ///
    /// ### Returns
    /// `(combination, final_equity, status)` for each combination, in generation order.
    /// The first factory or run error aborts the sweep.
    pub fn with<S, F>(&self, factory: F) -> Result<Vec<(PC::Output, f64, RunStatus)>>
    where
        S: Strategy,
        F: Fn(&PC::Output) -> Result<(S, Params)> + Sync,
    {
        let num_cpus = num_cpus::get();
        let combinations = PC::generate();
        let chunk_size = combinations.len().div_ceil(num_cpus).max(1);

        combinations
            .par_chunks(chunk_size)
            .map::<_, Result<_>>(|par_combinations| {
                let mut backtest = Backtest::new(Arc::clone(&self.bars), self.config.clone())?;
                let mut local_results = Vec::with_capacity(par_combinations.len());

                for param_set in par_combinations {
                    let (mut strategy, params) = factory(param_set)?;
                    let (result, status) = backtest.run(&mut strategy, &params)?;
                    local_results.push((param_set.clone(), result.final_equity, status));
                }

                Ok(local_results)
            })
            .collect::<Result<Vec<_>>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }
}
