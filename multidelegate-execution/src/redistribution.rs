//! Greedy two-pointer merge of a source allocation into a target allocation.
//!
//! Each step moves `min(remaining source, remaining target)` from the current source
//! delegate to the current target delegate. When one side runs out the rest of the
//! other side drains: leftover sources flow back to the depositor, leftover targets
//! are pulled from the depositor. Output order is source-major and is relied on by
//! settlement, so it must stay stable.

use multidelegate_types::{AllocationEntry, Amount, TransferInstruction};
use std::iter::FusedIterator;

/// Lazily yields the transfer plan for `sources -> targets` without allocating.
pub fn redistribute<'a>(
    sources: &'a [AllocationEntry],
    targets: &'a [AllocationEntry],
) -> Redistribution<'a> {
    Redistribution {
        sources,
        targets,
        source_idx: 0,
        target_idx: 0,
        source_left: sources.first().map_or(0, |e| e.amount),
        target_left: targets.first().map_or(0, |e| e.amount),
    }
}

/// Collected form of [`redistribute`].
pub fn plan(sources: &[AllocationEntry], targets: &[AllocationEntry]) -> Vec<TransferInstruction> {
    redistribute(sources, targets).collect()
}

#[derive(Debug, Clone)]
pub struct Redistribution<'a> {
    sources: &'a [AllocationEntry],
    targets: &'a [AllocationEntry],
    source_idx: usize,
    target_idx: usize,
    source_left: Amount,
    target_left: Amount,
}

impl Redistribution<'_> {
    fn advance_source(&mut self) {
        self.source_idx += 1;
        self.source_left = self.sources.get(self.source_idx).map_or(0, |e| e.amount);
    }

    fn advance_target(&mut self) {
        self.target_idx += 1;
        self.target_left = self.targets.get(self.target_idx).map_or(0, |e| e.amount);
    }
}

impl Iterator for Redistribution<'_> {
    type Item = TransferInstruction;

    fn next(&mut self) -> Option<TransferInstruction> {
        // Zero-amount entries contribute nothing and must not produce instructions.
        while self.source_idx < self.sources.len() && self.source_left == 0 {
            self.advance_source();
        }
        while self.target_idx < self.targets.len() && self.target_left == 0 {
            self.advance_target();
        }

        match (self.sources.get(self.source_idx), self.targets.get(self.target_idx)) {
            (Some(source), Some(target)) => {
                let amount = self.source_left.min(self.target_left);
                self.source_left -= amount;
                self.target_left -= amount;
                let instruction =
                    TransferInstruction::new(Some(source.delegate), Some(target.delegate), amount);
                if self.source_left == 0 {
                    self.advance_source();
                }
                if self.target_left == 0 {
                    self.advance_target();
                }
                Some(instruction)
            }
            (Some(source), None) => {
                let instruction = TransferInstruction::new(Some(source.delegate), None, self.source_left);
                self.advance_source();
                Some(instruction)
            }
            (None, Some(target)) => {
                let instruction = TransferInstruction::new(None, Some(target.delegate), self.target_left);
                self.advance_target();
                Some(instruction)
            }
            (None, None) => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sources.len().saturating_sub(self.source_idx)
            + self.targets.len().saturating_sub(self.target_idx);
        (0, Some(remaining))
    }
}

impl FusedIterator for Redistribution<'_> {}
