#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use multidelegate_execution::plan;
use multidelegate_types::{AllocationEntry, Amount};
use std::collections::BTreeSet;

#[derive(Arbitrary, Debug)]
struct RedistributeInput {
    sources: Vec<(u8, u64)>,
    targets: Vec<(u8, u64)>,
}

/// Distinct delegates only, first occurrence wins.
fn entries(raw: &[(u8, u64)]) -> Vec<AllocationEntry> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .filter(|(id, _)| seen.insert(*id))
        .map(|(id, amount)| AllocationEntry::new([*id; 32], *amount as Amount))
        .collect()
}

fuzz_target!(|data: RedistributeInput| {
    let sources = entries(&data.sources);
    let targets = entries(&data.targets);
    let plan = plan(&sources, &targets);

    assert!(plan.iter().all(|i| i.amount > 0));
    assert!(plan.iter().all(|i| i.from.is_some() || i.to.is_some()));

    // every source is fully withdrawn and every target fully funded
    for source in &sources {
        let out: Amount = plan
            .iter()
            .filter(|i| i.from == Some(source.delegate))
            .map(|i| i.amount)
            .sum();
        assert_eq!(out, source.amount);
    }
    for target in &targets {
        let into: Amount = plan
            .iter()
            .filter(|i| i.to == Some(target.delegate))
            .map(|i| i.amount)
            .sum();
        assert_eq!(into, target.amount);
    }

    // the depositor's wallet only ever pays in or gets paid, never both
    let drained = plan.iter().any(|i| i.to.is_none());
    let funded = plan.iter().any(|i| i.from.is_none());
    assert!(!(drained && funded));
});
