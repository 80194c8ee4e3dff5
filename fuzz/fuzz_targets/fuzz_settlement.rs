#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use multidelegate_execution::{GlobalState, VotableAsset};
use multidelegate_types::{Amount, ProcessorConfig, SettlementMode};

#[derive(Arbitrary, Debug)]
struct Op {
    caller: u8,
    sources: Vec<u8>,
    targets: Vec<(u8, u16)>,
}

fn new_state(settlement: SettlementMode) -> GlobalState {
    let mut config = ProcessorConfig::new([0xee; 32]);
    config.settlement = settlement;
    let mut state = GlobalState::new(config);
    let processor = *state.registry.processor();
    for caller in 1..=3u8 {
        state.token.mint([caller; 32], 100_000).unwrap();
        state.token.approve([caller; 32], processor, Amount::MAX);
    }
    state
}

fuzz_target!(|ops: Vec<Op>| {
    let mut sequential = new_state(SettlementMode::Sequential);
    let mut netted = new_state(SettlementMode::Netted);

    for op in ops.iter().take(32) {
        let caller = [op.caller % 3 + 1; 32];
        let sources: Vec<[u8; 32]> = op.sources.iter().map(|d| [0x20 + d % 6; 32]).collect();
        let targets: Vec<[u8; 32]> = op.targets.iter().map(|(d, _)| [0x20 + d % 6; 32]).collect();
        let amounts: Vec<Amount> = op.targets.iter().map(|(_, a)| *a as Amount).collect();

        let a = sequential.delegate_multi(&caller, &sources, &targets, &amounts);
        let b = netted.delegate_multi(&caller, &sources, &targets, &amounts);
        match (&a, &b) {
            (Ok(a), Ok(b)) => assert_eq!(a.plan, b.plan),
            (Err(a), Err(b)) => assert_eq!(a, b),
            _ => panic!("settlement modes disagree: {a:?} vs {b:?}"),
        }

        assert_eq!(sequential.ledger, netted.ledger);
        assert_eq!(sequential.registry, netted.registry);
        assert_eq!(sequential.token, netted.token);
        assert_eq!(netted.token.balance_of(netted.registry.processor()), 0);
    }
});
