#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use multidelegate_execution::{GlobalState, VotableAsset};
use multidelegate_types::{Amount, ProcessorConfig};

#[derive(Arbitrary, Debug)]
struct Op {
    caller: u8,
    sources: Vec<u8>,
    targets: Vec<(u8, u32)>,
    extra_amount: Option<u32>,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    allowance: u32,
    ops: Vec<Op>,
}

fuzz_target!(|data: FuzzInput| {
    let mut state = GlobalState::new(ProcessorConfig::new([0xee; 32]));
    let processor = *state.registry.processor();

    // Small id spaces so calls collide on callers and delegates.
    for caller in 1..=4u8 {
        state.token.mint([caller; 32], 1_000_000).unwrap();
        state.token.approve([caller; 32], processor, data.allowance as Amount);
    }

    for op in data.ops.iter().take(32) {
        let caller = [op.caller % 4 + 1; 32];
        let sources: Vec<[u8; 32]> = op.sources.iter().map(|d| [0x10 + d % 8; 32]).collect();
        let targets: Vec<[u8; 32]> = op.targets.iter().map(|(d, _)| [0x10 + d % 8; 32]).collect();
        let mut amounts: Vec<Amount> = op.targets.iter().map(|(_, a)| *a as Amount).collect();
        if let Some(extra) = op.extra_amount {
            amounts.push(extra as Amount);
        }

        let before = state.clone();
        match state.delegate_multi(&caller, &sources, &targets, &amounts) {
            Ok(receipt) => {
                assert!(receipt.plan.iter().all(|i| i.amount > 0));
                for target in &targets {
                    assert!(state.registry.is_provisioned(target));
                }
                for source in &sources {
                    if !targets.contains(source) {
                        assert_eq!(state.balance_of(&caller, source), 0);
                    }
                }
            }
            Err(_) => assert_eq!(state, before),
        }
        assert_eq!(state.audit(), Ok(()));
        assert_eq!(state.token.total_supply(), 4_000_000);
    }
});
