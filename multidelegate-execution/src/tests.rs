use super::*;
use multidelegate_crypto::signatures::{address_of, generate_keypair, signed_call};
use multidelegate_types::{Amount, AssetError, ProcessorConfig, SettlementMode, TransferInstruction};

const ASSET: AssetId = [0xee; 32];
const DEPLOYER: Address = [0x01; 32];
const ALICE: DelegateId = [0xa1; 32];
const BOB: DelegateId = [0xb0; 32];
const CHARLIE: DelegateId = [0xc4; 32];
const DAVE: DelegateId = [0xda; 32];

fn new_state(settlement: SettlementMode) -> GlobalState {
    let mut config = ProcessorConfig::new(ASSET);
    config.settlement = settlement;
    GlobalState::new(config)
}

fn fund(state: &mut GlobalState, holder: Address, amount: Amount) {
    state.token.mint(holder, amount).unwrap();
    let processor = *state.registry.processor();
    state.token.approve(holder, processor, amount);
}

fn custodied(state: &GlobalState, delegate: &DelegateId) -> Amount {
    state.token.balance_of(&state.proxy_address(delegate))
}

#[test]
fn test_deposit_splits_across_delegates() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 1_000);

    let receipt = state
        .delegate_multi(&DEPLOYER, &[], &[ALICE, BOB], &[600, 400])
        .unwrap();

    assert_eq!(state.balance_of(&DEPLOYER, &ALICE), 600);
    assert_eq!(state.balance_of(&DEPLOYER, &BOB), 400);
    assert_eq!(custodied(&state, &ALICE), 600);
    assert_eq!(custodied(&state, &BOB), 400);
    assert_eq!(state.token.get_votes(&ALICE), 600);
    assert_eq!(state.token.get_votes(&BOB), 400);
    assert_eq!(state.token.balance_of(&DEPLOYER), 0);

    let deployed = receipt
        .events
        .iter()
        .filter(|e| matches!(e, DelegationEvent::ProxyDeployed { .. }))
        .count();
    assert_eq!(deployed, 2);
    assert_eq!(receipt.plan.len(), 2);
    assert!(state.audit().is_ok());
}

#[test]
fn test_redelegate_to_third_party_skips_wallet() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 1_000_000);

    let alice_proxy = retrieve_proxy_contract_address(&ASSET, &ALICE);
    assert_eq!(state.token.balance_of(&alice_proxy), 0);

    state
        .delegate_multi(&DEPLOYER, &[], &[ALICE], &[1_000_000])
        .unwrap();
    let receipt = state
        .delegate_multi(&DEPLOYER, &[ALICE], &[CHARLIE], &[1_000_000])
        .unwrap();

    assert_eq!(
        receipt.moves,
        vec![AssetMove::new(alice_proxy, state.proxy_address(&CHARLIE), 1_000_000)]
    );
    assert_eq!(state.get_balance_for_delegate(&ALICE), 0);
    assert_eq!(state.get_balance_for_delegate(&CHARLIE), 1_000_000);
    assert_eq!(state.token.balance_of(&alice_proxy), 0);
    assert_eq!(state.token.get_votes(&CHARLIE), 1_000_000);
    assert_eq!(state.token.balance_of(&DEPLOYER), 0);

    // emptied proxies stay addressable and registered
    assert_eq!(state.proxy_address(&ALICE), alice_proxy);
    assert!(state.registry.is_provisioned(&ALICE));
    assert!(state.audit().is_ok());
}

#[test]
fn test_reducing_a_position_returns_the_remainder() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 10);
    state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[10]).unwrap();

    let receipt = state
        .delegate_multi(&DEPLOYER, &[ALICE], &[ALICE], &[4])
        .unwrap();

    assert_eq!(
        receipt.plan,
        vec![
            TransferInstruction::new(Some(ALICE), Some(ALICE), 4),
            TransferInstruction::new(Some(ALICE), None, 6),
        ]
    );
    assert_eq!(state.balance_of(&DEPLOYER, &ALICE), 4);
    assert_eq!(state.token.balance_of(&DEPLOYER), 6);
    assert_eq!(custodied(&state, &ALICE), 4);
    assert!(state.audit().is_ok());
}

#[test]
fn test_partial_overlap_drains_to_holder() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 15);
    state
        .delegate_multi(&DEPLOYER, &[], &[ALICE, BOB], &[10, 5])
        .unwrap();

    let receipt = state
        .delegate_multi(&DEPLOYER, &[ALICE, BOB], &[CHARLIE], &[7])
        .unwrap();

    assert_eq!(
        receipt.plan,
        vec![
            TransferInstruction::new(Some(ALICE), Some(CHARLIE), 7),
            TransferInstruction::new(Some(ALICE), None, 3),
            TransferInstruction::new(Some(BOB), None, 5),
        ]
    );
    assert_eq!(state.balance_of(&DEPLOYER, &CHARLIE), 7);
    assert_eq!(state.ledger.entries_of(&DEPLOYER).count(), 1);
    assert_eq!(state.token.balance_of(&DEPLOYER), 8);
    assert!(state.audit().is_ok());
}

#[test]
fn test_nothing_to_withdraw_for_unknown_and_emptied_sources() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 10);

    assert_eq!(
        state.delegate_multi(&DEPLOYER, &[ALICE], &[], &[]),
        Err(DelegationError::NothingToWithdraw(ALICE))
    );

    state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[10]).unwrap();
    state.delegate_multi(&DEPLOYER, &[ALICE], &[], &[]).unwrap();
    assert_eq!(state.token.balance_of(&DEPLOYER), 10);

    assert_eq!(
        state.delegate_multi(&DEPLOYER, &[ALICE], &[], &[]),
        Err(DelegationError::NothingToWithdraw(ALICE))
    );
}

#[test]
fn test_failure_on_third_source_changes_nothing() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 30);
    state
        .delegate_multi(&DEPLOYER, &[], &[ALICE, BOB], &[10, 20])
        .unwrap();
    let before = state.clone();

    let err = state
        .delegate_multi(&DEPLOYER, &[ALICE, BOB, CHARLIE], &[DAVE], &[30])
        .unwrap_err();

    assert_eq!(err, DelegationError::NothingToWithdraw(CHARLIE));
    assert_eq!(state, before);
}

#[test]
fn test_insufficient_allowance_rolls_back_provisioning() {
    for settlement in [SettlementMode::Sequential, SettlementMode::Netted] {
        let mut state = new_state(settlement);
        fund(&mut state, DEPLOYER, 100);
        state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[50]).unwrap();
        state.token.mint(DEPLOYER, 100).unwrap();
        let before = state.clone();

        // 150 in the wallet but only 50 allowance left, 30 + 40 requested
        let err = state
            .delegate_multi(&DEPLOYER, &[], &[BOB, CHARLIE], &[30, 40])
            .unwrap_err();

        assert_eq!(
            err,
            DelegationError::AssetMovementFailed(AssetError::InsufficientAllowance {
                owner: DEPLOYER,
                available: 50,
                required: 70,
            })
        );
        assert!(!err.is_fatal());
        assert!(!state.registry.is_provisioned(&BOB));
        assert!(!state.registry.is_provisioned(&CHARLIE));
        assert_eq!(state, before);
    }
}

#[test]
fn test_netted_escrow_route_rolls_back_on_short_allowance() {
    let mut state = new_state(SettlementMode::Netted);
    fund(&mut state, DEPLOYER, 100);
    state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[50]).unwrap();
    state.token.mint(DEPLOYER, 100).unwrap();
    let escrow = *state.registry.processor();
    let before = state.clone();

    // ALICE's 50 plus 60 from the wallet, fanned out to two fresh proxies via escrow
    let err = state
        .delegate_multi(&DEPLOYER, &[ALICE], &[BOB, CHARLIE], &[40, 70])
        .unwrap_err();

    assert_eq!(
        err,
        DelegationError::AssetMovementFailed(AssetError::InsufficientAllowance {
            owner: DEPLOYER,
            available: 50,
            required: 60,
        })
    );
    assert!(!err.is_fatal());
    assert!(!state.registry.is_provisioned(&BOB));
    assert!(!state.registry.is_provisioned(&CHARLIE));
    assert_eq!(state.token.balance_of(&escrow), 0);
    assert_eq!(custodied(&state, &ALICE), 50);
    assert_eq!(state, before);
}

#[test]
fn test_unfundable_request_fails_alike_in_both_modes() {
    let mut errors = Vec::new();
    for settlement in [SettlementMode::Sequential, SettlementMode::Netted] {
        let mut state = new_state(settlement);
        fund(&mut state, DEPLOYER, 10);
        let before = state.clone();

        let err = state
            .delegate_multi(&DEPLOYER, &[], &[ALICE, BOB], &[Amount::MAX, Amount::MAX])
            .unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(state, before);
        errors.push(err);
    }

    assert_eq!(errors[0], errors[1]);
    assert_eq!(
        errors[0],
        DelegationError::AssetMovementFailed(AssetError::InsufficientBalance {
            account: DEPLOYER,
            available: 10,
            required: Amount::MAX,
        })
    );
}

#[test]
fn test_oversized_deposit_onto_held_delegate_is_not_fatal() {
    let other: Address = [0x02; 32];
    for settlement in [SettlementMode::Sequential, SettlementMode::Netted] {
        let mut state = new_state(settlement);
        fund(&mut state, DEPLOYER, 1);
        fund(&mut state, other, 1);
        state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[1]).unwrap();
        let before = state.clone();

        let err = state
            .delegate_multi(&other, &[], &[ALICE], &[Amount::MAX])
            .unwrap_err();
        assert_eq!(
            err,
            DelegationError::AssetMovementFailed(AssetError::InsufficientBalance {
                account: other,
                available: 1,
                required: Amount::MAX,
            })
        );
        assert!(!err.is_fatal());
        assert_eq!(state, before);
    }
}

#[test]
fn test_duplicate_target_is_rejected_before_any_mutation() {
    let mut state = new_state(SettlementMode::Netted);
    fund(&mut state, DEPLOYER, 100);
    let before = state.clone();

    let err = state
        .delegate_multi(&DEPLOYER, &[], &[ALICE, BOB, ALICE], &[1, 2, 3])
        .unwrap_err();
    assert!(matches!(err, DelegationError::DuplicateDelegate { .. }));
    assert_eq!(state, before);
}

#[test]
fn test_provisioning_is_shared_between_depositors() {
    let mut state = new_state(SettlementMode::Sequential);
    let other: Address = [0x02; 32];
    fund(&mut state, DEPLOYER, 10);
    fund(&mut state, other, 5);

    let first = state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[10]).unwrap();
    let second = state.delegate_multi(&other, &[], &[ALICE], &[5]).unwrap();

    let deployed = |r: &DelegationReceipt| {
        r.events
            .iter()
            .filter(|e| matches!(e, DelegationEvent::ProxyDeployed { .. }))
            .count()
    };
    assert_eq!(deployed(&first), 1);
    assert_eq!(deployed(&second), 0);
    assert_eq!(state.registry.len(), 1);
    assert_eq!(state.get_balance_for_delegate(&ALICE), 15);
    assert_eq!(custodied(&state, &ALICE), 15);
    assert_eq!(
        state.balance_of_batch(&[DEPLOYER, other], &[ALICE, ALICE]).unwrap(),
        vec![10, 5]
    );
}

#[test]
fn test_emptied_proxy_stays_registered_and_delegating() {
    let mut state = new_state(SettlementMode::Netted);
    fund(&mut state, DEPLOYER, 10);
    state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[10]).unwrap();

    state
        .delegate_multi(&DEPLOYER, &[ALICE], &[BOB], &[10])
        .unwrap();
    state.delegate_multi(&DEPLOYER, &[BOB], &[], &[]).unwrap();

    assert!(state.registry.is_provisioned(&BOB));
    assert_eq!(custodied(&state, &BOB), 0);
    assert_eq!(state.token.delegates(&state.proxy_address(&BOB)), Some(BOB));
    assert!(state.audit().is_ok());
}

fn run_script(settlement: SettlementMode) -> (GlobalState, Vec<DelegationReceipt>) {
    let mut state = new_state(settlement);
    let other: Address = [0x02; 32];
    fund(&mut state, DEPLOYER, 1_000);
    fund(&mut state, other, 500);

    let receipts = vec![
        state
            .delegate_multi(&DEPLOYER, &[], &[ALICE, BOB], &[300, 200])
            .unwrap(),
        state.delegate_multi(&other, &[], &[BOB, DAVE], &[100, 50]).unwrap(),
        state
            .delegate_multi(&DEPLOYER, &[ALICE, BOB], &[CHARLIE, DAVE], &[70, 600])
            .unwrap(),
        state
            .delegate_multi(&other, &[DAVE], &[ALICE, CHARLIE], &[20, 10])
            .unwrap(),
        state.delegate_multi(&DEPLOYER, &[DAVE], &[], &[]).unwrap(),
    ];
    (state, receipts)
}

#[test]
fn test_settlement_modes_reach_identical_state() {
    let (sequential, _) = run_script(SettlementMode::Sequential);
    let (netted, _) = run_script(SettlementMode::Netted);

    assert_eq!(sequential.ledger, netted.ledger);
    assert_eq!(sequential.registry, netted.registry);
    assert_eq!(sequential.token, netted.token);
    assert!(sequential.audit().is_ok());
    assert!(netted.audit().is_ok());
}

#[test]
fn test_netted_settlement_touches_each_account_once() {
    let (state, receipts) = run_script(SettlementMode::Netted);
    let escrow = *state.registry.processor();
    let wallets = [DEPLOYER, [0x02; 32]];

    for receipt in &receipts {
        let mut touched: Vec<Address> = Vec::new();
        for mv in &receipt.moves {
            for account in [mv.from, mv.to] {
                if account != escrow && !wallets.contains(&account) {
                    assert!(!touched.contains(&account), "proxy moved twice in one call");
                    touched.push(account);
                }
            }
        }
    }

    // the mixed rebalance has three payers and two payees, so it routes via escrow
    assert!(receipts[2].moves.iter().any(|mv| mv.to == escrow));
    assert_eq!(state.token.balance_of(&escrow), 0);
}

#[test]
fn test_conservation_after_many_depositors() {
    let mut state = new_state(SettlementMode::Sequential);
    let delegates = [ALICE, BOB, CHARLIE, DAVE];
    for n in 1u8..=6 {
        let depositor = [n; 32];
        fund(&mut state, depositor, 100 * n as Amount);
        let a = delegates[n as usize % 4];
        let b = delegates[(n as usize + 1) % 4];
        state
            .delegate_multi(&depositor, &[], &[a, b], &[30 * n as Amount, 20 * n as Amount])
            .unwrap();
        state
            .delegate_multi(&depositor, &[a], &[b], &[10 * n as Amount])
            .unwrap();
    }

    for delegate in &delegates {
        let summed: Amount = (1u8..=6)
            .map(|n| state.balance_of(&[n; 32], delegate))
            .sum();
        assert_eq!(summed, state.get_balance_for_delegate(delegate));
        assert_eq!(summed, custodied(&state, delegate));
    }
    assert!(state.audit().is_ok());
}

#[test]
fn test_execute_call_checks_signature_and_nonce() {
    let mut state = new_state(SettlementMode::Sequential);
    let key = generate_keypair();
    let sender = address_of(&key);
    state.token.mint(sender, 100).unwrap();

    let approve = signed_call(&key, 0, DelegationInstruction::ApproveProcessor { amount: 100 });
    let receipt = execute_call(&approve, &mut state).unwrap();
    assert!(receipt.delegation.is_none());
    assert_eq!(state.nonce_of(&sender), 1);

    // replay
    assert!(matches!(
        execute_call(&approve, &mut state),
        Err(CallError::InvalidNonce { expected: 1, got: 0 })
    ));

    let delegate = DelegationInstruction::DelegateMulti {
        sources: vec![],
        targets: vec![ALICE],
        amounts: vec![60],
    };
    let mut tampered = signed_call(&key, 1, delegate.clone());
    tampered.nonce = 2;
    assert!(matches!(
        execute_call(&tampered, &mut state),
        Err(CallError::InvalidSignature(_))
    ));

    let receipt = execute_call(&signed_call(&key, 1, delegate), &mut state).unwrap();
    assert_eq!(receipt.delegation.unwrap().plan.len(), 1);
    assert_eq!(state.balance_of(&sender, &ALICE), 60);
    assert_eq!(state.nonce_of(&sender), 2);
}

#[test]
fn test_failed_instruction_does_not_consume_nonce() {
    let mut state = new_state(SettlementMode::Sequential);
    let key = generate_keypair();
    let sender = address_of(&key);

    let call = signed_call(
        &key,
        0,
        DelegationInstruction::DelegateMulti {
            sources: vec![BOB],
            targets: vec![],
            amounts: vec![],
        },
    );
    let err = execute_call(&call, &mut state).unwrap_err();
    assert!(matches!(
        err,
        CallError::Delegation(DelegationError::NothingToWithdraw(BOB))
    ));
    assert_eq!(state.nonce_of(&sender), 0);
}

#[test]
fn test_metadata_uri_uses_template() {
    let mut config = ProcessorConfig::new(ASSET);
    config.uri_template = Some("http://localhost:8080/{id}".to_string());
    let state = GlobalState::new(config);

    assert_eq!(
        state.uri(&ALICE).unwrap(),
        format!("http://localhost:8080/{}", hex::encode(ALICE))
    );
}

#[test]
fn test_root_hash_tracks_state_changes() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 10);
    let before = state.root_hash();
    assert_eq!(before, state.clone().root_hash());

    state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[10]).unwrap();
    assert_ne!(before, state.root_hash());
}

#[test]
fn test_audit_flags_out_of_band_transfers() {
    let mut state = new_state(SettlementMode::Sequential);
    fund(&mut state, DEPLOYER, 10);
    state.delegate_multi(&DEPLOYER, &[], &[ALICE], &[10]).unwrap();
    assert!(state.audit().is_ok());

    let mut gifted = state.clone();
    let proxy = gifted.proxy_address(&ALICE);
    gifted.token.mint(proxy, 1).unwrap();
    assert_eq!(
        gifted.audit(),
        Err(InvariantViolation::CustodyMismatch {
            delegate: ALICE,
            ledger: 10,
            custodied: 11,
        })
    );

    let escrow = *state.registry.processor();
    state.token.mint(escrow, 3).unwrap();
    assert_eq!(state.audit(), Err(InvariantViolation::EscrowNotEmpty(3)));
}
