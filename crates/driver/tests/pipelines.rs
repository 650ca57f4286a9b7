//! End-to-end watcher and finalizer runs over a scripted chain, proof service and store

use std::{sync::Arc, time::Duration};

use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolCall,
};
use chainio::{
    TokenType,
    liquidity::ILiquidity::{DepositData, Deposited, TokenInfo, WithdrawalClaimable},
    rollup::IRollup::{BlockPosted, postRegistrationBlockCall},
    withdrawal::IWithdrawal::{
        ClaimableWithdrawalQueued, DirectWithdrawalQueued, Withdrawal as WithdrawalData,
    },
};
use driver::{DeployedBlocks, Services, finalizer::finalize_blocks, run_finalizer, run_watcher};
use extractor::{Contracts, Extractor, test_utils::MockChain};
use primitives::Throttle;
use proof::test_utils::StaticProofs;
use store::{
    Block, BlockFilter, BlockStatus, BlockType, BlockValidity, DepositFilter, DepositStatus,
    DocumentStore, EventCategory, MemoryStore, ProgressOutcome, Repositories, Settlement,
    StatsSummary, WithdrawalFilter, WithdrawalStatus, WithdrawalType, hash_key, models::BLOCKS,
};

const ROLLUP: Address = Address::repeat_byte(0x10);
const LIQUIDITY: Address = Address::repeat_byte(0x20);
const WITHDRAWAL: Address = Address::repeat_byte(0x30);
const MULTICALL: Address = Address::repeat_byte(0x40);
const CONTRACTS: Contracts =
    Contracts { rollup: ROLLUP, liquidity: LIQUIDITY, withdrawal: WITHDRAWAL, multicall: MULTICALL };

struct Harness {
    l1: MockChain,
    l2: MockChain,
    proofs: StaticProofs,
    store: Arc<MemoryStore>,
    services: Services,
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()), 100)
}

fn harness_with(store: Arc<MemoryStore>, indexing_page_size: usize) -> Harness {
    let (l1, l2, proofs) = (MockChain::new(), MockChain::new(), StaticProofs::new());
    let extractor = Extractor::new(
        Arc::new(l1.clone()),
        Arc::new(l2.clone()),
        CONTRACTS,
        100,
        Throttle::new(10, Duration::ZERO),
    );
    let services = Services {
        repos: Repositories::new(Arc::clone(&store) as Arc<dyn DocumentStore>),
        extractor,
        proofs: Arc::new(proofs.clone()),
        deployed: DeployedBlocks { rollup: 1, liquidity: 1, withdrawal: 1 },
        proof_throttle: Throttle::new(2, Duration::ZERO),
        indexing_page_size,
    };
    Harness { l1, l2, proofs, store, services }
}

fn word(n: u64) -> B256 {
    B256::left_padding_from(&n.to_be_bytes())
}

/// Post rollup block `number` with `senders` registrations in L2 block `l2_block`.
fn post_block(h: &Harness, number: u64, l2_block: u64, senders: usize) -> B256 {
    let tx_hash = word(0xb000 + number);
    let call = postRegistrationBlockCall {
        txTreeRoot: word(number),
        expiry: 0,
        builderNonce: 0,
        senderFlags: Default::default(),
        aggregatedPublicKey: [B256::ZERO; 2],
        aggregatedSignature: [B256::repeat_byte(7); 4],
        messagePoint: [B256::ZERO; 4],
        senderPublicKeys: (0..senders).map(U256::from).collect(),
    };
    h.l2.set_transaction(tx_hash, call.abi_encode());

    let event = BlockPosted {
        prevBlockHash: word(number - 1),
        blockBuilder: Address::repeat_byte(2),
        timestamp: 1_700_000_000 + number,
        blockNumber: U256::from(number),
        depositTreeRoot: B256::ZERO,
        signatureHash: word(number),
    };
    h.l2.push_event(ROLLUP, &event, l2_block, tx_hash);
    event.block_hash()
}

async fn block(h: &Harness, hash: B256) -> Block {
    h.services.repos.blocks.get_by_hash(&hash_key(&hash)).await.unwrap().unwrap()
}

async fn stats(h: &Harness) -> StatsSummary {
    h.services.repos.stats.get().await.unwrap()
}

async fn cursor(h: &Harness, category: EventCategory) -> Option<u64> {
    h.services.repos.checkpoints.get(category).await.unwrap().map(|c| c.last_block_number)
}

/// A fresh store holding only the block records `h` wrote, as left by a run that crashed
/// before committing its cursor and stats.
fn stored_blocks(h: &Harness) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for document in h.store.documents(BLOCKS).unwrap() {
        let key = document["hash"].as_str().unwrap().to_owned();
        store.put(BLOCKS, &key, document).unwrap();
    }
    store
}

#[tokio::test]
async fn block_is_indexed_then_completed_by_its_proof() {
    let h = harness();
    h.l2.set_head(10);
    let hash = post_block(&h, 100, 5, 3);

    let report = run_watcher(&h.services).await.unwrap();
    assert_eq!(report.blocks.found, 1);
    assert_eq!(report.blocks.outcome, ProgressOutcome::Committed);

    let indexed = block(&h, hash).await;
    assert_eq!(indexed.block_number, 100);
    assert_eq!(indexed.status, BlockStatus::Indexing);
    assert_eq!(indexed.block_validity, BlockValidity::Pending);
    assert_eq!(indexed.transaction_count, 3);
    assert_eq!(indexed.block_type, BlockType::Registration);
    assert_eq!(indexed.next_account_id, None);
    assert_eq!(stats(&h).await.total_transaction_count, 0);
    assert_eq!(stats(&h).await.latest_block_number, 100);

    h.proofs.set_proof(100, true, 42);
    h.proofs.set_latest_proven(100);
    let report = run_finalizer(&h.services).await.unwrap();
    assert_eq!(report.blocks.settled.promoted, 1);

    let completed = block(&h, hash).await;
    assert_eq!(completed.status, BlockStatus::Completed);
    assert_eq!(completed.block_validity, BlockValidity::Valid);
    assert_eq!(completed.next_account_id, Some(42));
    assert_eq!(completed.tx_digest, word(100));

    let summary = stats(&h).await;
    assert_eq!(summary.total_transaction_count, 3);
    assert_eq!(summary.total_l2_wallet_count, 42);
}

#[tokio::test]
async fn finalization_counts_each_block_once() {
    let h = harness();
    h.l2.set_head(10);
    post_block(&h, 1, 3, 5);
    post_block(&h, 2, 4, 3);
    run_watcher(&h.services).await.unwrap();

    h.proofs.set_proof(1, true, 10);
    h.proofs.set_proof(2, true, 12);
    h.proofs.set_latest_proven(2);

    run_finalizer(&h.services).await.unwrap();
    assert_eq!(stats(&h).await.total_transaction_count, 8);

    let again = run_finalizer(&h.services).await.unwrap();
    assert_eq!(again.blocks.settled, Settlement::default());
    assert_eq!(stats(&h).await.total_transaction_count, 8);
    assert_eq!(stats(&h).await.total_l2_wallet_count, 12);
}

#[tokio::test]
async fn proven_but_uncovered_blocks_wait_in_proving() {
    let h = harness();
    h.l2.set_head(10);
    let first = post_block(&h, 1, 3, 2);
    let second = post_block(&h, 2, 4, 4);
    h.proofs.set_proof(1, true, 5);
    h.proofs.set_proof(2, true, 9);
    h.proofs.set_latest_proven(1);

    run_watcher(&h.services).await.unwrap();
    assert_eq!(block(&h, first).await.status, BlockStatus::Completed);
    assert_eq!(block(&h, second).await.status, BlockStatus::Proving);
    // both carry a proof, so both are counted at ingestion
    assert_eq!(stats(&h).await.total_transaction_count, 6);
    assert_eq!(stats(&h).await.total_l2_wallet_count, 9);

    h.proofs.set_latest_proven(2);
    let report = run_finalizer(&h.services).await.unwrap();
    assert_eq!(report.blocks.proving_checked, 1);
    assert_eq!(report.blocks.settled.promoted, 1);
    assert_eq!(block(&h, second).await.status, BlockStatus::Completed);
    assert_eq!(block(&h, second).await.next_account_id, Some(9));
    assert_eq!(stats(&h).await.total_transaction_count, 6);
}

#[tokio::test]
async fn invalid_and_empty_blocks_add_no_transactions() {
    let h = harness();
    h.l2.set_head(10);
    let invalid = post_block(&h, 1, 3, 4);
    let empty = post_block(&h, 2, 4, 0);
    h.proofs.set_proof(1, false, 3);
    h.proofs.set_proof(2, true, 3);
    h.proofs.set_latest_proven(2);

    run_watcher(&h.services).await.unwrap();

    assert_eq!(block(&h, invalid).await.block_validity, BlockValidity::Invalid);
    assert_eq!(block(&h, empty).await.block_validity, BlockValidity::Empty);
    assert_eq!(stats(&h).await.total_transaction_count, 0);
    assert_eq!(stats(&h).await.total_l2_wallet_count, 0);
}

#[tokio::test]
async fn caught_up_watcher_makes_no_calls_and_no_writes() {
    let h = harness();
    h.l1.set_head(20);
    h.l2.set_head(10);
    post_block(&h, 1, 3, 1);
    h.proofs.set_proof(1, true, 1);
    h.proofs.set_latest_proven(1);

    run_watcher(&h.services).await.unwrap();
    let summary = stats(&h).await;
    let documents = h.store.documents(BLOCKS).unwrap();
    let (l1_queries, l2_queries) = (h.l1.log_queries().len(), h.l2.log_queries().len());
    let (commits, transactions) = (h.store.commit_count(), h.store.transaction_count());

    let report = run_watcher(&h.services).await.unwrap();

    assert_eq!(report.blocks.range, None);
    assert_eq!(report.deposits.range, None);
    assert_eq!(report.withdrawals.range, None);
    assert_eq!(h.l1.log_queries().len(), l1_queries);
    assert_eq!(h.l2.log_queries().len(), l2_queries);
    assert_eq!(h.store.commit_count(), commits);
    assert_eq!(h.store.transaction_count(), transactions);
    assert_eq!(h.store.documents(BLOCKS).unwrap(), documents);
    assert_eq!(stats(&h).await, summary);
}

#[tokio::test]
async fn empty_range_advances_the_cursor_without_stats() {
    let h = harness();
    h.l2.set_head(50);

    let report = run_watcher(&h.services).await.unwrap();

    assert_eq!(report.blocks.found, 0);
    assert_eq!(cursor(&h, EventCategory::Block).await, Some(50));
    assert_eq!(cursor(&h, EventCategory::WithdrawalQueue).await, Some(50));
    assert_eq!(stats(&h).await, StatsSummary::default());
}

#[tokio::test]
async fn rerun_after_crash_reuses_stored_records() {
    // first attempt: records written, cursor and stats never committed
    let crashed = harness();
    crashed.l2.set_head(10);
    let hash = post_block(&crashed, 7, 3, 2);
    run_watcher(&crashed.services).await.unwrap();
    let store = stored_blocks(&crashed);
    assert_eq!(store.documents(BLOCKS).unwrap().len(), 1);

    // the proof became available in between
    let h = harness_with(store, 100);
    h.l2.set_head(10);
    post_block(&h, 7, 3, 2);
    h.proofs.set_proof(7, true, 21);
    h.proofs.set_latest_proven(7);

    let report = run_watcher(&h.services).await.unwrap();

    assert_eq!(report.blocks.found, 1);
    assert_eq!(report.blocks.written, 1);
    assert_eq!(h.store.documents(BLOCKS).unwrap().len(), 1);
    let stored = block(&h, hash).await;
    assert_eq!(stored.status, BlockStatus::Completed);
    assert_eq!(stored.next_account_id, Some(21));
    assert_eq!(cursor(&h, EventCategory::Block).await, Some(10));
    assert_eq!(stats(&h).await.total_transaction_count, 2);
    assert_eq!(stats(&h).await.total_l2_wallet_count, 21);
}

#[tokio::test]
async fn ingestion_never_regresses_a_finalized_block() {
    let first = harness();
    first.l2.set_head(10);
    let hash = post_block(&first, 3, 2, 1);
    first.proofs.set_proof(3, true, 4);
    first.proofs.set_latest_proven(3);
    run_watcher(&first.services).await.unwrap();
    let store = stored_blocks(&first);

    // re-scan with the proof service lagging behind
    let h = harness_with(store, 100);
    h.l2.set_head(10);
    post_block(&h, 3, 2, 1);
    run_watcher(&h.services).await.unwrap();

    let stored = block(&h, hash).await;
    assert_eq!(stored.status, BlockStatus::Completed);
    assert_eq!(stored.block_validity, BlockValidity::Valid);
    assert_eq!(stored.next_account_id, Some(4));
}

#[tokio::test]
async fn finalizer_rechecks_a_bounded_page_of_indexing_blocks() {
    let h = harness_with(Arc::new(MemoryStore::new()), 1);
    h.l2.set_head(10);
    let older = post_block(&h, 1, 3, 1);
    let newer = post_block(&h, 2, 4, 1);
    run_watcher(&h.services).await.unwrap();

    h.proofs.set_proof(1, true, 1);
    h.proofs.set_proof(2, true, 2);
    h.proofs.set_latest_proven(2);
    let requests = h.proofs.requests();

    let report = run_finalizer(&h.services).await.unwrap();
    assert_eq!(report.blocks.indexing_checked, 1);
    assert_eq!(h.proofs.requests() - requests, 1);
    assert_eq!(block(&h, older).await.status, BlockStatus::Completed);
    assert_eq!(block(&h, newer).await.status, BlockStatus::Indexing);

    run_finalizer(&h.services).await.unwrap();
    assert_eq!(block(&h, newer).await.status, BlockStatus::Completed);
    assert_eq!(stats(&h).await.total_transaction_count, 2);

    let remaining = BlockFilter { status: Some(BlockStatus::Indexing), ..Default::default() };
    assert_eq!(h.services.repos.blocks.count(&remaining).await.unwrap(), 0);
}

#[tokio::test]
async fn overlapping_finalizer_runs_count_each_block_once() {
    let h = harness();
    h.l2.set_head(10);
    post_block(&h, 1, 3, 5);
    post_block(&h, 2, 4, 3);
    run_watcher(&h.services).await.unwrap();

    h.proofs.set_proof(1, true, 10);
    h.proofs.set_proof(2, true, 12);
    h.proofs.set_latest_proven(2);
    // both runs load the same indexing blocks before either one writes
    h.proofs.set_delay(Duration::from_millis(20));

    let (first, second) = tokio::join!(finalize_blocks(&h.services), finalize_blocks(&h.services));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.indexing_checked, 2);
    assert_eq!(second.indexing_checked, 2);
    assert_eq!(first.settled.promoted + second.settled.promoted, 2);
    assert_eq!(first.settled.counted + second.settled.counted, 2);

    let summary = stats(&h).await;
    assert_eq!(summary.total_transaction_count, 8);
    assert_eq!(summary.total_l2_wallet_count, 12);
}

#[tokio::test]
async fn rerun_after_crash_skips_blocks_the_finalizer_counted() {
    let crashed = harness();
    crashed.l2.set_head(10);
    let hash = post_block(&crashed, 7, 3, 2);
    run_watcher(&crashed.services).await.unwrap();

    let h = harness_with(stored_blocks(&crashed), 100);
    h.l2.set_head(10);
    post_block(&h, 7, 3, 2);
    h.proofs.set_proof(7, true, 21);
    h.proofs.set_latest_proven(7);

    // the finalizer completes the block before the watcher retries the range
    let finalized = run_finalizer(&h.services).await.unwrap();
    assert_eq!(finalized.blocks.settled.counted, 1);
    assert_eq!(stats(&h).await.total_transaction_count, 2);

    let report = run_watcher(&h.services).await.unwrap();
    assert_eq!(report.blocks.found, 1);
    assert_eq!(report.blocks.written, 0);
    assert_eq!(report.blocks.outcome, ProgressOutcome::Committed);
    assert_eq!(block(&h, hash).await.status, BlockStatus::Completed);
    assert_eq!(cursor(&h, EventCategory::Block).await, Some(10));

    let summary = stats(&h).await;
    assert_eq!(summary.total_transaction_count, 2);
    assert_eq!(summary.total_l2_wallet_count, 21);
}

#[tokio::test]
async fn superseded_watcher_run_leaves_stats_unchanged() {
    let h = harness();
    h.l2.set_head(10);
    post_block(&h, 1, 3, 5);
    post_block(&h, 2, 4, 3);
    h.proofs.set_proof(1, true, 10);
    h.proofs.set_proof(2, true, 12);
    h.proofs.set_latest_proven(2);
    // both runs scan the same range from the same cursor
    h.proofs.set_delay(Duration::from_millis(20));

    let (first, second) = tokio::join!(run_watcher(&h.services), run_watcher(&h.services));
    let outcomes = [first.unwrap().blocks.outcome, second.unwrap().blocks.outcome];
    assert!(outcomes.contains(&ProgressOutcome::Committed));
    assert!(outcomes.contains(&ProgressOutcome::Superseded));

    assert_eq!(h.store.documents(BLOCKS).unwrap().len(), 2);
    assert_eq!(cursor(&h, EventCategory::Block).await, Some(10));
    let summary = stats(&h).await;
    assert_eq!(summary.total_transaction_count, 8);
    assert_eq!(summary.total_l2_wallet_count, 12);
    assert_eq!(summary.latest_block_number, 2);
}

fn deposit(h: &Harness, id: u64, sender: Address, token_index: u32, amount: u64, rejected: bool) {
    let event = Deposited {
        depositId: U256::from(id),
        sender,
        recipientSaltHash: B256::ZERO,
        tokenIndex: token_index,
        amount: U256::from(amount),
        depositedAt: U256::from(1_000 + id),
    };
    h.l1.push_event(LIQUIDITY, &event, 10 * id, word(0xd000 + id));
    h.l1.set_deposit_data(
        id,
        DepositData { depositHash: word(0xdd00 + id), sender, isRejected: rejected },
    );
}

#[tokio::test]
async fn deposits_count_new_wallets_and_accepted_eth() {
    let h = harness();
    h.l1.set_token(0, TokenInfo { tokenType: 0, tokenAddress: Address::ZERO, tokenId: U256::ZERO });
    h.l1.set_token(
        1,
        TokenInfo { tokenType: 1, tokenAddress: Address::repeat_byte(9), tokenId: U256::ZERO },
    );
    let (alice, bob, carol) =
        (Address::repeat_byte(0xa), Address::repeat_byte(0xb), Address::repeat_byte(0xc));

    deposit(&h, 1, alice, 0, 100, false);
    deposit(&h, 2, alice, 0, 50, false);
    deposit(&h, 3, bob, 0, 1_000, true);
    deposit(&h, 4, bob, 1, 7, false);
    h.l1.set_head(45);

    let report = run_watcher(&h.services).await.unwrap();
    assert_eq!(report.deposits.found, 4);
    let summary = stats(&h).await;
    assert_eq!(summary.total_l1_wallet_count, 2);
    assert_eq!(summary.total_eth_deposit_amount, U256::from(150));

    let stored = h.services.repos.deposits.get_by_hash(&hash_key(&word(0xdd03))).await.unwrap();
    let stored = stored.unwrap();
    assert_eq!(stored.status, DepositStatus::Rejected);
    assert_eq!(stored.block_number, 30);
    assert_eq!(stored.timestamp, 1_003);
    let erc20 = DepositFilter { token_type: Some(TokenType::Erc20), ..Default::default() };
    assert_eq!(h.services.repos.deposits.count(&erc20).await.unwrap(), 1);

    // alice is known, carol is new
    deposit(&h, 5, alice, 0, 1, false);
    deposit(&h, 6, carol, 0, 2, false);
    h.l1.set_head(65);
    run_watcher(&h.services).await.unwrap();

    let summary = stats(&h).await;
    assert_eq!(summary.total_l1_wallet_count, 3);
    assert_eq!(summary.total_eth_deposit_amount, U256::from(153));
    assert_eq!(cursor(&h, EventCategory::Deposit).await, Some(65));
}

#[tokio::test]
async fn unknown_deposit_token_fails_the_run_without_progress() {
    let h = harness();
    deposit(&h, 1, Address::repeat_byte(1), 3, 10, false);
    h.l1.set_head(20);

    let err = run_watcher(&h.services).await.unwrap_err();

    assert!(format!("{err:?}").contains("token index 3"));
    assert_eq!(cursor(&h, EventCategory::Deposit).await, None);
    assert_eq!(stats(&h).await, StatsSummary::default());
}

fn queued(recipient: Address, amount: u64) -> WithdrawalData {
    WithdrawalData { recipient, tokenIndex: 0, amount: U256::from(amount), nullifier: B256::ZERO }
}

#[tokio::test]
async fn claimable_withdrawal_completes_on_its_l1_payout() {
    let h = harness();
    h.l1.set_token(0, TokenInfo::default());
    h.l2.set_head(10);
    h.l2.set_block_timestamp(5, 5_005);

    let (claimable, direct) = (B256::repeat_byte(0xc1), B256::repeat_byte(0xd1));
    let recipient = Address::repeat_byte(3);
    h.l2.push_event(
        WITHDRAWAL,
        &ClaimableWithdrawalQueued {
            withdrawalHash: claimable,
            recipient,
            withdrawal: queued(recipient, 11),
        },
        5,
        word(0x51),
    );
    h.l2.push_event(
        WITHDRAWAL,
        &DirectWithdrawalQueued { withdrawalHash: direct, recipient, withdrawal: queued(recipient, 12) },
        5,
        word(0x52),
    );

    let report = run_watcher(&h.services).await.unwrap();
    assert_eq!(report.withdrawals.found, 2);

    let repo = &h.services.repos.withdrawals;
    let stored = repo.get_by_hash(&hash_key(&claimable)).await.unwrap().unwrap();
    assert_eq!(stored.kind, WithdrawalType::Claimable);
    assert_eq!(stored.status, WithdrawalStatus::Relayed);
    assert_eq!(stored.relayed_tx_hash, Some(word(0x51)));
    assert_eq!(stored.relayed_timestamp, Some(5_005));
    assert_eq!(stored.amount, U256::from(11));

    h.l1.push_event(LIQUIDITY, &WithdrawalClaimable { withdrawalHash: claimable }, 50, word(0x99));
    h.l1.set_block_timestamp(50, 9_050);
    h.l1.set_head(60);

    let report = run_finalizer(&h.services).await.unwrap();
    assert_eq!(report.withdrawals.written, 1);

    let completed = repo.get_by_hash(&hash_key(&claimable)).await.unwrap().unwrap();
    assert_eq!(completed.status, WithdrawalStatus::Completed);
    assert_eq!(completed.liquidity_tx_hash, Some(word(0x99)));
    assert_eq!(completed.liquidity_timestamp, Some(9_050));
    assert_eq!(completed.relayed_timestamp, Some(5_005));

    let pending = repo.get_by_hash(&hash_key(&direct)).await.unwrap().unwrap();
    assert_eq!(pending.status, WithdrawalStatus::Relayed);
    let relayed = WithdrawalFilter { status: Some(WithdrawalStatus::Relayed), ..Default::default() };
    assert_eq!(repo.count(&relayed).await.unwrap(), 1);

    assert_eq!(cursor(&h, EventCategory::WithdrawalRelay).await, Some(60));
}

#[tokio::test]
async fn payout_cursor_advances_without_matches() {
    let h = harness();
    h.l1.set_head(40);

    let report = run_finalizer(&h.services).await.unwrap();

    assert_eq!(report.withdrawals.written, 0);
    assert_eq!(report.withdrawals.outcome, ProgressOutcome::Committed);
    assert_eq!(cursor(&h, EventCategory::WithdrawalRelay).await, Some(40));
    // nothing was relayed, so no payout logs were requested
    assert!(h.l1.log_queries().is_empty());
}
