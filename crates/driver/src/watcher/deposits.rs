//! Deposit ingestion
use std::collections::{BTreeSet, HashMap, HashSet};

use alloy_primitives::{Address, U256};
use chainio::{
    TokenType,
    liquidity::ILiquidity::{DepositData, Deposited},
};
use extractor::{EventLog, TokenMetadata};
use eyre::{Result, eyre};
use store::{
    CursorAdvance, Deposit, DepositFilter, DepositStatus, EventCategory, ProgressUpdate,
    Repositories, ScanRange, StatsDelta, WriteMode,
};
use tracing::info;

use crate::{Services, StageReport};

/// Senders looked up per novelty query.
const SENDER_CHUNK_SIZE: usize = 100;

/// Ingest the deposits made in L1 blocks up to `head`.
pub async fn ingest_deposits(services: &Services, head: u64) -> Result<StageReport> {
    let repos = &services.repos;
    let category = EventCategory::Deposit;

    let cursor = repos.checkpoints.get(category).await?;
    let Some(range) = ScanRange::resolve(cursor.as_ref(), services.deployed.liquidity, head) else {
        info!(%category, head, "No new blocks to scan");
        return Ok(StageReport::skipped(category));
    };
    info!(%category, start = range.start, end = range.end, "Scanning range");

    let events = services.extractor.deposited_events(range.start, range.end).await?;
    let advance = CursorAdvance::new(category, cursor.as_ref(), range.end);
    if events.is_empty() {
        let update = ProgressUpdate { cursors: vec![advance], stats: None };
        let outcome = repos.commit_progress(&update).await?;
        return Ok(StageReport { category, range: Some(range), found: 0, written: 0, outcome });
    }

    let ids: Vec<u64> = events.iter().map(|log| log.event.deposit_id()).collect();
    let (data, tokens) = tokio::try_join!(
        services.extractor.deposit_data(&ids, range.end),
        services.extractor.token_metadata(events.iter().map(|log| log.event.tokenIndex)),
    )?;

    let deposits = events
        .iter()
        .zip(&data)
        .map(|(log, data)| to_deposit(log, data, &tokens))
        .collect::<Result<Vec<_>>>()?;

    let created = repos.deposits.upsert_batch(&deposits, WriteMode::Create).await?;
    let delta = StatsDelta {
        l1_wallet_count: new_sender_count(repos, &deposits, range.start).await?,
        eth_deposit_amount: eth_deposit_amount(&deposits),
        ..Default::default()
    };
    info!(
        found = deposits.len(),
        created = created.len(),
        new_wallets = delta.l1_wallet_count,
        eth = %delta.eth_deposit_amount,
        "Deposits ingested"
    );

    let update = ProgressUpdate { cursors: vec![advance], stats: Some(delta) };
    let outcome = repos.commit_progress(&update).await?;
    Ok(StageReport {
        category,
        range: Some(range),
        found: deposits.len(),
        written: created.len(),
        outcome,
    })
}

fn to_deposit(
    log: &EventLog<Deposited>,
    data: &DepositData,
    tokens: &HashMap<u32, TokenMetadata>,
) -> Result<Deposit> {
    let token_index = log.event.tokenIndex;
    let token = tokens
        .get(&token_index)
        .ok_or_else(|| eyre!("no token metadata for token index {token_index}"))?;

    Ok(Deposit {
        hash: data.depositHash,
        deposit_id: log.event.deposit_id(),
        sender: log.event.sender,
        token_index,
        token_type: token.token_type,
        amount: log.event.amount,
        block_number: log.block_number,
        timestamp: log.event.deposited_at(),
        status: if data.isRejected { DepositStatus::Rejected } else { DepositStatus::Completed },
        tx_hash: log.tx_hash,
    })
}

/// Native-asset amount accepted by the liquidity contract.
fn eth_deposit_amount(deposits: &[Deposit]) -> U256 {
    deposits
        .iter()
        .filter(|d| d.status != DepositStatus::Rejected && d.token_type == TokenType::Native)
        .fold(U256::ZERO, |sum, d| sum.saturating_add(d.amount))
}

/// Number of distinct senders in the range with no deposit in an earlier L1 block.
async fn new_sender_count(
    repos: &Repositories,
    deposits: &[Deposit],
    range_start: u64,
) -> Result<u64> {
    let senders: Vec<Address> =
        deposits.iter().map(|d| d.sender).collect::<BTreeSet<_>>().into_iter().collect();

    let mut known = HashSet::new();
    for chunk in senders.chunks(SENDER_CHUNK_SIZE) {
        let filter = DepositFilter {
            senders: Some(chunk.to_vec()),
            before_block: Some(range_start),
            ..Default::default()
        };
        known.extend(repos.deposits.list_all(&filter).await?.into_iter().map(|d| d.sender));
    }

    Ok(senders.iter().filter(|sender| !known.contains(*sender)).count() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn deposit(token_type: TokenType, status: DepositStatus, amount: u64) -> Deposit {
        Deposit {
            hash: B256::ZERO,
            deposit_id: 0,
            sender: Address::ZERO,
            token_index: 0,
            token_type,
            amount: U256::from(amount),
            block_number: 0,
            timestamp: 0,
            status,
            tx_hash: B256::ZERO,
        }
    }

    #[test]
    fn eth_amount_skips_rejected_and_non_native_deposits() {
        let deposits = [
            deposit(TokenType::Native, DepositStatus::Completed, 10),
            deposit(TokenType::Native, DepositStatus::Rejected, 100),
            deposit(TokenType::Erc20, DepositStatus::Completed, 1_000),
            deposit(TokenType::Native, DepositStatus::Completed, 5),
        ];

        assert_eq!(eth_deposit_amount(&deposits), U256::from(15));
    }

    #[test]
    fn missing_token_metadata_is_an_error() {
        let log = EventLog {
            event: Deposited { tokenIndex: 9, ..Default::default() },
            block_number: 1,
            tx_hash: B256::ZERO,
            block_timestamp: None,
        };

        let err = to_deposit(&log, &DepositData::default(), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("token index 9"));
    }
}
