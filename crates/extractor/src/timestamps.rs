use std::collections::{BTreeSet, HashMap};

use eyre::{Result, eyre};
use primitives::Throttle;

use crate::ChainClient;

/// Look up the timestamp of every distinct block in `numbers`, throttled batch by batch.
///
/// A block the node does not know fails the whole lookup.
pub async fn resolve_block_timestamps(
    client: &dyn ChainClient,
    throttle: &Throttle,
    numbers: impl IntoIterator<Item = u64>,
) -> Result<HashMap<u64, u64>> {
    let unique: Vec<u64> = numbers.into_iter().collect::<BTreeSet<_>>().into_iter().collect();

    let timestamps = throttle
        .run(&unique, |&number| async move {
            client
                .block_timestamp(number)
                .await?
                .ok_or_else(|| eyre!("block {number} not found while resolving its timestamp"))
        })
        .await?;

    Ok(unique.into_iter().zip(timestamps).collect())
}
