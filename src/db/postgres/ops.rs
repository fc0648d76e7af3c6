use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio_postgres::{error::SqlState, Row};

use crate::db::{
    models::{
        merge_holders, Burn, ChainKey, Distribution, EarnedTotal, Holder, Scope, Swap,
    },
    postgres::PostgresClient,
    LedgerStore,
};

const HOLDER_COLUMNS: &str = "address, balance_nova, balance_one, balance_eth, total_balance, \
     username, label, last_transfer_at, has_outgoing, balance_updated_at";

fn holder_from_row(row: &Row) -> Holder {
    Holder {
        address: row.get("address"),
        balance_nova: row.get("balance_nova"),
        balance_one: row.get("balance_one"),
        balance_eth: row.get("balance_eth"),
        total_balance: row.get("total_balance"),
        username: row.get("username"),
        label: row.get("label"),
        last_transfer_at: row.get("last_transfer_at"),
        has_outgoing: row.get("has_outgoing"),
        balance_updated_at: row.get("balance_updated_at"),
    }
}

/// A unique violation means another writer stored the same record first.
fn absorb_conflict(
    result: Result<u64, tokio_postgres::Error>,
    what: &str,
    key: &str,
) -> anyhow::Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
            debug!("{} {} already stored", what, key);
            Ok(())
        },
        Err(e) => {
            error!("Failed to upsert {} {}: {:?}", what, key, e);
            Err(e.into())
        },
    }
}

#[async_trait]
impl LedgerStore for PostgresClient {
    // ==================== RECORDS ====================

    async fn upsert_burn(&self, burn: &Burn) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.burns (tx_hash, chain, sender, amount, block_number, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_hash) DO UPDATE SET
                chain = EXCLUDED.chain,
                sender = EXCLUDED.sender,
                amount = EXCLUDED.amount,
                block_number = EXCLUDED.block_number,
                timestamp = EXCLUDED.timestamp
        "#;

        let result = client
            .execute(
                query,
                &[
                    &burn.tx_hash,
                    &burn.chain,
                    &burn.sender,
                    &burn.amount,
                    &(burn.block_number as i64),
                    &burn.timestamp,
                ],
            )
            .await;

        absorb_conflict(result, "burn", &burn.tx_hash)
    }

    async fn upsert_swap(&self, swap: &Swap) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.swaps (
                tx_hash, chain, dex, action, token_in, amount_in,
                token_out, amount_out, maker, block_number, timestamp
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tx_hash) DO UPDATE SET
                chain = EXCLUDED.chain,
                dex = EXCLUDED.dex,
                action = EXCLUDED.action,
                token_in = EXCLUDED.token_in,
                amount_in = EXCLUDED.amount_in,
                token_out = EXCLUDED.token_out,
                amount_out = EXCLUDED.amount_out,
                maker = EXCLUDED.maker,
                block_number = EXCLUDED.block_number,
                timestamp = EXCLUDED.timestamp
        "#;

        let result = client
            .execute(
                query,
                &[
                    &swap.tx_hash,
                    &swap.chain,
                    &swap.dex,
                    &swap.action.as_str(),
                    &swap.token_in,
                    &swap.amount_in,
                    &swap.token_out,
                    &swap.amount_out,
                    &swap.maker,
                    &(swap.block_number as i64),
                    &swap.timestamp,
                ],
            )
            .await;

        absorb_conflict(result, "swap", &swap.tx_hash)
    }

    async fn upsert_distribution(&self, distribution: &Distribution) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.distributions (
                tx_hash, log_index, chain, distributor, recipient, amount, block_number, timestamp
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tx_hash, log_index) DO UPDATE SET
                chain = EXCLUDED.chain,
                distributor = EXCLUDED.distributor,
                recipient = EXCLUDED.recipient,
                amount = EXCLUDED.amount,
                block_number = EXCLUDED.block_number,
                timestamp = EXCLUDED.timestamp
        "#;

        let result = client
            .execute(
                query,
                &[
                    &distribution.tx_hash,
                    &(distribution.log_index as i64),
                    &distribution.chain,
                    &distribution.distributor,
                    &distribution.recipient,
                    &distribution.amount,
                    &(distribution.block_number as i64),
                    &distribution.timestamp,
                ],
            )
            .await;

        let key = format!("{}#{}", distribution.tx_hash, distribution.log_index);
        absorb_conflict(result, "distribution", &key)
    }

    // ==================== HOLDERS ====================

    async fn set_chain_balance(
        &self,
        address: &str,
        chain: ChainKey,
        balance: f64,
    ) -> anyhow::Result<Holder> {
        let client = self.pool.get().await?;
        let column = chain.balance_column();
        // total_balance is a generated column, so it is recomputed in the same write.
        let query = format!(
            r#"
            INSERT INTO ledger.holders (address, {column}, balance_updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (address) DO UPDATE SET
                {column} = EXCLUDED.{column},
                balance_updated_at = EXCLUDED.balance_updated_at
            RETURNING {HOLDER_COLUMNS}
            "#
        );

        let row = client
            .query_one(&query, &[&address, &balance])
            .await
            .map_err(|e| {
                error!("Failed to set {} balance for {}: {:?}", chain, address, e);
                e
            })?;

        Ok(holder_from_row(&row))
    }

    async fn record_activity(
        &self,
        address: &str,
        at: DateTime<Utc>,
        outgoing: bool,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.holders (address, last_transfer_at, has_outgoing)
            VALUES ($1, $2, $3)
            ON CONFLICT (address) DO UPDATE SET
                last_transfer_at = GREATEST(ledger.holders.last_transfer_at, EXCLUDED.last_transfer_at),
                has_outgoing = ledger.holders.has_outgoing OR EXCLUDED.has_outgoing
        "#;

        let result = client.execute(query, &[&address, &at, &outgoing]).await;
        absorb_conflict(result, "holder activity", address)
    }

    async fn get_holder(&self, address: &str) -> anyhow::Result<Option<Holder>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {HOLDER_COLUMNS} FROM ledger.holders WHERE address = $1");

        let row = client.query_opt(&query, &[&address]).await?;
        Ok(row.as_ref().map(holder_from_row))
    }

    async fn stale_holders(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<Holder>> {
        let client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {HOLDER_COLUMNS} FROM ledger.holders
            WHERE balance_updated_at IS NULL OR balance_updated_at < $1
            ORDER BY (label IS NULL), (username IS NULL), balance_updated_at NULLS FIRST
            LIMIT $2
            "#
        );

        let rows = client.query(&query, &[&before, &(limit as i64)]).await?;
        Ok(rows.iter().map(holder_from_row).collect())
    }

    async fn merge_duplicate_holders(&self) -> anyhow::Result<usize> {
        let mut client = self.pool.get().await?;
        let query = format!(
            r#"
            SELECT {HOLDER_COLUMNS} FROM ledger.holders
            WHERE lower(address) IN (
                SELECT lower(address) FROM ledger.holders
                GROUP BY lower(address)
                HAVING COUNT(*) > 1
            )
            "#
        );

        let rows = client.query(&query, &[]).await?;
        let mut groups: BTreeMap<String, Vec<Holder>> = BTreeMap::new();
        for row in &rows {
            let holder = holder_from_row(row);
            groups
                .entry(holder.address.to_lowercase())
                .or_default()
                .push(holder);
        }

        if groups.is_empty() {
            return Ok(0);
        }

        let tx = client.transaction().await?;
        let mut removed = 0;

        for group in groups.into_values() {
            let size = group.len();
            let Some((merged, losers)) = merge_holders(group) else {
                continue;
            };

            tx.execute(
                "DELETE FROM ledger.holders WHERE address = ANY($1)",
                &[&losers],
            )
            .await?;

            tx.execute(
                r#"
                INSERT INTO ledger.holders (
                    address, balance_nova, balance_one, balance_eth, username, label,
                    last_transfer_at, has_outgoing, balance_updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (address) DO UPDATE SET
                    balance_nova = EXCLUDED.balance_nova,
                    balance_one = EXCLUDED.balance_one,
                    balance_eth = EXCLUDED.balance_eth,
                    username = EXCLUDED.username,
                    label = EXCLUDED.label,
                    last_transfer_at = EXCLUDED.last_transfer_at,
                    has_outgoing = EXCLUDED.has_outgoing,
                    balance_updated_at = EXCLUDED.balance_updated_at
                "#,
                &[
                    &merged.address,
                    &merged.balance_nova,
                    &merged.balance_one,
                    &merged.balance_eth,
                    &merged.username,
                    &merged.label,
                    &merged.last_transfer_at,
                    &merged.has_outgoing,
                    &merged.balance_updated_at,
                ],
            )
            .await?;

            removed += size - 1;
        }

        tx.commit().await?;
        info!("Merged {} duplicate holder row(s)", removed);
        Ok(removed)
    }

    // ==================== CHECKPOINTS ====================

    async fn get_checkpoint(&self, scope: &Scope) -> anyhow::Result<Option<u64>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT block_number FROM ledger.checkpoints WHERE scope = $1",
                &[&scope.to_string()],
            )
            .await?;

        Ok(row.map(|row| row.get::<_, i64>("block_number") as u64))
    }

    async fn set_checkpoint(&self, scope: &Scope, block: u64) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO ledger.checkpoints (scope, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (scope) DO UPDATE SET
                block_number = GREATEST(ledger.checkpoints.block_number, EXCLUDED.block_number),
                updated_at = EXCLUDED.updated_at
        "#;

        client
            .execute(query, &[&scope.to_string(), &(block as i64)])
            .await
            .map_err(|e| {
                error!("Failed to store checkpoint {} at {}: {:?}", scope, block, e);
                e
            })?;

        Ok(())
    }

    async fn max_block(&self, scope: &Scope) -> anyhow::Result<Option<u64>> {
        let client = self.pool.get().await?;

        let row = match scope {
            Scope::Monitor(_) => return Ok(None),
            Scope::Burns(chain) => {
                client
                    .query_one(
                        "SELECT MAX(block_number) FROM ledger.burns WHERE chain = $1",
                        &[chain],
                    )
                    .await?
            },
            Scope::Swaps { chain, dex } => {
                client
                    .query_one(
                        "SELECT MAX(block_number) FROM ledger.swaps WHERE chain = $1 AND dex = $2",
                        &[chain, dex],
                    )
                    .await?
            },
            Scope::Distributor { chain, distributor } => {
                client
                    .query_one(
                        "SELECT MAX(block_number) FROM ledger.distributions WHERE chain = $1 AND distributor = $2",
                        &[chain, distributor],
                    )
                    .await?
            },
        };

        Ok(row.get::<_, Option<i64>>(0).map(|block| block as u64))
    }

    // ==================== DISTRIBUTIONS ====================

    async fn earned_totals(&self, chain: Option<ChainKey>) -> anyhow::Result<Vec<EarnedTotal>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT recipient, SUM(amount) AS amount, COUNT(*) AS distributions
            FROM ledger.distributions
            WHERE $1::ledger.chain_key IS NULL OR chain = $1
            GROUP BY recipient
            ORDER BY amount DESC
        "#;

        let rows = client.query(query, &[&chain]).await?;
        Ok(rows
            .iter()
            .map(|row| EarnedTotal {
                recipient: row.get("recipient"),
                amount: row.get("amount"),
                distributions: row.get::<_, i64>("distributions") as u64,
            })
            .collect())
    }
}
