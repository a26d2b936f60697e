use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

pub const DEMO_FARM_ID: &str = "farm-demo";
pub const DEMO_OWNER_KEY: &str = "+5491100009001";
pub const DEMO_MEMBER_KEY: &str = "+5491100009002";

const SEED_POSITIONS: &[SeedPosition] = &[
    SeedPosition { location: "silo-1", category: "corn-kg", quantity: 12_000 },
    SeedPosition { location: "shed", category: "diesel-l", quantity: 800 },
    SeedPosition { location: "shed", category: "glyphosate-l", quantity: 120 },
    SeedPosition { location: "paddock-1", category: "steer", quantity: 3 },
];

const SEED_TAGS: &[&str] = &["AR-1001", "AR-1002", "AR-1003"];

/// Deterministic demo farm: one ready owner, one open member invitation, a few stock
/// positions and three registered steers in `paddock-1`.
pub struct DemoFarmSeed;

impl DemoFarmSeed {
    pub const SQL: &str = "
        INSERT OR REPLACE INTO farm_invitation (sender_key, farm_id, kind, created_at, consumed_at)
        VALUES
            ('+5491100009001', 'farm-demo', 'owner',
             '2026-03-01T09:00:00.000000Z', '2026-03-01T09:05:00.000000Z'),
            ('+5491100009002', 'farm-demo', 'member', '2026-03-01T09:00:00.000000Z', NULL);

        INSERT OR REPLACE INTO chat_session (
            sender_key, state, farm_id, display_name, email, created_at, last_activity_at
        ) VALUES (
            '+5491100009001', 'ready', 'farm-demo', NULL, 'owner@demo.farm',
            '2026-03-01T09:05:00.000000Z', '2026-03-01T09:05:00.000000Z'
        );

        INSERT OR REPLACE INTO inventory_position (farm_id, location, category, quantity, updated_at)
        VALUES
            ('farm-demo', 'silo-1', 'corn-kg', 12000, '2026-03-01T09:10:00.000000Z'),
            ('farm-demo', 'shed', 'diesel-l', 800, '2026-03-01T09:10:00.000000Z'),
            ('farm-demo', 'shed', 'glyphosate-l', 120, '2026-03-01T09:10:00.000000Z'),
            ('farm-demo', 'paddock-1', 'steer', 3, '2026-03-01T09:10:00.000000Z');

        INSERT OR REPLACE INTO livestock_tag (farm_id, tag, category, location, state, updated_at)
        VALUES
            ('farm-demo', 'AR-1001', 'steer', 'paddock-1', 'registered', '2026-03-01T09:10:00.000000Z'),
            ('farm-demo', 'AR-1002', 'steer', 'paddock-1', 'registered', '2026-03-01T09:10:00.000000Z'),
            ('farm-demo', 'AR-1003', 'steer', 'paddock-1', 'registered', '2026-03-01T09:10:00.000000Z');
    ";

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            farm_id: DEMO_FARM_ID,
            positions_seeded: SEED_POSITIONS.len(),
            tags_seeded: SEED_TAGS.len(),
        })
    }

    /// Checks that every seeded row is still present with its seeded value.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let owner_ready: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM chat_session WHERE sender_key = ?1 AND farm_id = ?2 AND state = 'ready'
             )",
        )
        .bind(DEMO_OWNER_KEY)
        .bind(DEMO_FARM_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("owner-session-ready".to_string(), owner_ready == 1));

        let member_invited: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM farm_invitation
                WHERE sender_key = ?1 AND farm_id = ?2 AND consumed_at IS NULL
             )",
        )
        .bind(DEMO_MEMBER_KEY)
        .bind(DEMO_FARM_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("member-invitation-open".to_string(), member_invited == 1));

        for position in SEED_POSITIONS {
            let quantity: Option<i64> = sqlx::query_scalar(
                "SELECT quantity FROM inventory_position
                 WHERE farm_id = ?1 AND location = ?2 AND category = ?3",
            )
            .bind(DEMO_FARM_ID)
            .bind(position.location)
            .bind(position.category)
            .fetch_optional(pool)
            .await?;
            checks.push((
                format!("position:{}/{}", position.location, position.category),
                quantity == Some(position.quantity),
            ));
        }

        let registered: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM livestock_tag
             WHERE farm_id = ?1 AND state = 'registered' AND tag IN {}",
            sql_array_from_ids(SEED_TAGS)
        ))
        .bind(DEMO_FARM_ID)
        .fetch_one(pool)
        .await?;
        checks.push(("tags-registered".to_string(), registered == SEED_TAGS.len() as i64));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        let senders = sql_array_from_ids(&[DEMO_OWNER_KEY, DEMO_MEMBER_KEY]);

        sqlx::query("DELETE FROM livestock_tag WHERE farm_id = ?1")
            .bind(DEMO_FARM_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM inventory_position WHERE farm_id = ?1")
            .bind(DEMO_FARM_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ledger_event WHERE farm_id = ?1")
            .bind(DEMO_FARM_ID)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM pending_action WHERE sender_key IN {senders}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM chat_session WHERE sender_key IN {senders}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM farm_invitation WHERE sender_key IN {senders}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedPosition {
    location: &'static str,
    category: &'static str,
    quantity: i64,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub farm_id: &'static str,
    pub positions_seeded: usize,
    pub tags_seeded: usize,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

#[cfg(test)]
mod tests {
    use farmhand_core::domain::action::{CategoryKey, LocationRef};
    use farmhand_core::domain::message::SenderKey;
    use farmhand_core::domain::session::{FarmId, SessionState};

    use super::*;
    use crate::repositories::{
        InventoryStore, InvitationRepository, SessionRepository, SqlInventoryStore,
        SqlSessionRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn seed_loads_verifies_and_is_repeatable() {
        let pool = setup_pool().await;

        let result = DemoFarmSeed::load(&pool).await.expect("load");
        assert_eq!(result.positions_seeded, SEED_POSITIONS.len());
        DemoFarmSeed::load(&pool).await.expect("second load replaces rows");

        let verification = DemoFarmSeed::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "failed checks: {:?}", verification.checks);

        pool.close().await;
    }

    #[tokio::test]
    async fn seeded_rows_decode_through_the_repositories() {
        let pool = setup_pool().await;
        DemoFarmSeed::load(&pool).await.expect("load");

        let sessions = SqlSessionRepository::new(pool.clone());
        let owner = sessions
            .find(&SenderKey::new(DEMO_OWNER_KEY))
            .await
            .expect("find owner")
            .expect("owner session");
        assert_eq!(owner.state, SessionState::Ready);
        assert!(sessions
            .find_open(&SenderKey::new(DEMO_MEMBER_KEY))
            .await
            .expect("find invitation")
            .is_some());

        let store = SqlInventoryStore::new(pool.clone());
        let farm = FarmId(DEMO_FARM_ID.to_string());
        let corn = store
            .quantity(&farm, &LocationRef("silo-1".to_string()), &CategoryKey("corn-kg".to_string()))
            .await
            .expect("quantity");
        assert_eq!(corn, 12_000);

        pool.close().await;
    }

    #[tokio::test]
    async fn clean_removes_the_demo_farm() {
        let pool = setup_pool().await;
        DemoFarmSeed::load(&pool).await.expect("load");
        DemoFarmSeed::clean(&pool).await.expect("clean");

        let verification = DemoFarmSeed::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|(_, ok)| !ok));

        pool.close().await;
    }
}
