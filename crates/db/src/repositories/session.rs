use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use farmhand_core::domain::message::SenderKey;
use farmhand_core::domain::session::{
    FarmId, Invitation, InvitationKind, Session, SessionState,
};

use super::decode::{parse_optional_timestamp, parse_timestamp, timestamp};
use super::{InvitationRepository, RepositoryError, SessionRepository};
use crate::DbPool;

const SESSION_COLUMNS: &str =
    "sender_key, state, farm_id, display_name, email, created_at, last_activity_at";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find(&self, sender_key: &SenderKey) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM chat_session WHERE sender_key = ?"
        ))
        .bind(sender_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn start_from_invitation(
        &self,
        sender_key: &SenderKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let invitation = sqlx::query(
            "SELECT sender_key, farm_id, kind, created_at, consumed_at
             FROM farm_invitation
             WHERE sender_key = ? AND consumed_at IS NULL",
        )
        .bind(sender_key.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(invitation_from_row)
        .transpose()?;

        let Some(invitation) = invitation else {
            return Ok(None);
        };

        let session = Session::from_invitation(&invitation, now);
        sqlx::query(
            "INSERT INTO chat_session (
                sender_key, state, farm_id, display_name, email, created_at, last_activity_at
             ) VALUES (?, ?, ?, NULL, NULL, ?, ?)",
        )
        .bind(session.sender_key.as_str())
        .bind(session.state.as_str())
        .bind(&session.farm_id.0)
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.last_activity_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            RepositoryError::from_write(error, || format!("session {sender_key} already exists"))
        })?;

        sqlx::query("UPDATE farm_invitation SET consumed_at = ? WHERE sender_key = ?")
            .bind(timestamp(now))
            .bind(sender_key.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_session (
                sender_key, state, farm_id, display_name, email, created_at, last_activity_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(sender_key) DO UPDATE SET
                state = excluded.state,
                farm_id = excluded.farm_id,
                display_name = excluded.display_name,
                email = excluded.email,
                last_activity_at = excluded.last_activity_at",
        )
        .bind(session.sender_key.as_str())
        .bind(session.state.as_str())
        .bind(&session.farm_id.0)
        .bind(session.display_name.as_deref())
        .bind(session.email.as_deref())
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.last_activity_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            RepositoryError::from_write(error, || {
                format!("email {} is already registered", session.email.as_deref().unwrap_or("-"))
            })
        })?;

        Ok(())
    }

    async fn email_taken(
        &self,
        email: &str,
        except: &SenderKey,
    ) -> Result<bool, RepositoryError> {
        let count = sqlx::query(
            "SELECT COUNT(*) AS count FROM chat_session WHERE email = ? AND sender_key <> ?",
        )
        .bind(email)
        .bind(except.as_str())
        .fetch_one(&self.pool)
        .await?
        .try_get::<i64, _>("count")?;

        Ok(count > 0)
    }

    async fn list_ready(&self, farm_id: Option<&FarmId>) -> Result<Vec<Session>, RepositoryError> {
        let rows = match farm_id {
            Some(farm_id) => {
                sqlx::query(&format!(
                    "SELECT {SESSION_COLUMNS} FROM chat_session
                     WHERE state = 'ready' AND farm_id = ?
                     ORDER BY sender_key ASC"
                ))
                .bind(&farm_id.0)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SESSION_COLUMNS} FROM chat_session
                     WHERE state = 'ready'
                     ORDER BY sender_key ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(session_from_row).collect()
    }
}

#[async_trait::async_trait]
impl InvitationRepository for SqlSessionRepository {
    async fn invite(&self, invitation: Invitation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO farm_invitation (sender_key, farm_id, kind, created_at, consumed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(sender_key) DO UPDATE SET
                farm_id = excluded.farm_id,
                kind = excluded.kind,
                created_at = excluded.created_at,
                consumed_at = excluded.consumed_at",
        )
        .bind(invitation.sender_key.as_str())
        .bind(&invitation.farm_id.0)
        .bind(invitation.kind.as_str())
        .bind(timestamp(invitation.created_at))
        .bind(invitation.consumed_at.map(timestamp))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_open(
        &self,
        sender_key: &SenderKey,
    ) -> Result<Option<Invitation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT sender_key, farm_id, kind, created_at, consumed_at
             FROM farm_invitation
             WHERE sender_key = ? AND consumed_at IS NULL",
        )
        .bind(sender_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(invitation_from_row).transpose()
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = SessionState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session state `{state_raw}`")))?;

    Ok(Session {
        sender_key: SenderKey(row.try_get("sender_key")?),
        state,
        farm_id: FarmId(row.try_get("farm_id")?),
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
    })
}

fn invitation_from_row(row: SqliteRow) -> Result<Invitation, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = InvitationKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown invitation kind `{kind_raw}`")))?;

    Ok(Invitation {
        sender_key: SenderKey(row.try_get("sender_key")?),
        farm_id: FarmId(row.try_get("farm_id")?),
        kind,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        consumed_at: parse_optional_timestamp("consumed_at", row.try_get("consumed_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use farmhand_core::domain::message::SenderKey;
    use farmhand_core::domain::session::{FarmId, Invitation, InvitationKind, SessionState};

    use super::SqlSessionRepository;
    use crate::repositories::{InvitationRepository, RepositoryError, SessionRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn farm() -> FarmId {
        FarmId("farm-1".to_string())
    }

    #[tokio::test]
    async fn session_starts_only_from_an_open_invitation() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let sender = SenderKey::new("+5491100000001");
        let now = DateTime::parse_from_rfc3339("2026-03-09T08:00:00Z")
            .expect("valid rfc3339")
            .with_timezone(&Utc);

        assert_eq!(repo.start_from_invitation(&sender, now).await.expect("start"), None);

        repo.invite(Invitation::new(sender.clone(), farm(), InvitationKind::Owner))
            .await
            .expect("invite");
        let session = repo
            .start_from_invitation(&sender, now)
            .await
            .expect("start")
            .expect("session created");
        assert_eq!(session.state, SessionState::OnboardingEmail);
        assert_eq!(repo.find(&sender).await.expect("find"), Some(session));
        assert_eq!(repo.find_open(&sender).await.expect("open invitation"), None);

        pool.close().await;
    }

    #[tokio::test]
    async fn email_is_unique_across_sessions() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let first = SenderKey::new("+5491100000001");
        let second = SenderKey::new("+5491100000002");
        for sender in [&first, &second] {
            repo.invite(Invitation::new(sender.clone(), farm(), InvitationKind::Owner))
                .await
                .expect("invite");
        }

        let mut owner =
            repo.start_from_invitation(&first, Utc::now()).await.expect("start").expect("session");
        owner.email = Some("owner@farm.com".to_string());
        owner.state = SessionState::Ready;
        repo.save(&owner).await.expect("save owner");

        assert!(repo.email_taken("owner@farm.com", &second).await.expect("lookup"));
        assert!(!repo.email_taken("owner@farm.com", &first).await.expect("lookup"));

        let mut other =
            repo.start_from_invitation(&second, Utc::now()).await.expect("start").expect("session");
        other.email = Some("owner@farm.com".to_string());
        assert!(matches!(repo.save(&other).await, Err(RepositoryError::Conflict(_))));

        let ready = repo.list_ready(Some(&farm())).await.expect("list ready");
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].sender_key, first);

        pool.close().await;
    }
}
