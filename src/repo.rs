use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("already resolved")]
    AlreadyResolved,
    #[error("no neighbours")]
    NoNeighbours,
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("storage failure: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Atomic upsert keyed by tg_id; identity fields stay as first observed.
    async fn get_or_create_user(&self, tg_id: i64, mention: &str) -> RepoResult<User>;
    async fn user_by_tg_id(&self, tg_id: i64) -> RepoResult<User>;
    async fn user_by_id(&self, id: Id) -> RepoResult<User>;
}

#[async_trait]
pub trait ChatRepo: Send + Sync {
    async fn get_or_create_chat(&self, chat_id: i64, title: &str) -> RepoResult<Chat>;
    async fn chat_by_chat_id(&self, chat_id: i64) -> RepoResult<Chat>;
    async fn chat_by_id(&self, id: Id) -> RepoResult<Chat>;
}

#[async_trait]
pub trait KarmaRepo: Send + Sync {
    async fn get_or_create_karma(&self, user_id: Id, chat_id: Id) -> RepoResult<UserKarma>;
    /// Atomically adds `delta` to the (user, chat) score, creating the row at
    /// zero first if needed. Concurrent deltas must both land. Returns the
    /// resulting score.
    async fn apply_delta(&self, user_id: Id, chat_id: Id, delta: f64) -> RepoResult<f64>;
    /// Sets absolute scores for a batch of users in one chat as a single
    /// atomic unit: all writes land or none do.
    async fn bulk_set(&self, chat_id: Id, entries: &[(Id, f64)]) -> RepoResult<()>;
    /// Descending by karma, ties broken by ascending user id.
    async fn top_n(&self, chat_id: Id, limit: usize) -> RepoResult<Vec<KarmaEntry>>;
    /// 1-based position in the chat's full descending ranking.
    async fn rank_of(&self, user_id: Id, chat_id: Id) -> RepoResult<i64>;
    /// Rows directly above, at, and below the user's rank. `NoNeighbours`
    /// when the user is unranked or is the only ranked entry in the chat.
    async fn neighbours(&self, user_id: Id, chat_id: Id) -> RepoResult<Neighbours>;
    /// The user's karma and rank in every chat where a row exists.
    async fn standings_for_user(&self, user_id: Id) -> RepoResult<Vec<ChatStanding>>;
}

#[async_trait]
pub trait ReportRepo: Send + Sync {
    async fn create_report(&self, new: NewReport) -> RepoResult<Report>;
    async fn report_by_id(&self, id: Id) -> RepoResult<Report>;
    /// The identified report first, then every other still-PENDING report on
    /// the same (chat, reported message), in creation order. `NotFound` when
    /// the id does not resolve, `AlreadyResolved` when it does but the report
    /// has already left PENDING.
    async fn linked_pending_reports(&self, id: Id) -> RepoResult<Vec<Report>>;
    async fn save_report(&self, report: &Report) -> RepoResult<()>;
    /// Persists a group of already-mutated reports as one atomic unit.
    async fn save_reports(&self, reports: &[Report]) -> RepoResult<()>;
}

pub trait Repo: UserRepo + ChatRepo + KarmaRepo + ReportRepo {}

impl<T> Repo for T where T: UserRepo + ChatRepo + KarmaRepo + ReportRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::cmp::Ordering;
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        chats: HashMap<Id, Chat>,
        karma: HashMap<Id, UserKarma>,
        reports: HashMap<Id, Report>,
        next_id: Id,
    }

    impl State {
        /// Full descending ranking of one chat; karma desc, user id asc.
        fn ranking(&self, chat_id: Id) -> Vec<KarmaEntry> {
            let mut rows: Vec<KarmaEntry> = self
                .karma
                .values()
                .filter(|uk| uk.chat_id == chat_id)
                .filter_map(|uk| {
                    self.users.get(&uk.user_id).map(|u| KarmaEntry {
                        user: u.clone(),
                        karma: uk.karma,
                    })
                })
                .collect();
            rows.sort_by(|a, b| {
                b.karma
                    .partial_cmp(&a.karma)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.user.id.cmp(&b.user.id))
            });
            rows
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("KARMAD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("KARMAD_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        tracing::warn!(
                            "failed to parse snapshot '{}': {e}, starting empty",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    tracing::warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn get_or_create_user(&self, tg_id: i64, mention: &str) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if let Some(u) = s.users.values().find(|u| u.tg_id == tg_id) {
                return Ok(u.clone());
            }
            let id = Self::next_id(&mut s);
            let user = User {
                id,
                tg_id,
                mention: mention.to_string(),
                created_at: Utc::now(),
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn user_by_tg_id(&self, tg_id: i64) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.tg_id == tg_id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn user_by_id(&self, id: Id) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl ChatRepo for InMemRepo {
        async fn get_or_create_chat(&self, chat_id: i64, title: &str) -> RepoResult<Chat> {
            let mut s = self.state.write().unwrap();
            if let Some(c) = s.chats.values().find(|c| c.chat_id == chat_id) {
                return Ok(c.clone());
            }
            let id = Self::next_id(&mut s);
            let chat = Chat {
                id,
                chat_id,
                title: title.to_string(),
                created_at: Utc::now(),
            };
            s.chats.insert(id, chat.clone());
            drop(s);
            self.persist();
            Ok(chat)
        }

        async fn chat_by_chat_id(&self, chat_id: i64) -> RepoResult<Chat> {
            let s = self.state.read().unwrap();
            s.chats
                .values()
                .find(|c| c.chat_id == chat_id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn chat_by_id(&self, id: Id) -> RepoResult<Chat> {
            let s = self.state.read().unwrap();
            s.chats.get(&id).cloned().ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl KarmaRepo for InMemRepo {
        async fn get_or_create_karma(&self, user_id: Id, chat_id: Id) -> RepoResult<UserKarma> {
            let mut s = self.state.write().unwrap();
            if let Some(uk) = s
                .karma
                .values()
                .find(|uk| uk.user_id == user_id && uk.chat_id == chat_id)
            {
                return Ok(uk.clone());
            }
            let id = Self::next_id(&mut s);
            let uk = UserKarma {
                id,
                user_id,
                chat_id,
                karma: 0.0,
            };
            s.karma.insert(id, uk.clone());
            drop(s);
            self.persist();
            Ok(uk)
        }

        async fn apply_delta(&self, user_id: Id, chat_id: Id, delta: f64) -> RepoResult<f64> {
            // One write-lock section; nothing can interleave between read
            // and update, so concurrent deltas both land.
            let mut s = self.state.write().unwrap();
            let karma = if let Some(uk) = s
                .karma
                .values_mut()
                .find(|uk| uk.user_id == user_id && uk.chat_id == chat_id)
            {
                uk.karma += delta;
                uk.karma
            } else {
                let id = Self::next_id(&mut s);
                s.karma.insert(
                    id,
                    UserKarma {
                        id,
                        user_id,
                        chat_id,
                        karma: delta,
                    },
                );
                delta
            };
            drop(s);
            self.persist();
            Ok(karma)
        }

        async fn bulk_set(&self, chat_id: Id, entries: &[(Id, f64)]) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            // Validate the whole batch before touching anything.
            for (user_id, _) in entries {
                if !s.users.contains_key(user_id) {
                    return Err(RepoError::Transaction(format!("unknown user {user_id}")));
                }
            }
            for (user_id, karma) in entries {
                if let Some(uk) = s
                    .karma
                    .values_mut()
                    .find(|uk| uk.user_id == *user_id && uk.chat_id == chat_id)
                {
                    uk.karma = *karma;
                } else {
                    let id = Self::next_id(&mut s);
                    s.karma.insert(
                        id,
                        UserKarma {
                            id,
                            user_id: *user_id,
                            chat_id,
                            karma: *karma,
                        },
                    );
                }
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn top_n(&self, chat_id: Id, limit: usize) -> RepoResult<Vec<KarmaEntry>> {
            let s = self.state.read().unwrap();
            let mut rows = s.ranking(chat_id);
            rows.truncate(limit);
            Ok(rows)
        }

        async fn rank_of(&self, user_id: Id, chat_id: Id) -> RepoResult<i64> {
            let s = self.state.read().unwrap();
            s.ranking(chat_id)
                .iter()
                .position(|e| e.user.id == user_id)
                .map(|i| i as i64 + 1)
                .ok_or(RepoError::NotFound)
        }

        async fn neighbours(&self, user_id: Id, chat_id: Id) -> RepoResult<Neighbours> {
            let s = self.state.read().unwrap();
            let rows = s.ranking(chat_id);
            let idx = rows
                .iter()
                .position(|e| e.user.id == user_id)
                .ok_or(RepoError::NoNeighbours)?;
            let prev = (idx > 0).then(|| rows[idx - 1].clone());
            let next = rows.get(idx + 1).cloned();
            if prev.is_none() && next.is_none() {
                return Err(RepoError::NoNeighbours);
            }
            Ok(Neighbours {
                prev,
                me: rows[idx].clone(),
                next,
            })
        }

        async fn standings_for_user(&self, user_id: Id) -> RepoResult<Vec<ChatStanding>> {
            let s = self.state.read().unwrap();
            let mut chat_ids: Vec<Id> = s
                .karma
                .values()
                .filter(|uk| uk.user_id == user_id)
                .map(|uk| uk.chat_id)
                .collect();
            chat_ids.sort_unstable();
            let mut out = Vec::with_capacity(chat_ids.len());
            for cid in chat_ids {
                let Some(chat) = s.chats.get(&cid).cloned() else {
                    continue;
                };
                let rows = s.ranking(cid);
                if let Some(pos) = rows.iter().position(|e| e.user.id == user_id) {
                    out.push(ChatStanding {
                        chat,
                        karma: rows[pos].karma,
                        position: pos as i64 + 1,
                    });
                }
            }
            Ok(out)
        }
    }

    #[async_trait]
    impl ReportRepo for InMemRepo {
        async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
            let mut s = self.state.write().unwrap();
            let id = Self::next_id(&mut s);
            let report = Report {
                id,
                reporter_id: new.reporter_id,
                reported_user_id: new.reported_user_id,
                chat_id: new.chat_id,
                reported_message_id: new.reported_message_id,
                command_message_id: new.command_message_id,
                bot_reply_message_id: None,
                status: ReportStatus::Pending,
                resolved_by: None,
                resolution_time: None,
                created_at: Utc::now(),
            };
            s.reports.insert(id, report.clone());
            drop(s);
            self.persist();
            Ok(report)
        }

        async fn report_by_id(&self, id: Id) -> RepoResult<Report> {
            let s = self.state.read().unwrap();
            s.reports.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn linked_pending_reports(&self, id: Id) -> RepoResult<Vec<Report>> {
            let s = self.state.read().unwrap();
            let root = s.reports.get(&id).cloned().ok_or(RepoError::NotFound)?;
            if root.status != ReportStatus::Pending {
                return Err(RepoError::AlreadyResolved);
            }
            let mut linked: Vec<Report> = s
                .reports
                .values()
                .filter(|r| {
                    r.id != root.id
                        && r.chat_id == root.chat_id
                        && r.reported_message_id == root.reported_message_id
                        && r.status == ReportStatus::Pending
                })
                .cloned()
                .collect();
            // Ids are allocated monotonically, so id order is creation order.
            linked.sort_by_key(|r| r.id);
            let mut out = Vec::with_capacity(linked.len() + 1);
            out.push(root);
            out.extend(linked);
            Ok(out)
        }

        async fn save_report(&self, report: &Report) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if !s.reports.contains_key(&report.id) {
                return Err(RepoError::NotFound);
            }
            s.reports.insert(report.id, report.clone());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn save_reports(&self, reports: &[Report]) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            for r in reports {
                if !s.reports.contains_key(&r.id) {
                    return Err(RepoError::Transaction(format!("unknown report {}", r.id)));
                }
            }
            for r in reports {
                s.reports.insert(r.id, r.clone());
            }
            drop(s);
            self.persist();
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    #[derive(sqlx::FromRow)]
    struct RankedRow {
        id: Id,
        tg_id: i64,
        mention: String,
        created_at: chrono::DateTime<Utc>,
        karma: f64,
        rank: i64,
    }

    impl RankedRow {
        fn into_entry(self) -> (KarmaEntry, i64) {
            (
                KarmaEntry {
                    user: User {
                        id: self.id,
                        tg_id: self.tg_id,
                        mention: self.mention,
                        created_at: self.created_at,
                    },
                    karma: self.karma,
                },
                self.rank,
            )
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn get_or_create_user(&self, tg_id: i64, mention: &str) -> RepoResult<User> {
            // No-op update makes RETURNING yield the row on conflict while
            // leaving first-observed identity fields untouched.
            sqlx::query_as::<_, User>(
                "INSERT INTO users (tg_id, mention) VALUES ($1, $2)
                 ON CONFLICT (tg_id) DO UPDATE SET tg_id = EXCLUDED.tg_id
                 RETURNING id, tg_id, mention, created_at",
            )
            .bind(tg_id)
            .bind(mention)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn user_by_tg_id(&self, tg_id: i64) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "SELECT id, tg_id, mention, created_at FROM users WHERE tg_id = $1",
            )
            .bind(tg_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }

        async fn user_by_id(&self, id: Id) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "SELECT id, tg_id, mention, created_at FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl ChatRepo for PgRepo {
        async fn get_or_create_chat(&self, chat_id: i64, title: &str) -> RepoResult<Chat> {
            sqlx::query_as::<_, Chat>(
                "INSERT INTO chats (chat_id, title) VALUES ($1, $2)
                 ON CONFLICT (chat_id) DO UPDATE SET chat_id = EXCLUDED.chat_id
                 RETURNING id, chat_id, title, created_at",
            )
            .bind(chat_id)
            .bind(title)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn chat_by_chat_id(&self, chat_id: i64) -> RepoResult<Chat> {
            sqlx::query_as::<_, Chat>(
                "SELECT id, chat_id, title, created_at FROM chats WHERE chat_id = $1",
            )
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }

        async fn chat_by_id(&self, id: Id) -> RepoResult<Chat> {
            sqlx::query_as::<_, Chat>(
                "SELECT id, chat_id, title, created_at FROM chats WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl KarmaRepo for PgRepo {
        async fn get_or_create_karma(&self, user_id: Id, chat_id: Id) -> RepoResult<UserKarma> {
            sqlx::query_as::<_, UserKarma>(
                "INSERT INTO user_karma (user_id, chat_id, karma) VALUES ($1, $2, 0)
                 ON CONFLICT (user_id, chat_id) DO UPDATE SET user_id = EXCLUDED.user_id
                 RETURNING id, user_id, chat_id, karma",
            )
            .bind(user_id)
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn apply_delta(&self, user_id: Id, chat_id: Id, delta: f64) -> RepoResult<f64> {
            // Row-level atomic upsert-increment; concurrent deltas serialize
            // on the row and both land.
            sqlx::query_scalar::<_, f64>(
                "INSERT INTO user_karma (user_id, chat_id, karma) VALUES ($1, $2, $3)
                 ON CONFLICT (user_id, chat_id)
                 DO UPDATE SET karma = user_karma.karma + EXCLUDED.karma
                 RETURNING karma",
            )
            .bind(user_id)
            .bind(chat_id)
            .bind(delta)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn bulk_set(&self, chat_id: Id, entries: &[(Id, f64)]) -> RepoResult<()> {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| RepoError::Transaction(e.to_string()))?;
            for (user_id, karma) in entries {
                sqlx::query(
                    "INSERT INTO user_karma (user_id, chat_id, karma) VALUES ($1, $2, $3)
                     ON CONFLICT (user_id, chat_id) DO UPDATE SET karma = EXCLUDED.karma",
                )
                .bind(user_id)
                .bind(chat_id)
                .bind(karma)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepoError::Transaction(e.to_string()))?;
            }
            tx.commit()
                .await
                .map_err(|e| RepoError::Transaction(e.to_string()))
        }

        async fn top_n(&self, chat_id: Id, limit: usize) -> RepoResult<Vec<KarmaEntry>> {
            let rows = sqlx::query_as::<_, RankedRow>(
                "SELECT u.id, u.tg_id, u.mention, u.created_at, uk.karma,
                        ROW_NUMBER() OVER (ORDER BY uk.karma DESC, u.id ASC) AS rank
                 FROM user_karma uk
                 JOIN users u ON u.id = uk.user_id
                 WHERE uk.chat_id = $1
                 ORDER BY uk.karma DESC, u.id ASC
                 LIMIT $2",
            )
            .bind(chat_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(rows.into_iter().map(|r| r.into_entry().0).collect())
        }

        async fn rank_of(&self, user_id: Id, chat_id: Id) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>(
                "SELECT rank FROM (
                     SELECT user_id,
                            ROW_NUMBER() OVER (ORDER BY karma DESC, user_id ASC) AS rank
                     FROM user_karma WHERE chat_id = $1
                 ) ranked WHERE user_id = $2",
            )
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }

        async fn neighbours(&self, user_id: Id, chat_id: Id) -> RepoResult<Neighbours> {
            let rank = match self.rank_of(user_id, chat_id).await {
                Ok(r) => r,
                Err(RepoError::NotFound) => return Err(RepoError::NoNeighbours),
                Err(e) => return Err(e),
            };
            let rows = sqlx::query_as::<_, RankedRow>(
                "SELECT u.id, u.tg_id, u.mention, u.created_at, t.karma, t.rank
                 FROM (
                     SELECT user_id, karma,
                            ROW_NUMBER() OVER (ORDER BY karma DESC, user_id ASC) AS rank
                     FROM user_karma WHERE chat_id = $1
                 ) t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.rank BETWEEN $2 - 1 AND $2 + 1
                 ORDER BY t.rank",
            )
            .bind(chat_id)
            .bind(rank)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            let mut prev = None;
            let mut me = None;
            let mut next = None;
            for row in rows {
                let (entry, r) = row.into_entry();
                if r < rank {
                    prev = Some(entry);
                } else if r == rank {
                    me = Some(entry);
                } else {
                    next = Some(entry);
                }
            }
            let me = me.ok_or(RepoError::NoNeighbours)?;
            if prev.is_none() && next.is_none() {
                return Err(RepoError::NoNeighbours);
            }
            Ok(Neighbours { prev, me, next })
        }

        async fn standings_for_user(&self, user_id: Id) -> RepoResult<Vec<ChatStanding>> {
            let rows = sqlx::query(
                "SELECT c.id, c.chat_id, c.title, c.created_at, t.karma, t.rank
                 FROM (
                     SELECT user_id, chat_id, karma,
                            ROW_NUMBER() OVER (
                                PARTITION BY chat_id ORDER BY karma DESC, user_id ASC
                            ) AS rank
                     FROM user_karma
                 ) t
                 JOIN chats c ON c.id = t.chat_id
                 WHERE t.user_id = $1
                 ORDER BY c.id",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

            rows.into_iter()
                .map(|row| {
                    Ok(ChatStanding {
                        chat: Chat {
                            id: row.try_get("id").map_err(db_err)?,
                            chat_id: row.try_get("chat_id").map_err(db_err)?,
                            title: row.try_get("title").map_err(db_err)?,
                            created_at: row.try_get("created_at").map_err(db_err)?,
                        },
                        karma: row.try_get("karma").map_err(db_err)?,
                        position: row.try_get("rank").map_err(db_err)?,
                    })
                })
                .collect()
        }
    }

    #[async_trait]
    impl ReportRepo for PgRepo {
        async fn create_report(&self, new: NewReport) -> RepoResult<Report> {
            sqlx::query_as::<_, Report>(
                "INSERT INTO reports
                     (reporter_id, reported_user_id, chat_id,
                      reported_message_id, command_message_id, status)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING *",
            )
            .bind(new.reporter_id)
            .bind(new.reported_user_id)
            .bind(new.chat_id)
            .bind(new.reported_message_id)
            .bind(new.command_message_id)
            .bind(ReportStatus::Pending)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn report_by_id(&self, id: Id) -> RepoResult<Report> {
            sqlx::query_as::<_, Report>("SELECT * FROM reports WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn linked_pending_reports(&self, id: Id) -> RepoResult<Vec<Report>> {
            let root = self.report_by_id(id).await?;
            if root.status != ReportStatus::Pending {
                return Err(RepoError::AlreadyResolved);
            }
            // Served by the (chat_id, reported_message_id, status) index.
            let linked = sqlx::query_as::<_, Report>(
                "SELECT * FROM reports
                 WHERE chat_id = $1 AND reported_message_id = $2
                   AND status = $3 AND id <> $4
                 ORDER BY id ASC",
            )
            .bind(root.chat_id)
            .bind(root.reported_message_id)
            .bind(ReportStatus::Pending)
            .bind(root.id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            let mut out = Vec::with_capacity(linked.len() + 1);
            out.push(root);
            out.extend(linked);
            Ok(out)
        }

        async fn save_report(&self, report: &Report) -> RepoResult<()> {
            let res = sqlx::query(
                "UPDATE reports
                 SET bot_reply_message_id = $2, status = $3,
                     resolved_by = $4, resolution_time = $5
                 WHERE id = $1",
            )
            .bind(report.id)
            .bind(report.bot_reply_message_id)
            .bind(report.status)
            .bind(report.resolved_by)
            .bind(report.resolution_time)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn save_reports(&self, reports: &[Report]) -> RepoResult<()> {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| RepoError::Transaction(e.to_string()))?;
            for report in reports {
                let res = sqlx::query(
                    "UPDATE reports
                     SET bot_reply_message_id = $2, status = $3,
                         resolved_by = $4, resolution_time = $5
                     WHERE id = $1",
                )
                .bind(report.id)
                .bind(report.bot_reply_message_id)
                .bind(report.status)
                .bind(report.resolved_by)
                .bind(report.resolution_time)
                .execute(&mut *tx)
                .await
                .map_err(|e| RepoError::Transaction(e.to_string()))?;
                if res.rows_affected() == 0 {
                    return Err(RepoError::Transaction(format!(
                        "unknown report {}",
                        report.id
                    )));
                }
            }
            tx.commit()
                .await
                .map_err(|e| RepoError::Transaction(e.to_string()))
        }
    }
}
