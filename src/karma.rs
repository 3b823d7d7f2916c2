//! Karma service: the mutation primitive with its restriction toggle, the
//! leaderboard assembly, and the "me" queries.

use std::collections::HashSet;

use crate::models::*;
use crate::rate_limit::ThrottleFacade;
use crate::repo::{Repo, RepoError, RepoResult};

pub const DEFAULT_TOP_LIMIT: usize = 15;

const CAPTION: &str = "Most honored members of this chat:";
const NO_KARMA: &str = "No one in this chat has karma yet";

/// Atomically adds `delta` to the target's karma in `chat`. When
/// `restriction_enabled` is set the acting user is checked against the abuse
/// throttle first; a suppressed change reports the untouched score. Reward
/// issuance calls this with the restriction disabled.
pub async fn change_karma(
    repo: &dyn Repo,
    throttle: &ThrottleFacade,
    actor: &User,
    target: &User,
    chat: &Chat,
    delta: f64,
    restriction_enabled: bool,
    comment: &str,
) -> RepoResult<ResultChangeKarma> {
    if restriction_enabled && !throttle.allow_change(actor.tg_id) {
        let current = repo.get_or_create_karma(target.id, chat.id).await?;
        tracing::warn!(
            actor = actor.tg_id,
            target_user = target.tg_id,
            chat = chat.chat_id,
            comment,
            "karma change throttled"
        );
        metrics::increment_counter!("karma_changes_throttled_total");
        return Ok(ResultChangeKarma {
            karma: current.karma,
            delta: 0.0,
            throttled: true,
        });
    }
    let karma = repo.apply_delta(target.id, chat.id, delta).await?;
    tracing::info!(
        actor = actor.tg_id,
        target_user = target.tg_id,
        chat = chat.chat_id,
        delta,
        karma,
        comment,
        "karma changed"
    );
    metrics::increment_counter!("karma_changes_total");
    Ok(ResultChangeKarma {
        karma,
        delta,
        throttled: false,
    })
}

/// Administrative import: resolves every tg_id up front, then applies the
/// absolute scores through one atomic `bulk_set`. An unknown user fails the
/// whole batch before anything is written.
pub async fn import_karma(repo: &dyn Repo, chat: &Chat, entries: &[ImportEntry]) -> RepoResult<()> {
    let mut resolved = Vec::with_capacity(entries.len());
    for entry in entries {
        let user = repo.user_by_tg_id(entry.user).await?;
        resolved.push((user.id, entry.karma));
    }
    repo.bulk_set(chat.id, &resolved).await?;
    tracing::info!(chat = chat.chat_id, rows = resolved.len(), "karma imported");
    Ok(())
}

/// The caller's karma row (created lazily at zero) and 1-based rank in one
/// chat.
pub async fn me_in_chat(repo: &dyn Repo, user: &User, chat: &Chat) -> RepoResult<(UserKarma, i64)> {
    let uk = repo.get_or_create_karma(user.id, chat.id).await?;
    let position = repo.rank_of(user.id, chat.id).await?;
    Ok((uk, position))
}

/// The caller's standing in every chat where they hold karma.
pub async fn me_everywhere(repo: &dyn Repo, user: &User) -> RepoResult<Vec<ChatStanding>> {
    repo.standings_for_user(user.id).await
}

/// Leaderboard assembly: the top-N block, then the caller's neighbourhood
/// when it is not already visible, separated by a single "..." line.
pub async fn get_top(
    repo: &dyn Repo,
    chat: &Chat,
    user: &User,
    limit: usize,
) -> RepoResult<String> {
    let top = repo.top_n(chat.id, limit).await?;
    let rows: Vec<(i64, &User, f64)> = top
        .iter()
        .enumerate()
        .map(|(i, e)| (i as i64 + 1, &e.user, e.karma))
        .collect();
    let text = add_caption(&format_rows(&rows));

    let nb = match repo.neighbours(user.id, chat.id).await {
        Ok(nb) => nb,
        Err(RepoError::NoNeighbours) => return Ok(text),
        Err(e) => return Err(e),
    };

    let top_ids: HashSet<Id> = top.iter().map(|e| e.user.id).collect();
    let rank = repo.rank_of(user.id, chat.id).await?;

    let mut extra: Vec<(i64, &User, f64)> = Vec::new();
    if let Some(prev) = &nb.prev {
        if !top_ids.contains(&prev.user.id) {
            extra.push((rank - 1, &prev.user, prev.karma));
        }
    }
    if !top_ids.contains(&nb.me.user.id) {
        extra.push((rank, &nb.me.user, nb.me.karma));
    }
    if let Some(next) = &nb.next {
        if !top_ids.contains(&next.user.id) {
            extra.push((rank + 1, &next.user, next.karma));
        }
    }
    if extra.is_empty() {
        return Ok(text);
    }
    Ok(format!("{}\n{}", add_separator(text), format_rows(&extra)))
}

/// `"<position> <mention> <b>karma</b>"`, one row per line.
pub fn format_rows(rows: &[(i64, &User, f64)]) -> String {
    rows.iter()
        .map(|(i, user, karma)| format!("{i} {} <b>{karma:.2}</b>", user.mention))
        .collect::<Vec<_>>()
        .join("\n")
}

fn add_caption(text_list: &str) -> String {
    if text_list.is_empty() {
        NO_KARMA.to_string()
    } else {
        format!("{CAPTION}\n{text_list}")
    }
}

fn add_separator(text: String) -> String {
    format!("{text}\n...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: Id, mention: &str) -> User {
        User {
            id,
            tg_id: id * 100,
            mention: mention.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rows_are_rendered_with_bold_two_decimal_karma() {
        let a = user(1, "@alice");
        let b = user(2, "@bob");
        let text = format_rows(&[(1, &a, 10.0), (2, &b, 7.5)]);
        assert_eq!(text, "1 @alice <b>10.00</b>\n2 @bob <b>7.50</b>");
    }

    #[test]
    fn empty_top_renders_fixed_message() {
        assert_eq!(add_caption(""), NO_KARMA);
    }

    #[test]
    fn caption_prefixes_non_empty_top() {
        let text = add_caption("1 @alice <b>10.00</b>");
        assert!(text.starts_with(CAPTION));
        assert!(text.ends_with("1 @alice <b>10.00</b>"));
    }

    #[test]
    fn separator_is_a_single_ellipsis_line() {
        assert_eq!(add_separator("top".into()), "top\n...");
    }

    #[test]
    fn negative_karma_keeps_sign() {
        let a = user(1, "@alice");
        assert_eq!(format_rows(&[(4, &a, -2.5)]), "4 @alice <b>-2.50</b>");
    }
}
