//! Report workflow: registration, atomic group resolution, single-report
//! cancellation, reporter rewards, and dialog-cleanup bookkeeping.

use chrono::Utc;

use crate::karma::change_karma;
use crate::models::*;
use crate::rate_limit::ThrottleFacade;
use crate::repo::{Repo, RepoResult};
use crate::transport::MessageSink;

/// Files a new PENDING report. No side effects beyond persistence.
pub async fn register_report(
    repo: &dyn Repo,
    reporter: &User,
    reported_user: &User,
    chat: &Chat,
    reported_message_id: i64,
    command_message_id: i64,
) -> RepoResult<Report> {
    let report = repo
        .create_report(NewReport {
            reporter_id: reporter.id,
            reported_user_id: reported_user.id,
            chat_id: chat.id,
            reported_message_id,
            command_message_id,
        })
        .await?;
    tracing::info!(
        report = report.id,
        reporter = reporter.tg_id,
        reported = reported_user.tg_id,
        chat = chat.chat_id,
        "report registered"
    );
    metrics::increment_counter!("reports_registered_total");
    Ok(report)
}

/// Resolves every pending report linked to the same flagged message as one
/// atomic unit. The identified report takes the moderator's verdict; each
/// duplicate is auto-dismissed as CANCELLED. All reports in the group share
/// one resolution time. Returns the group, identified report first.
pub async fn resolve_report(
    repo: &dyn Repo,
    report_id: Id,
    resolved_by: &User,
    resolution: Resolution,
) -> RepoResult<Vec<Report>> {
    let resolution_time = Utc::now();
    let mut group = repo.linked_pending_reports(report_id).await?;

    for (i, report) in group.iter_mut().enumerate() {
        report.resolved_by = Some(resolved_by.id);
        report.resolution_time = Some(resolution_time);
        report.status = if i == 0 {
            resolution.into()
        } else {
            ReportStatus::Cancelled
        };
    }
    repo.save_reports(&group).await?;

    tracing::info!(
        report = report_id,
        moderator = resolved_by.tg_id,
        ?resolution,
        linked = group.len() - 1,
        "report group resolved"
    );
    metrics::increment_counter!("reports_resolved_total");
    Ok(group)
}

/// Withdraws a single report. Linked reports are untouched; cancellation is
/// deliberately asymmetric with resolution.
pub async fn cancel_report(
    repo: &dyn Repo,
    report_id: Id,
    resolved_by: &User,
) -> RepoResult<Report> {
    let mut report = repo.report_by_id(report_id).await?;
    if report.status != ReportStatus::Pending {
        return Err(crate::repo::RepoError::AlreadyResolved);
    }
    report.resolved_by = Some(resolved_by.id);
    report.resolution_time = Some(Utc::now());
    report.status = ReportStatus::Cancelled;
    repo.save_report(&report).await?;
    tracing::info!(
        report = report.id,
        moderator = resolved_by.tg_id,
        "report cancelled"
    );
    metrics::increment_counter!("reports_cancelled_total");
    Ok(report)
}

/// Records the transport id of the bot's reply to this report, for later
/// dialog cleanup. Independent of status.
pub async fn set_bot_reply(repo: &dyn Repo, report: &mut Report, message_id: i64) -> RepoResult<()> {
    report.bot_reply_message_id = Some(message_id);
    repo.save_report(report).await
}

/// Grants the reporter their reward through the system acting user, with the
/// abuse restriction bypassed.
pub async fn reward_reporter(
    repo: &dyn Repo,
    throttle: &ThrottleFacade,
    self_tg_id: i64,
    reporter_id: Id,
    amount: f64,
    chat: &Chat,
) -> RepoResult<ResultChangeKarma> {
    let from_user = repo.get_or_create_user(self_tg_id, "@karmad").await?;
    let target_user = repo.user_by_id(reporter_id).await?;
    let result = change_karma(
        repo,
        throttle,
        &from_user,
        &target_user,
        chat,
        amount,
        false,
        "report reward",
    )
    .await?;
    metrics::increment_counter!("report_rewards_total");
    Ok(result)
}

/// Computes the transport message ids to retract for a resolved dialog:
/// every command message, the first report's bot reply only when requested,
/// every duplicate's bot reply unconditionally. Pure aggregation; the sink
/// owns actual deletion.
pub fn cleanup_message_ids(
    first_report: &Report,
    linked_reports: &[Report],
    delete_first_reply: bool,
) -> Vec<i64> {
    let mut to_delete = vec![first_report.command_message_id];
    if delete_first_reply {
        to_delete.extend(first_report.bot_reply_message_id);
    }
    for report in linked_reports {
        to_delete.push(report.command_message_id);
        to_delete.extend(report.bot_reply_message_id);
    }
    to_delete
}

/// Hands the dialog's message ids to the transport collaborator for
/// best-effort bulk deletion.
pub async fn cleanup_dialog(
    sink: &dyn MessageSink,
    chat: &Chat,
    first_report: &Report,
    linked_reports: &[Report],
    delete_first_reply: bool,
) {
    let ids = cleanup_message_ids(first_report, linked_reports, delete_first_reply);
    sink.delete_messages(chat.chat_id, ids).await;
}
