use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::karma;
use crate::models::*;
use crate::rate_limit::ThrottleFacade;
use crate::repo::Repo;
use crate::report;
use crate::transport::{schedule_cleanup, MessageSink};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/top").route(web::get().to(get_top)))
            .service(web::resource("/chats/{chat_id}/me/{tg_id}").route(web::get().to(get_me)))
            .service(web::resource("/users/{tg_id}/karma").route(web::get().to(get_standings)))
            .service(web::resource("/chats/{chat_id}/karma").route(web::put().to(import_karma)))
            .service(web::resource("/reports").route(web::post().to(register_report)))
            .service(web::resource("/reports/{id}/resolve").route(web::post().to(resolve_report)))
            .service(web::resource("/reports/{id}/cancel").route(web::post().to(cancel_report)))
            .service(web::resource("/reports/{id}/bot-reply").route(web::post().to(set_bot_reply))),
    );
}

/// Runtime knobs read from env once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// tg_id of the system acting user issuing rewards.
    pub self_tg_id: i64,
    /// Karma granted to the reporter of an approved report.
    pub report_reward: f64,
    /// Delay before a resolved dialog's messages are retracted.
    pub cleanup_delay: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        fn i64_env(name: &str, default: i64) -> i64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn f64_env(name: &str, default: f64) -> f64 {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        Self {
            self_tg_id: i64_env("KARMAD_SELF_TG_ID", 0),
            report_reward: f64_env("KARMAD_REPORT_REWARD", 5.0),
            cleanup_delay: Duration::from_secs(i64_env("KARMAD_CLEANUP_DELAY_SECS", 600) as u64),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub sink: Arc<dyn MessageSink>,
    pub throttle: ThrottleFacade,
    pub cfg: AppConfig,
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse().map_err(|_| ApiError::MalformedIdentifier)
}

#[derive(Deserialize)]
pub struct TopQuery {
    chat: Option<String>,
    user: Option<String>,
    limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/api/v1/top",
    params(
        ("chat" = String, Query, description = "Chat id"),
        ("user" = String, Query, description = "Requesting user's tg id"),
        ("limit" = Option<usize>, Query, description = "Top size, default 15")
    ),
    responses(
        (status = 200, description = "Rendered leaderboard text"),
        (status = 400, description = "Missing or malformed identifiers"),
        (status = 404, description = "Chat or user not found")
    )
)]
pub async fn get_top(
    data: web::Data<AppState>,
    query: web::Query<TopQuery>,
) -> Result<HttpResponse, ApiError> {
    let chat_id = parse_id(query.chat.as_deref().ok_or(ApiError::NotEnoughArguments)?)?;
    let user_tg = parse_id(query.user.as_deref().ok_or(ApiError::NotEnoughArguments)?)?;
    let chat = data.repo.chat_by_chat_id(chat_id).await?;
    let user = data.repo.user_by_tg_id(user_tg).await?;
    tracing::info!(user = user.tg_id, chat = chat.chat_id, "leaderboard requested");
    let limit = query.limit.unwrap_or(karma::DEFAULT_TOP_LIMIT);
    let text = karma::get_top(data.repo.as_ref(), &chat, &user, limit).await?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body(text))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub mention: String,
    pub karma: f64,
    /// 1-based position in the chat's ranking.
    pub position: i64,
}

#[utoipa::path(
    get,
    path = "/api/v1/chats/{chat_id}/me/{tg_id}",
    params(
        ("chat_id" = i64, Path, description = "Chat id"),
        ("tg_id" = i64, Path, description = "User's tg id")
    ),
    responses(
        (status = 200, description = "Karma and rank in one chat", body = MeResponse),
        (status = 404, description = "Chat or user not found")
    )
)]
pub async fn get_me(
    data: web::Data<AppState>,
    path: web::Path<(i64, i64)>,
) -> Result<HttpResponse, ApiError> {
    let (chat_id, tg_id) = path.into_inner();
    let chat = data.repo.chat_by_chat_id(chat_id).await?;
    let user = data.repo.user_by_tg_id(tg_id).await?;
    let (uk, position) = karma::me_in_chat(data.repo.as_ref(), &user, &chat).await?;
    Ok(HttpResponse::Ok().json(MeResponse {
        mention: user.mention,
        karma: uk.karma,
        position,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{tg_id}/karma",
    params(("tg_id" = i64, Path, description = "User's tg id")),
    responses(
        (status = 200, description = "Karma and rank in every chat", body = [ChatStanding]),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_standings(
    data: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.user_by_tg_id(path.into_inner()).await?;
    let standings = karma::me_everywhere(data.repo.as_ref(), &user).await?;
    Ok(HttpResponse::Ok().json(standings))
}

#[utoipa::path(
    put,
    path = "/api/v1/chats/{chat_id}/karma",
    request_body = [ImportEntry],
    params(("chat_id" = i64, Path, description = "Chat id")),
    responses(
        (status = 204, description = "All scores applied"),
        (status = 404, description = "Chat or listed user not found; nothing applied"),
        (status = 500, description = "Batch write failed; nothing applied")
    )
)]
pub async fn import_karma(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<Vec<ImportEntry>>,
) -> Result<HttpResponse, ApiError> {
    let chat = data.repo.chat_by_chat_id(path.into_inner()).await?;
    karma::import_karma(data.repo.as_ref(), &chat, &payload).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterReportRequest {
    pub chat_id: i64,
    pub chat_title: Option<String>,
    pub reporter: UserRef,
    pub reported_user: UserRef,
    pub reported_message_id: i64,
    pub command_message_id: i64,
}

#[utoipa::path(
    post,
    path = "/api/v1/reports",
    request_body = RegisterReportRequest,
    responses((status = 201, description = "Report registered", body = Report))
)]
pub async fn register_report(
    data: web::Data<AppState>,
    payload: web::Json<RegisterReportRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    // First observed interaction creates chat and users alike.
    let title = req
        .chat_title
        .unwrap_or_else(|| format!("chat {}", req.chat_id));
    let chat = data.repo.get_or_create_chat(req.chat_id, &title).await?;
    let reporter = data
        .repo
        .get_or_create_user(req.reporter.tg_id, &req.reporter.mention)
        .await?;
    let reported = data
        .repo
        .get_or_create_user(req.reported_user.tg_id, &req.reported_user.mention)
        .await?;
    let report = report::register_report(
        data.repo.as_ref(),
        &reporter,
        &reported,
        &chat,
        req.reported_message_id,
        req.command_message_id,
    )
    .await?;
    Ok(HttpResponse::Created().json(report))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveRequest {
    pub resolution: Resolution,
    pub moderator: UserRef,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveResponse {
    /// The resolved group, identified report first.
    pub reports: Vec<Report>,
    /// Reward outcome when the verdict was `approved`.
    pub reward: Option<ResultChangeKarma>,
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/resolve",
    request_body = ResolveRequest,
    params(("id" = i64, Path, description = "Report id")),
    responses(
        (status = 200, description = "Linked group resolved", body = ResolveResponse),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report already resolved")
    )
)]
pub async fn resolve_report(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ResolveRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let moderator = data
        .repo
        .get_or_create_user(req.moderator.tg_id, &req.moderator.mention)
        .await?;
    let group = report::resolve_report(
        data.repo.as_ref(),
        path.into_inner(),
        &moderator,
        req.resolution,
    )
    .await?;

    let first = &group[0];
    let chat = data.repo.chat_by_id(first.chat_id).await?;
    let reward = match req.resolution {
        Resolution::Approved => Some(
            report::reward_reporter(
                data.repo.as_ref(),
                &data.throttle,
                data.cfg.self_tg_id,
                first.reporter_id,
                data.cfg.report_reward,
                &chat,
            )
            .await?,
        ),
        Resolution::Declined => None,
    };

    // The first report's reply stays visible as the verdict notice.
    schedule_cleanup(
        data.sink.clone(),
        chat.chat_id,
        report::cleanup_message_ids(first, &group[1..], false),
        data.cfg.cleanup_delay,
    );

    Ok(HttpResponse::Ok().json(ResolveResponse {
        reports: group,
        reward,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub moderator: UserRef,
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/cancel",
    request_body = CancelRequest,
    params(("id" = i64, Path, description = "Report id")),
    responses(
        (status = 200, description = "Report cancelled", body = Report),
        (status = 404, description = "Report not found"),
        (status = 409, description = "Report already resolved")
    )
)]
pub async fn cancel_report(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CancelRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let moderator = data
        .repo
        .get_or_create_user(req.moderator.tg_id, &req.moderator.mention)
        .await?;
    let report = report::cancel_report(data.repo.as_ref(), path.into_inner(), &moderator).await?;

    let chat = data.repo.chat_by_id(report.chat_id).await?;
    schedule_cleanup(
        data.sink.clone(),
        chat.chat_id,
        report::cleanup_message_ids(&report, &[], true),
        data.cfg.cleanup_delay,
    );

    Ok(HttpResponse::Ok().json(report))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BotReplyRequest {
    pub message_id: i64,
}

#[utoipa::path(
    post,
    path = "/api/v1/reports/{id}/bot-reply",
    request_body = BotReplyRequest,
    params(("id" = i64, Path, description = "Report id")),
    responses(
        (status = 204, description = "Bot reply recorded"),
        (status = 404, description = "Report not found")
    )
)]
pub async fn set_bot_reply(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<BotReplyRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut report = data.repo.report_by_id(path.into_inner()).await?;
    report::set_bot_reply(data.repo.as_ref(), &mut report, payload.message_id).await?;
    Ok(HttpResponse::NoContent().finish())
}
