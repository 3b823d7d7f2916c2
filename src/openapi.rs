use crate::models::{
    Chat, ChatStanding, ImportEntry, KarmaEntry, Report, ReportStatus, Resolution,
    ResultChangeKarma, User, UserRef,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::get_top,
        crate::routes::get_me,
        crate::routes::get_standings,
        crate::routes::import_karma,
        crate::routes::register_report,
        crate::routes::resolve_report,
        crate::routes::cancel_report,
        crate::routes::set_bot_reply,
    ),
    components(schemas(
        User, Chat, Report, ReportStatus, Resolution, ResultChangeKarma,
        ChatStanding, ImportEntry, UserRef, KarmaEntry,
        crate::routes::MeResponse, crate::routes::RegisterReportRequest,
        crate::routes::ResolveRequest, crate::routes::ResolveResponse,
        crate::routes::CancelRequest, crate::routes::BotReplyRequest
    )),
    tags(
        (name = "karma", description = "Leaderboard and karma queries"),
        (name = "reports", description = "Report moderation workflow"),
    )
)]
pub struct ApiDoc;
