#![cfg(feature = "inmem-store")]

use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, App};
use karmad::models::{Report, ReportStatus};
use karmad::rate_limit::{KarmaThrottle, ThrottleConfig, ThrottleFacade};
use karmad::repo::inmem::InMemRepo;
use karmad::repo::{ChatRepo, KarmaRepo, ReportRepo, UserRepo};
use karmad::transport::LogSink;
use karmad::{config, AppConfig, AppState};
use serde_json::{json, Value};

fn fresh_repo() -> InMemRepo {
    std::env::set_var("KARMAD_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn app_state(repo: &InMemRepo) -> AppState {
    AppState {
        repo: Arc::new(repo.clone()),
        sink: Arc::new(LogSink),
        throttle: ThrottleFacade::new(
            KarmaThrottle::new(true),
            ThrottleConfig {
                karma_limit: 100,
                karma_window: Duration::from_secs(60),
            },
        ),
        cfg: AppConfig {
            self_tg_id: 999,
            report_reward: 5.0,
            cleanup_delay: Duration::from_secs(0),
        },
    }
}

fn report_body(reporter_tg: i64, mention: &str, command_message_id: i64) -> Value {
    json!({
        "chat_id": -100500,
        "chat_title": "testchat",
        "reporter": {"tg_id": reporter_tg, "mention": mention},
        "reported_user": {"tg_id": 50, "mention": "@spammer"},
        "reported_message_id": 900,
        "command_message_id": command_message_id
    })
}

#[actix_web::test]
async fn report_lifecycle_over_http() {
    let repo = fresh_repo();
    let state = app_state(&repo);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    // two reports against the same flagged message
    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .set_json(report_body(11, "@first", 901))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let first: Report = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(first.status, ReportStatus::Pending);

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .set_json(report_body(12, "@second", 902))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // record the bot's reply to the first report
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{}/bot-reply", first.id))
        .set_json(json!({"message_id": 555}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);

    // approving the first report settles both and rewards the reporter
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{}/resolve", first.id))
        .set_json(json!({
            "resolution": "approved",
            "moderator": {"tg_id": 33, "mention": "@mod"}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["reports"][0]["status"], "approved");
    assert_eq!(body["reports"][1]["status"], "cancelled");
    assert_eq!(body["reward"]["karma"], 5.0);
    assert_eq!(body["reward"]["throttled"], false);

    // resolving again is a conflict
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{}/resolve", first.id))
        .set_json(json!({
            "resolution": "declined",
            "moderator": {"tg_id": 33, "mention": "@mod"}
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);

    // the reward is visible through the "me" endpoint
    let req = test::TestRequest::get()
        .uri("/api/v1/chats/-100500/me/11")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let me: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(me["karma"], 5.0);
    assert_eq!(me["position"], 1);
}

#[actix_web::test]
async fn cancel_touches_only_the_identified_report() {
    let repo = fresh_repo();
    let state = app_state(&repo);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .set_json(report_body(11, "@first", 901))
        .to_request();
    let first: Report =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
            .unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .set_json(report_body(12, "@second", 902))
        .to_request();
    let second: Report =
        serde_json::from_slice(&test::read_body(test::call_service(&app, req).await).await)
            .unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{}/cancel", first.id))
        .set_json(json!({"moderator": {"tg_id": 33, "mention": "@mod"}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let cancelled: Report = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(cancelled.status, ReportStatus::Cancelled);

    // the linked report is still pending
    assert_eq!(
        repo.report_by_id(second.id).await.unwrap().status,
        ReportStatus::Pending
    );

    // cancelling a settled report is a conflict
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/reports/{}/cancel", first.id))
        .set_json(json!({"moderator": {"tg_id": 33, "mention": "@mod"}}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}

#[actix_web::test]
async fn top_endpoint_maps_argument_errors() {
    let repo = fresh_repo();
    let state = app_state(&repo);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    // missing chat argument
    let req = test::TestRequest::get()
        .uri("/api/v1/top?user=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // malformed chat id
    let req = test::TestRequest::get()
        .uri("/api/v1/top?chat=abc&user=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // unknown chat
    let req = test::TestRequest::get()
        .uri("/api/v1/top?chat=-1&user=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn top_endpoint_renders_leaderboard_text() {
    let repo = fresh_repo();
    let chat = repo.get_or_create_chat(-100500, "testchat").await.unwrap();
    let a = repo.get_or_create_user(1, "@a").await.unwrap();
    let b = repo.get_or_create_user(2, "@b").await.unwrap();
    repo.apply_delta(a.id, chat.id, 10.0).await.unwrap();
    repo.apply_delta(b.id, chat.id, 8.0).await.unwrap();

    let state = app_state(&repo);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/top?chat=-100500&user=1")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let text = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert_eq!(
        text,
        "Most honored members of this chat:\n1 @a <b>10.00</b>\n2 @b <b>8.00</b>"
    );
}

#[actix_web::test]
async fn karma_import_is_atomic_over_http() {
    let repo = fresh_repo();
    let chat = repo.get_or_create_chat(-100500, "testchat").await.unwrap();
    let a = repo.get_or_create_user(1, "@a").await.unwrap();
    repo.apply_delta(a.id, chat.id, 1.0).await.unwrap();

    let state = app_state(&repo);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    // unknown user in the batch: nothing is applied
    let req = test::TestRequest::put()
        .uri("/api/v1/chats/-100500/karma")
        .set_json(json!([
            {"user": 1, "karma": 9.0},
            {"user": 777, "karma": 2.0}
        ]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(
        repo.get_or_create_karma(a.id, chat.id).await.unwrap().karma,
        1.0
    );

    // a valid batch lands in full
    let req = test::TestRequest::put()
        .uri("/api/v1/chats/-100500/karma")
        .set_json(json!([{"user": 1, "karma": 9.0}]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 204);
    assert_eq!(
        repo.get_or_create_karma(a.id, chat.id).await.unwrap().karma,
        9.0
    );
}

#[actix_web::test]
async fn standings_cover_every_chat() {
    let repo = fresh_repo();
    let chat_a = repo.get_or_create_chat(-1, "a").await.unwrap();
    let chat_b = repo.get_or_create_chat(-2, "b").await.unwrap();
    let me = repo.get_or_create_user(7, "@me").await.unwrap();
    repo.apply_delta(me.id, chat_a.id, 3.0).await.unwrap();
    repo.apply_delta(me.id, chat_b.id, 1.0).await.unwrap();

    let state = app_state(&repo);
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(state))
            .configure(config),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/users/7/karma")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let standings: Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(standings.as_array().unwrap().len(), 2);
    assert_eq!(standings[0]["karma"], 3.0);
    assert_eq!(standings[0]["position"], 1);
}
