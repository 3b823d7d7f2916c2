#![cfg(feature = "inmem-store")]

use karmad::karma::get_top;
use karmad::models::{Chat, User};
use karmad::repo::inmem::InMemRepo;
use karmad::repo::{ChatRepo, KarmaRepo, UserRepo};

fn repo() -> InMemRepo {
    std::env::set_var("KARMAD_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

async fn chat(r: &InMemRepo) -> Chat {
    r.get_or_create_chat(-100_500, "testchat").await.unwrap()
}

async fn ranked_user(r: &InMemRepo, c: &Chat, tg_id: i64, mention: &str, karma: f64) -> User {
    let user = r.get_or_create_user(tg_id, mention).await.unwrap();
    r.apply_delta(user.id, c.id, karma).await.unwrap();
    user
}

#[tokio::test]
async fn empty_chat_renders_fixed_message() {
    let r = repo();
    let c = chat(&r).await;
    let lurker = r.get_or_create_user(1, "@lurker").await.unwrap();

    let text = get_top(&r, &c, &lurker, 15).await.unwrap();
    assert_eq!(text, "No one in this chat has karma yet");
}

#[tokio::test]
async fn caller_inside_top_gets_plain_top_text() {
    let r = repo();
    let c = chat(&r).await;
    let a = ranked_user(&r, &c, 1, "@a", 10.0).await;
    ranked_user(&r, &c, 2, "@b", 8.0).await;
    ranked_user(&r, &c, 3, "@c", 5.0).await;

    let text = get_top(&r, &c, &a, 15).await.unwrap();
    assert_eq!(
        text,
        "Most honored members of this chat:\n\
         1 @a <b>10.00</b>\n\
         2 @b <b>8.00</b>\n\
         3 @c <b>5.00</b>"
    );
    assert!(!text.contains("..."));
}

#[tokio::test]
async fn caller_far_below_top_gets_one_gap_marker_and_three_rows() {
    let r = repo();
    let c = chat(&r).await;
    // nine ranked users, 90 down to 10
    let mut ninth = None;
    for i in 1..=9 {
        let u = ranked_user(&r, &c, i, &format!("@u{i}"), (10 - i) as f64 * 10.0).await;
        if i == 9 {
            ninth = Some(u);
        }
    }
    let caller = ninth.unwrap();

    let text = get_top(&r, &c, &caller, 5).await.unwrap();
    // exactly one ellipsis line between the top block and the neighbour block
    assert_eq!(text.matches("\n...\n").count(), 1);
    let (top_block, tail) = text.split_once("\n...\n").unwrap();
    assert!(top_block.ends_with("5 @u5 <b>50.00</b>"));
    assert_eq!(tail, "8 @u8 <b>20.00</b>\n9 @u9 <b>10.00</b>");
}

#[tokio::test]
async fn caller_just_below_a_short_top_gets_own_row_after_marker() {
    let r = repo();
    let c = chat(&r).await;
    ranked_user(&r, &c, 1, "@a", 10.0).await;
    ranked_user(&r, &c, 2, "@b", 8.0).await;
    let caller = ranked_user(&r, &c, 3, "@c", 5.0).await;

    // B is already visible, so only the caller's own row is appended after
    // the gap marker; there is no row below rank 3.
    let text = get_top(&r, &c, &caller, 2).await.unwrap();
    assert_eq!(
        text,
        "Most honored members of this chat:\n\
         1 @a <b>10.00</b>\n\
         2 @b <b>8.00</b>\n\
         ...\n\
         3 @c <b>5.00</b>"
    );
}

#[tokio::test]
async fn sole_ranked_caller_gets_top_unchanged() {
    let r = repo();
    let c = chat(&r).await;
    let only = ranked_user(&r, &c, 1, "@only", 2.0).await;

    // NoNeighbours silently short-circuits to the plain top view
    let text = get_top(&r, &c, &only, 15).await.unwrap();
    assert_eq!(text, "Most honored members of this chat:\n1 @only <b>2.00</b>");
}
