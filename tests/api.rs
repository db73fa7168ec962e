use std::{path::PathBuf, sync::Arc, time::Duration};

use reqwest::{header, multipart, StatusCode};
use rockfeed::{
    comment_tree::MAX_DEPTH, config::Config, get_random_free_port, make_router, run_app, AppState,
};
use serde_json::{json, Value};

struct TestApp {
    base: String,
    client: reqwest::Client,
    state: Arc<AppState>,
    dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

async fn spawn_app() -> TestApp {
    let dir = std::env::temp_dir().join(format!("rockfeed-api-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let (port, address) = get_random_free_port().unwrap();
    let config = Config {
        database_url: format!("sqlite://{}", dir.join("test.db").display()),
        jwt_secret: "integration-secret".to_string(),
        address,
        frontend_url: "http://localhost:5173".to_string(),
        upload_dir: dir.join("uploads"),
        cookie_secure: false,
        google: None,
        github: None,
    };
    let state = AppState::new(config).await.unwrap();
    let router = make_router(state.clone()).unwrap();
    tokio::spawn(run_app(router, address));

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();
    let base = format!("http://127.0.0.1:{port}");
    for _ in 0..100 {
        if client.get(format!("{base}/api/status")).send().await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    TestApp {
        base,
        client,
        state,
        dir,
    }
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Registers and logs in, returning the user id and the cookie header.
    async fn sign_up(&self, email: &str, name: &str) -> (i64, String) {
        let response = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({ "email": email, "password": "master-of-puppets", "name": name }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "email": email, "password": "master-of-puppets" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);
        let body: Value = response.json().await.unwrap();
        (body["user"]["id"].as_i64().unwrap(), cookie)
    }

    async fn create_article(&self, cookie: &str, slug: &str, category: &str) -> reqwest::Response {
        let form = multipart::Form::new()
            .text("title", format!("Article {slug}"))
            .text("content", "Riffs and more riffs")
            .text("slug", slug.to_string())
            .text("categoryName", category.to_string());
        self.client
            .post(self.url("/api/articles"))
            .header(header::COOKIE, cookie)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    async fn post_comment(&self, cookie: &str, slug: &str, content: &str, parent: Option<i64>) -> Value {
        let response = self
            .client
            .post(self.url("/api/comments"))
            .header(header::COOKIE, cookie)
            .json(&json!({ "articleSlug": slug, "content": content, "parentId": parent }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        response.json().await.unwrap()
    }

    async fn vote(&self, cookie: &str, comment_id: i64, vote_type: &str) -> Value {
        let response = self
            .client
            .post(self.url("/api/comments/vote"))
            .header(header::COOKIE, cookie)
            .json(&json!({ "commentId": comment_id, "voteType": vote_type }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }

    async fn notifications(&self, cookie: &str) -> Vec<Value> {
        self.state.notifier.flush().await;
        let response = self
            .client
            .get(self.url("/api/notifications"))
            .header(header::COOKIE, cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }

    async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.state.pool)
            .await
            .unwrap()
    }
}

fn session_cookie(response: &reqwest::Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("authToken="))
        .and_then(|value| value.split(';').next())
        .unwrap()
        .to_string()
}

fn ids(values: &[Value]) -> Vec<i64> {
    values.iter().map(|v| v["id"].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn status_reports_the_database() {
    let app = spawn_app().await;
    let body: Value = app
        .client
        .get(app.url("/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "OK", "db": "Connected" }));

    let response = app.client.get(app.url("/api/nowhere")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn comments_list_oldest_first_and_thread_newest_first() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (_, fan) = app.sign_up("fan@rock.test", "Fan").await;
    assert_eq!(app.create_article(&admin, "test-post", "News").await.status(), StatusCode::CREATED);

    let c1 = app.post_comment(&fan, "test-post", "first", None).await["id"].as_i64().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let c2 = app.post_comment(&fan, "test-post", "second", None).await["id"].as_i64().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let c3 = app.post_comment(&admin, "test-post", "reply", Some(c1)).await["id"].as_i64().unwrap();

    let flat: Vec<Value> = app
        .client
        .get(app.url("/api/comments/test-post"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&flat), vec![c1, c2, c3]);
    assert_eq!(flat[2]["parentId"], json!(c1));
    assert_eq!(flat[0]["author"]["name"], json!("Fan"));

    let tree: Vec<Value> = app
        .client
        .get(app.url("/api/comments/test-post/tree"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&tree), vec![c2, c1]);
    assert_eq!(ids(tree[1]["replies"].as_array().unwrap()), vec![c3]);
    assert!(tree[0]["replies"].as_array().unwrap().is_empty());

    // An unknown article simply has no comments.
    for path in ["/api/comments/missing", "/api/comments/missing/tree"] {
        let response = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.json::<Value>().await.unwrap(), json!([]));
    }
}

#[tokio::test]
async fn deep_reply_chains_are_capped_in_the_tree() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    app.create_article(&admin, "test-post", "News").await;

    let chain_len = MAX_DEPTH + 3;
    let mut parent = None;
    let mut chain = Vec::new();
    for n in 0..chain_len {
        let id = app.post_comment(&admin, "test-post", &format!("level {n}"), parent).await["id"]
            .as_i64()
            .unwrap();
        chain.push(id);
        parent = Some(id);
    }

    let tree: Vec<Value> = app
        .client
        .get(app.url("/api/comments/test-post/tree"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&tree), vec![chain[0]]);
    let mut node = &tree[0];
    for level in 1..MAX_DEPTH {
        node = &node["replies"][0];
        assert_eq!(node["id"], json!(chain[level]));
    }
    // Everything past the last level hangs off the comment above it.
    let tail = node["replies"].as_array().unwrap();
    assert_eq!(ids(tail), chain[MAX_DEPTH..].to_vec());
    assert!(tail.iter().all(|reply| reply["replies"].as_array().unwrap().is_empty()));
}

#[tokio::test]
async fn anonymous_comment_is_rejected_without_side_effects() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    app.create_article(&admin, "test-post", "News").await;

    let response = app
        .client
        .post(app.url("/api/comments"))
        .json(&json!({ "articleSlug": "test-post", "content": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    app.state.notifier.flush().await;
    assert_eq!(app.count("comments").await, 0);
    assert_eq!(app.count("notifications").await, 0);
}

#[tokio::test]
async fn comment_validation() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    app.create_article(&admin, "first-post", "News").await;
    app.create_article(&admin, "second-post", "News").await;
    let root = app.post_comment(&admin, "first-post", "root", None).await["id"].as_i64().unwrap();

    let post = |body: Value| {
        app.client
            .post(app.url("/api/comments"))
            .header(header::COOKIE, &admin)
            .json(&body)
            .send()
    };
    let empty = post(json!({ "articleSlug": "first-post", "content": "   " })).await.unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let missing = post(json!({ "articleSlug": "no-such-post", "content": "hi" })).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let cross = post(json!({ "articleSlug": "second-post", "content": "hi", "parentId": root }))
        .await
        .unwrap();
    assert_eq!(cross.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.count("comments").await, 1);
}

#[tokio::test]
async fn comment_notifications_reach_the_right_people() {
    let app = spawn_app().await;
    let (admin_id, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (fan_id, fan) = app.sign_up("fan@rock.test", "Fan").await;
    app.create_article(&admin, "live-show", "События").await;

    // Commenting on your own article notifies nobody.
    app.post_comment(&admin, "live-show", "see you there", None).await;
    assert!(app.notifications(&admin).await.is_empty());

    let fan_comment = app.post_comment(&fan, "live-show", "can't wait", None).await;
    let fan_comment_id = fan_comment["id"].as_i64().unwrap();
    let inbox = app.notifications(&admin).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["type"], json!("NEW_COMMENT"));
    assert_eq!(inbox[0]["fromUserId"], json!(fan_id));
    assert_eq!(inbox[0]["fromUser"]["name"], json!("Fan"));
    assert_eq!(inbox[0]["link"], json!(format!("/events/live-show#comment-{fan_comment_id}")));
    assert_eq!(inbox[0]["read"], json!(false));

    // A reply goes to the parent's author, not the article's.
    let reply = app.post_comment(&admin, "live-show", "glad to hear", Some(fan_comment_id)).await;
    let inbox = app.notifications(&fan).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["type"], json!("COMMENT_REPLY"));
    assert_eq!(inbox[0]["userId"], json!(fan_id));
    assert_eq!(inbox[0]["commentId"], reply["id"]);
    assert_eq!(app.notifications(&admin).await.len(), 1);

    // Replying to yourself stays silent too.
    app.post_comment(&fan, "live-show", "me again", Some(fan_comment_id)).await;
    assert_eq!(app.notifications(&fan).await.len(), 1);
    assert_eq!(app.notifications(&admin).await[0]["userId"], json!(admin_id));
}

#[tokio::test]
async fn votes_switch_and_toggle_off() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (_, fan) = app.sign_up("fan@rock.test", "Fan").await;
    app.create_article(&admin, "test-post", "News").await;
    let comment_id = app.post_comment(&admin, "test-post", "vote on me", None).await["id"]
        .as_i64()
        .unwrap();

    let liked = app.vote(&fan, comment_id, "LIKE").await;
    assert_eq!(liked["likes"], json!(1));
    assert_eq!(liked["dislikes"], json!(0));
    assert_eq!(liked["userVote"], json!("LIKE"));

    let inbox = app.notifications(&admin).await;
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["type"], json!("COMMENT_LIKE"));
    assert_eq!(inbox[0]["link"], json!(format!("/news/test-post#comment-{comment_id}")));

    let switched = app.vote(&fan, comment_id, "DISLIKE").await;
    assert_eq!(switched["likes"], json!(0));
    assert_eq!(switched["dislikes"], json!(1));
    assert_eq!(app.count("comment_votes").await, 1);

    let withdrawn = app.vote(&fan, comment_id, "DISLIKE").await;
    assert_eq!(withdrawn["likes"], json!(0));
    assert_eq!(withdrawn["dislikes"], json!(0));
    assert_eq!(withdrawn["userVote"], Value::Null);
    assert_eq!(app.count("comment_votes").await, 0);

    // Liking your own comment is counted but not announced.
    let own = app.vote(&admin, comment_id, "LIKE").await;
    assert_eq!(own["likes"], json!(1));
    assert_eq!(app.notifications(&admin).await.len(), 1);

    let response = app
        .client
        .post(app.url("/api/comments/vote"))
        .header(header::COOKIE, &fan)
        .json(&json!({ "commentId": 9999, "voteType": "LIKE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_are_serialized_not_rejected() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    app.create_article(&admin, "test-post", "News").await;
    let comment_id = app.post_comment(&admin, "test-post", "vote on me", None).await["id"]
        .as_i64()
        .unwrap();

    let mut fans = Vec::new();
    for n in 0..8 {
        fans.push(app.sign_up(&format!("fan{n}@rock.test"), &format!("Fan {n}")).await.1);
    }

    let mut requests = tokio::task::JoinSet::new();
    for cookie in &fans {
        let vote = app
            .client
            .post(app.url("/api/comments/vote"))
            .header(header::COOKIE, cookie)
            .json(&json!({ "commentId": comment_id, "voteType": "LIKE" }));
        let reply = app
            .client
            .post(app.url("/api/comments"))
            .header(header::COOKIE, cookie)
            .json(&json!({ "articleSlug": "test-post", "content": "me too", "parentId": comment_id }));
        requests.spawn(async move { vote.send().await.unwrap().status() });
        requests.spawn(async move { reply.send().await.unwrap().status() });
    }
    let mut statuses = Vec::new();
    while let Some(status) = requests.join_next().await {
        statuses.push(status.unwrap());
    }
    assert!(
        statuses.iter().all(|s| s.is_success()),
        "statuses: {statuses:?}"
    );

    let likes: i64 = sqlx::query_scalar("SELECT likes FROM comments WHERE id = ?1")
        .bind(comment_id)
        .fetch_one(&app.state.pool)
        .await
        .unwrap();
    assert_eq!(likes, fans.len() as i64);
    assert_eq!(app.count("comment_votes").await, fans.len() as i64);
    assert_eq!(app.count("comments").await, fans.len() as i64 + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_first_sign_ups_make_a_single_admin() {
    let app = spawn_app().await;

    let mut requests = tokio::task::JoinSet::new();
    for n in 0..4 {
        let register = app
            .client
            .post(app.url("/api/auth/register"))
            .json(&json!({ "email": format!("early{n}@rock.test"), "password": "x", "name": "Early" }));
        requests.spawn(async move { register.send().await.unwrap().status() });
    }
    while let Some(status) = requests.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::CREATED);
    }

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin")
        .fetch_one(&app.state.pool)
        .await
        .unwrap();
    assert_eq!(admins, 1);
    assert_eq!(app.count("users").await, 4);
}

#[tokio::test]
async fn notifications_are_private_to_their_owner() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (_, fan) = app.sign_up("fan@rock.test", "Fan").await;
    app.create_article(&admin, "test-post", "News").await;
    app.post_comment(&fan, "test-post", "one", None).await;
    app.post_comment(&fan, "test-post", "two", None).await;

    let inbox = app.notifications(&admin).await;
    assert_eq!(inbox.len(), 2);
    let newest = inbox[0]["id"].as_i64().unwrap();
    let oldest = inbox[1]["id"].as_i64().unwrap();
    assert!(newest > oldest);

    let response = app.client.get(app.url("/api/notifications")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let stranger_delete = app
        .client
        .delete(app.url(&format!("/api/notifications/{newest}")))
        .header(header::COOKIE, &fan)
        .send()
        .await
        .unwrap();
    assert_eq!(stranger_delete.status(), StatusCode::NOT_FOUND);
    let stranger_read = app
        .client
        .patch(app.url(&format!("/api/notifications/{newest}/read")))
        .header(header::COOKIE, &fan)
        .send()
        .await
        .unwrap();
    assert_eq!(stranger_read.status(), StatusCode::NOT_FOUND);

    let unread = |cookie: String| {
        let request = app
            .client
            .get(app.url("/api/notifications/unread-count"))
            .header(header::COOKIE, cookie)
            .send();
        async move { request.await.unwrap().json::<Value>().await.unwrap()["count"].clone() }
    };
    assert_eq!(unread(admin.clone()).await, json!(2));

    let response = app
        .client
        .patch(app.url(&format!("/api/notifications/{newest}/read")))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(unread(admin.clone()).await, json!(1));

    let response = app
        .client
        .delete(app.url("/api/notifications/clean"))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ids(&app.notifications(&admin).await), vec![oldest]);

    let response = app
        .client
        .patch(app.url("/api/notifications/read-all"))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(unread(admin.clone()).await, json!(0));

    let response = app
        .client
        .delete(app.url(&format!("/api/notifications/{oldest}")))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.notifications(&admin).await.is_empty());

    app.post_comment(&fan, "test-post", "three", None).await;
    assert_eq!(app.notifications(&admin).await.len(), 1);
    let response = app
        .client
        .delete(app.url("/api/notifications"))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.notifications(&admin).await.is_empty());
}

#[tokio::test]
async fn article_writes_need_an_admin() {
    let app = spawn_app().await;
    let (admin_id, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (_, fan) = app.sign_up("fan@rock.test", "Fan").await;

    assert_eq!(app.create_article(&fan, "nope", "News").await.status(), StatusCode::FORBIDDEN);
    let anonymous = app
        .client
        .post(app.url("/api/articles"))
        .multipart(multipart::Form::new().text("title", "x"))
        .send()
        .await
        .unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let incomplete = app
        .client
        .post(app.url("/api/articles"))
        .header(header::COOKIE, &admin)
        .multipart(multipart::Form::new().text("title", "No body"))
        .send()
        .await
        .unwrap();
    assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);

    let created = app.create_article(&admin, "paranoid", "Исполнители").await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let article: Value = created.json().await.unwrap();
    let id = article["id"].as_i64().unwrap();
    assert_eq!(article["status"], json!("draft"));
    assert_eq!(article["authorId"], json!(admin_id));
    assert_eq!(article["categories"], json!(["Исполнители"]));

    let comma: Value = app
        .create_article(&admin, "sabbath", "Rock, Roll")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(comma["categories"], json!(["Rock, Roll"]));

    let duplicate = app.create_article(&admin, "paranoid", "News").await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let updated = app
        .client
        .put(app.url(&format!("/api/articles/{id}")))
        .header(header::COOKIE, &admin)
        .multipart(
            multipart::Form::new()
                .text("title", "Paranoid (remastered)")
                .text("status", "PUBLISHED"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);
    let updated: Value = updated.json().await.unwrap();
    assert_eq!(updated["title"], json!("Paranoid (remastered)"));
    assert_eq!(updated["status"], json!("published"));
    assert_eq!(updated["content"], json!("Riffs and more riffs"));

    app.create_article(&admin, "war-pigs", "News").await;
    let found: Vec<Value> = app
        .client
        .get(app.url("/api/articles?search=remastered"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ids(&found), vec![id]);
    let all: Vec<Value> = app
        .client
        .get(app.url("/api/articles"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0]["slug"], json!("war-pigs"));
    assert_eq!(all[2]["categories"], json!(["Исполнители"]));

    let missing = app
        .client
        .put(app.url("/api/articles/9999"))
        .header(header::COOKIE, &admin)
        .multipart(multipart::Form::new().text("title", "ghost"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.post_comment(&fan, "paranoid", "classic", None).await;
    let deleted = app
        .client
        .delete(app.url(&format!("/api/articles/{id}")))
        .header(header::COOKIE, &admin)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let gone = app.client.get(app.url("/api/articles/paranoid")).send().await.unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.count("comments").await, 0);
}

#[tokio::test]
async fn comment_edits_and_deletes_respect_ownership() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (_, fan) = app.sign_up("fan@rock.test", "Fan").await;
    let (_, troll) = app.sign_up("troll@rock.test", "Troll").await;
    app.create_article(&admin, "test-post", "News").await;
    let root = app.post_comment(&fan, "test-post", "root", None).await["id"].as_i64().unwrap();
    app.post_comment(&troll, "test-post", "reply", Some(root)).await;

    let edit = |cookie: &str, content: &str| {
        app.client
            .put(app.url(&format!("/api/comments/{root}")))
            .header(header::COOKIE, cookie)
            .json(&json!({ "content": content }))
            .send()
    };
    assert_eq!(edit(&troll, "hacked").await.unwrap().status(), StatusCode::FORBIDDEN);
    assert_eq!(edit(&fan, "").await.unwrap().status(), StatusCode::BAD_REQUEST);
    let edited: Value = edit(&fan, "edited root").await.unwrap().json().await.unwrap();
    assert_eq!(edited["content"], json!("edited root"));

    let delete = |cookie: &str| {
        app.client
            .delete(app.url(&format!("/api/comments/{root}")))
            .header(header::COOKIE, cookie)
            .send()
    };
    assert_eq!(delete(&troll).await.unwrap().status(), StatusCode::FORBIDDEN);
    // Admins may remove anyone's comment; replies go with it.
    assert_eq!(delete(&admin).await.unwrap().status(), StatusCode::OK);
    assert_eq!(app.count("comments").await, 0);
    assert_eq!(delete(&fan).await.unwrap().status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn account_lifecycle() {
    let app = spawn_app().await;
    let (id, cookie) = app.sign_up("Ozzy@Rock.test", "Ozzy").await;

    let duplicate = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "email": "ozzy@rock.test", "password": "x", "name": "Other" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    let incomplete = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&json!({ "email": "someone@rock.test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);

    let wrong = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({ "email": "ozzy@rock.test", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let me: Value = app
        .client
        .get(app.url("/api/auth/me"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["user"]["id"], json!(id));
    assert_eq!(me["user"]["email"], json!("ozzy@rock.test"));
    assert_eq!(me["user"]["isAdmin"], json!(true));
    assert_eq!(me["user"]["provider"], json!("local"));

    let anonymous = app.client.get(app.url("/api/auth/me")).send().await.unwrap();
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    let forged = app
        .client
        .get(app.url("/api/auth/me"))
        .header(header::COOKIE, "authToken=not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let avatar = multipart::Part::bytes(vec![137, 80, 78, 71])
        .file_name("me.png")
        .mime_str("image/png")
        .unwrap();
    let uploaded: Value = app
        .client
        .post(app.url("/api/auth/upload-avatar"))
        .header(header::COOKIE, &cookie)
        .multipart(multipart::Form::new().part("avatar", avatar))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let avatar_url = uploaded["avatarUrl"].as_str().unwrap().to_string();
    assert!(avatar_url.starts_with("/uploads/avatars/"));
    let served = app.client.get(app.url(&avatar_url)).send().await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().to_vec(), vec![137u8, 80, 78, 71]);

    let text = multipart::Part::bytes(b"hello".to_vec())
        .file_name("notes.txt")
        .mime_str("text/plain")
        .unwrap();
    let rejected = app
        .client
        .post(app.url("/api/auth/upload-avatar"))
        .header(header::COOKIE, &cookie)
        .multipart(multipart::Form::new().part("avatar", text))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let logout = app
        .client
        .post(app.url("/api/auth/logout"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::OK);
    let cleared = logout.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cleared.starts_with("authToken=;"));
}

#[tokio::test]
async fn forgot_password_keeps_the_old_password_and_reveals_nothing() {
    let app = spawn_app().await;
    app.sign_up("ozzy@rock.test", "Ozzy").await;

    let ask = |email: &str| {
        app.client
            .post(app.url("/api/auth/forgot-password"))
            .json(&json!({ "email": email }))
            .send()
    };
    let known: Value = ask("ozzy@rock.test").await.unwrap().json().await.unwrap();
    let unknown: Value = ask("nobody@rock.test").await.unwrap().json().await.unwrap();
    assert_eq!(known, unknown);

    // The request alone changes nothing for the owner.
    let login = |password: &str| {
        app.client
            .post(app.url("/api/auth/login"))
            .json(&json!({ "email": "ozzy@rock.test", "password": password }))
            .send()
    };
    assert_eq!(login("master-of-puppets").await.unwrap().status(), StatusCode::OK);
    let pending: i64 = sqlx::query_scalar(
        "SELECT reset_password IS NOT NULL AND reset_password != password FROM users WHERE email = ?1",
    )
    .bind("ozzy@rock.test")
    .fetch_one(&app.state.pool)
    .await
    .unwrap();
    assert_eq!(pending, 1);

    // Stand in for the mailed temporary password: move the known hash into
    // the pending slot so that only it accepts "master-of-puppets".
    sqlx::query("UPDATE users SET reset_password = password, password = NULL WHERE email = ?1")
        .bind("ozzy@rock.test")
        .execute(&app.state.pool)
        .await
        .unwrap();
    assert_eq!(login("master-of-puppets").await.unwrap().status(), StatusCode::OK);
    let promoted: i64 = sqlx::query_scalar(
        "SELECT reset_password IS NULL AND reset_expires_at IS NULL FROM users WHERE email = ?1",
    )
    .bind("ozzy@rock.test")
    .fetch_one(&app.state.pool)
    .await
    .unwrap();
    assert_eq!(promoted, 1);
    assert_eq!(login("master-of-puppets").await.unwrap().status(), StatusCode::OK);

    // An expired temporary password is refused.
    ask("ozzy@rock.test").await.unwrap();
    sqlx::query(
        "UPDATE users SET reset_password = password, password = NULL, reset_expires_at = ?1 WHERE email = ?2",
    )
    .bind(chrono::Utc::now() - chrono::Duration::minutes(1))
    .bind("ozzy@rock.test")
    .execute(&app.state.pool)
    .await
    .unwrap();
    assert_eq!(login("master-of-puppets").await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn categories_and_social_login_fallback() {
    let app = spawn_app().await;
    let (_, admin) = app.sign_up("admin@rock.test", "Admin").await;
    let (_, fan) = app.sign_up("fan@rock.test", "Fan").await;

    let create = |cookie: &str, name: &str| {
        app.client
            .post(app.url("/api/categories"))
            .header(header::COOKIE, cookie)
            .json(&json!({ "name": name }))
            .send()
    };
    assert_eq!(create(&admin, "News").await.unwrap().status(), StatusCode::CREATED);
    assert_eq!(create(&admin, "News").await.unwrap().status(), StatusCode::CONFLICT);
    assert_eq!(create(&admin, " ").await.unwrap().status(), StatusCode::BAD_REQUEST);
    assert_eq!(create(&fan, "Events").await.unwrap().status(), StatusCode::FORBIDDEN);

    let categories: Vec<Value> = app
        .client
        .get(app.url("/api/categories"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0]["name"], json!("News"));

    // No provider credentials are configured in tests.
    let response = app
        .client
        .get(app.url("/api/oauth/google?code=abc"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    assert_eq!(
        response.headers()[header::LOCATION],
        "http://localhost:5173?error=oauth_failed"
    );
}
