use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use studentd::config::Cfg;
use studentd::notify::LogPushSender;
use studentd::web::{build_router, AppState};

const ADMIN_EMAIL: &str = "hod@school.test";
const ADMIN_PASSWORD: &str = "hod-pass";

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn setup(prefix: &str) -> (Router, AppState) {
    let cfg = Cfg {
        workspace: temp_dir(prefix),
        admin_email: ADMIN_EMAIL.to_string(),
        admin_password: ADMIN_PASSWORD.to_string(),
        ..Cfg::default()
    };
    let state = studentd::bootstrap(&cfg, Arc::new(LogPushSender)).expect("bootstrap");
    (build_router(state.clone()), state)
}

struct Reply {
    status: StatusCode,
    location: Option<String>,
    set_cookies: Vec<String>,
    body: String,
}

impl Reply {
    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("json body")
    }

    fn cookie(&self, name: &str) -> Option<String> {
        self.set_cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .find(|c| c.starts_with(&format!("{}=", name)))
            .map(str::to_string)
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    form: &[(&str, &str)],
) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(c) = cookie {
        builder = builder.header(header::COOKIE, c);
    }
    let body = if method == "POST" {
        builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        Body::from(serde_urlencoded::to_string(form).expect("encode form"))
    } else {
        Body::empty()
    };
    let res = app
        .clone()
        .oneshot(builder.body(body).expect("build request"))
        .await
        .expect("router is infallible");
    let status = res.status();
    let location = res
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let set_cookies = res
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_string)
        .collect();
    let bytes = res.into_body().collect().await.expect("read body").to_bytes();
    Reply {
        status,
        location,
        set_cookies,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

async fn login(app: &Router, email: &str, password: &str) -> String {
    let r = send(
        app,
        "POST",
        "/doLogin",
        None,
        &[("email", email), ("password", password)],
    )
    .await;
    assert_eq!(r.status, StatusCode::FOUND, "login failed for {}", email);
    r.cookie("sessionid").expect("session cookie")
}

async fn post_ok(app: &Router, cookie: &str, uri: &str, form: &[(&str, &str)]) {
    let r = send(app, "POST", uri, Some(cookie), form).await;
    assert_eq!(r.status, StatusCode::FOUND, "{} failed: {}", uri, r.body);
}

/// One course, session, staff member and subject, and two students:
/// students.id 1 is Ada Lovelace, 2 is Alan Turing.
async fn seed_school(app: &Router, admin: &str) {
    post_ok(app, admin, "/admin/course/add", &[("name", "Computer Science")]).await;
    post_ok(
        app,
        admin,
        "/admin/session/add",
        &[("start_year", "2024-09-01"), ("end_year", "2025-06-30")],
    )
    .await;
    post_ok(
        app,
        admin,
        "/admin/staff/add",
        &[
            ("first_name", "Grace"),
            ("last_name", "Hopper"),
            ("email", "grace@school.test"),
            ("password", "staff-pass"),
            ("gender", "F"),
            ("address", "1 Navy Way"),
            ("course", "1"),
        ],
    )
    .await;
    post_ok(
        app,
        admin,
        "/admin/subject/add",
        &[("name", "Algorithms"), ("course", "1"), ("staff", "1")],
    )
    .await;
    for (first, last, email) in [
        ("Ada", "Lovelace", "ada@school.test"),
        ("Alan", "Turing", "alan@school.test"),
    ] {
        post_ok(
            app,
            admin,
            "/admin/student/add",
            &[
                ("first_name", first),
                ("last_name", last),
                ("email", email),
                ("password", "student-pass"),
                ("gender", "M"),
                ("address", "Bletchley"),
                ("course", "1"),
                ("session", "1"),
            ],
        )
        .await;
    }
}

fn messages(page: &serde_json::Value) -> Vec<String> {
    page["messages"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m["message"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

async fn staff_session(app: &Router) -> String {
    let admin = login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    seed_school(app, &admin).await;
    login(app, "grace@school.test", "staff-pass").await
}

#[tokio::test]
async fn adding_a_result_twice_updates_the_same_row() {
    let (app, state) = setup("studentd-results-upsert");
    let staff = staff_session(&app).await;

    let r = send(
        &app,
        "POST",
        "/staff/result/add",
        Some(&staff),
        &[("subject", "1"), ("student_list", "2"), ("test", "30"), ("exam", "55")],
    )
    .await;
    assert_eq!(r.status, StatusCode::FOUND);
    assert_eq!(r.location.as_deref(), Some("/staff/result/add"));
    let page = send(&app, "GET", "/staff/result/add", Some(&staff), &[]).await.json();
    assert_eq!(messages(&page), vec!["Scores Saved".to_string()]);
    assert_eq!(page["subjects"][0]["name"], "Algorithms");

    send(
        &app,
        "POST",
        "/staff/result/add",
        Some(&staff),
        &[("subject", "1"), ("student_list", "2"), ("test", "35"), ("exam", "60.5")],
    )
    .await;
    let page = send(&app, "GET", "/staff/result/add", Some(&staff), &[]).await.json();
    assert_eq!(messages(&page), vec!["Scores Updated".to_string()]);

    let rows: i64 = state
        .conn()
        .query_row("SELECT COUNT(*) FROM student_results", [], |r| r.get(0))
        .expect("count results");
    assert_eq!(rows, 1);

    let r = send(
        &app,
        "POST",
        "/staff/result/fetch",
        Some(&staff),
        &[("subject", "1"), ("student", "2")],
    )
    .await;
    assert_eq!(r.json(), serde_json::json!({ "exam": 60.5, "test": 35.0 }));
}

#[tokio::test]
async fn out_of_range_scores_rerender_the_form() {
    let (app, state) = setup("studentd-results-invalid");
    let staff = staff_session(&app).await;

    let r = send(
        &app,
        "POST",
        "/staff/result/add",
        Some(&staff),
        &[("subject", "1"), ("student_list", "1"), ("test", "101"), ("exam", "x")],
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);
    let page = r.json();
    assert_eq!(page["page"], "staff_add_result");
    let fields: Vec<&str> = page["errors"]
        .as_array()
        .map(|e| e.iter().filter_map(|f| f["field"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(fields, vec!["test", "exam"]);

    let r = send(
        &app,
        "POST",
        "/staff/result/add",
        Some(&staff),
        &[("subject", "1"), ("student_list", "77"), ("test", "10"), ("exam", "10")],
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(page_level(&r.json()), Some("error".to_string()));

    let rows: i64 = state
        .conn()
        .query_row("SELECT COUNT(*) FROM student_results", [], |r| r.get(0))
        .expect("count results");
    assert_eq!(rows, 0);
}

fn page_level(page: &serde_json::Value) -> Option<String> {
    page["messages"][0]["level"].as_str().map(str::to_string)
}

#[tokio::test]
async fn fetch_and_edit_only_touch_existing_results() {
    let (app, _state) = setup("studentd-results-edit");
    let staff = staff_session(&app).await;

    let r = send(
        &app,
        "POST",
        "/staff/result/fetch",
        Some(&staff),
        &[("subject", "1"), ("student", "1")],
    )
    .await;
    assert_eq!(r.body, "False");

    let r = send(
        &app,
        "POST",
        "/staff/result/edit",
        Some(&staff),
        &[("subject", "1"), ("student_list", "1"), ("test", "20"), ("exam", "40")],
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(messages(&r.json()), vec!["Result Could Not Be Updated".to_string()]);

    send(
        &app,
        "POST",
        "/staff/result/add",
        Some(&staff),
        &[("subject", "1"), ("student_list", "1"), ("test", "20"), ("exam", "40")],
    )
    .await;
    let r = send(
        &app,
        "POST",
        "/staff/result/edit",
        Some(&staff),
        &[("subject", "1"), ("student_list", "1"), ("test", "25"), ("exam", "45")],
    )
    .await;
    assert_eq!(r.location.as_deref(), Some("/staff/result/edit"));

    let ada = login(&app, "ada@school.test", "student-pass").await;
    let page = send(&app, "GET", "/student/results", Some(&ada), &[]).await.json();
    assert_eq!(
        page["results"],
        serde_json::json!([
            { "subject": "Algorithms", "test": 25.0, "exam": 45.0, "total": 70.0 }
        ])
    );
}
