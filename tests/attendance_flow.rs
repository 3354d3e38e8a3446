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

fn count(state: &AppState, sql: &str) -> i64 {
    state
        .conn()
        .query_row(sql, [], |r| r.get(0))
        .expect("count query")
}

async fn staff_session(app: &Router) -> String {
    let admin = login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    seed_school(app, &admin).await;
    login(app, "grace@school.test", "staff-pass").await
}

#[tokio::test]
async fn roster_lists_course_students_last_name_first() {
    let (app, _state) = setup("studentd-att-roster");
    let staff = staff_session(&app).await;

    let r = send(
        &app,
        "POST",
        "/staff/get_students",
        Some(&staff),
        &[("subject", "1"), ("session", "1")],
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(
        r.json(),
        serde_json::json!([
            { "id": 1, "name": "Lovelace Ada" },
            { "id": 2, "name": "Turing Alan" },
        ])
    );

    let r = send(
        &app,
        "POST",
        "/staff/get_students",
        Some(&staff),
        &[("subject", "9"), ("session", "1")],
    )
    .await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn save_then_fetch_shows_one_present_student() {
    let (app, state) = setup("studentd-att-save");
    let staff = staff_session(&app).await;

    let r = send(
        &app,
        "POST",
        "/staff/attendance/save",
        Some(&staff),
        &[
            ("subject", "1"),
            ("session", "1"),
            ("date", "2023-01-01"),
            ("student_ids", r#"[{"id":1,"status":1}]"#),
        ],
    )
    .await;
    assert_eq!(r.status, StatusCode::OK);
    assert_eq!(r.body, "OK");

    let dates = send(
        &app,
        "POST",
        "/attendance/fetch",
        Some(&staff),
        &[("subject", "1"), ("session", "1")],
    )
    .await
    .json();
    assert_eq!(
        dates,
        serde_json::json!([{ "id": 1, "attendance_date": "2023-01-01", "session": 1 }])
    );

    let reports = send(
        &app,
        "POST",
        "/staff/attendance/students",
        Some(&staff),
        &[("attendance_date_id", "1")],
    )
    .await
    .json();
    assert_eq!(
        reports,
        serde_json::json!([{ "id": 1, "name": "Lovelace Ada", "status": true }])
    );
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance"), 1);
}

#[tokio::test]
async fn saving_the_same_key_twice_never_duplicates_rows() {
    let (app, state) = setup("studentd-att-idem");
    let staff = staff_session(&app).await;

    for payload in [
        r#"[{"id":1,"status":1},{"id":2,"status":0}]"#,
        r#"[{"id":1,"status":0},{"id":2,"status":true}]"#,
    ] {
        let r = send(
            &app,
            "POST",
            "/staff/attendance/save",
            Some(&staff),
            &[
                ("subject", "1"),
                ("session", "1"),
                ("date", "2024-10-07"),
                ("student_ids", payload),
            ],
        )
        .await;
        assert_eq!(r.body, "OK");
    }

    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance"), 1);
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance_reports"), 2);
    assert_eq!(
        count(
            &state,
            "SELECT status FROM attendance_reports WHERE student_id = 2"
        ),
        1
    );
}

#[tokio::test]
async fn update_flips_status_without_new_rows() {
    let (app, state) = setup("studentd-att-update");
    let staff = staff_session(&app).await;
    send(
        &app,
        "POST",
        "/staff/attendance/save",
        Some(&staff),
        &[
            ("subject", "1"),
            ("session", "1"),
            ("date", "2023-01-01"),
            ("student_ids", r#"[{"id":1,"status":1},{"id":2,"status":1}]"#),
        ],
    )
    .await;

    let r = send(
        &app,
        "POST",
        "/staff/attendance/update",
        Some(&staff),
        &[
            ("attendance_date_id", "1"),
            ("student_ids", r#"[{"id":1,"status":0}]"#),
        ],
    )
    .await;
    assert_eq!(r.body, "OK");
    assert_eq!(
        count(
            &state,
            "SELECT status FROM attendance_reports WHERE student_id = 1"
        ),
        0
    );
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance"), 1);
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance_reports"), 2);

    let r = send(
        &app,
        "POST",
        "/staff/attendance/update",
        Some(&staff),
        &[
            ("attendance_date_id", "42"),
            ("student_ids", r#"[{"id":1,"status":1}]"#),
        ],
    )
    .await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_entries_roll_back_the_whole_submission() {
    let (app, state) = setup("studentd-att-atomic");
    let staff = staff_session(&app).await;

    let r = send(
        &app,
        "POST",
        "/staff/attendance/save",
        Some(&staff),
        &[
            ("subject", "1"),
            ("session", "1"),
            ("date", "2024-10-08"),
            ("student_ids", r#"[{"id":1,"status":1},{"id":99,"status":1}]"#),
        ],
    )
    .await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance"), 0);
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance_reports"), 0);

    send(
        &app,
        "POST",
        "/staff/attendance/save",
        Some(&staff),
        &[
            ("subject", "1"),
            ("session", "1"),
            ("date", "2024-10-08"),
            ("student_ids", r#"[{"id":1,"status":1}]"#),
        ],
    )
    .await;
    let r = send(
        &app,
        "POST",
        "/staff/attendance/update",
        Some(&staff),
        &[
            ("attendance_date_id", "1"),
            ("student_ids", r#"[{"id":1,"status":0},{"id":2,"status":0}]"#),
        ],
    )
    .await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
    assert_eq!(
        count(
            &state,
            "SELECT status FROM attendance_reports WHERE student_id = 1"
        ),
        1
    );
    assert_eq!(count(&state, "SELECT COUNT(*) FROM attendance_reports"), 1);
}

#[tokio::test]
async fn malformed_payloads_are_rejected() {
    let (app, _state) = setup("studentd-att-bad");
    let staff = staff_session(&app).await;

    for (date, ids) in [
        ("2024-13-01", r#"[]"#),
        ("2024-10-01", r#"{"id":1}"#),
        ("2024-10-01", r#"[{"id":1,"status":"maybe"}]"#),
    ] {
        let r = send(
            &app,
            "POST",
            "/staff/attendance/save",
            Some(&staff),
            &[
                ("subject", "1"),
                ("session", "1"),
                ("date", date),
                ("student_ids", ids),
            ],
        )
        .await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST, "{} {}", date, ids);
        assert_eq!(r.json()["error"]["code"], "bad_params");
    }
}

#[tokio::test]
async fn admin_view_requires_matching_subject_and_session() {
    let (app, _state) = setup("studentd-att-admin");
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
    seed_school(&app, &admin).await;
    let staff = login(&app, "grace@school.test", "staff-pass").await;
    send(
        &app,
        "POST",
        "/staff/attendance/save",
        Some(&staff),
        &[
            ("subject", "1"),
            ("session", "1"),
            ("date", "2024-10-09"),
            ("student_ids", r#"[{"id":1,"status":1},{"id":2,"status":0}]"#),
        ],
    )
    .await;

    let view = send(&app, "GET", "/admin/attendance/view", Some(&admin), &[]).await.json();
    assert_eq!(view["subjects"][0]["name"], "Algorithms");

    let r = send(
        &app,
        "POST",
        "/admin/attendance/get",
        Some(&admin),
        &[("subject", "1"), ("session", "1"), ("attendance_date_id", "1")],
    )
    .await;
    assert_eq!(
        r.json(),
        serde_json::json!([
            { "status": true, "name": "Lovelace Ada" },
            { "status": false, "name": "Turing Alan" },
        ])
    );

    let r = send(
        &app,
        "POST",
        "/admin/attendance/get",
        Some(&admin),
        &[("subject", "2"), ("session", "1"), ("attendance_date_id", "1")],
    )
    .await;
    assert_eq!(r.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn students_see_their_own_attendance_in_range() {
    let (app, _state) = setup("studentd-att-student");
    let staff = staff_session(&app).await;
    for (date, status) in [("2024-10-01", 1), ("2024-10-02", 0), ("2024-11-01", 1)] {
        let ids = format!(r#"[{{"id":1,"status":{}}},{{"id":2,"status":1}}]"#, status);
        send(
            &app,
            "POST",
            "/staff/attendance/save",
            Some(&staff),
            &[
                ("subject", "1"),
                ("session", "1"),
                ("date", date),
                ("student_ids", ids.as_str()),
            ],
        )
        .await;
    }

    let ada = login(&app, "ada@school.test", "student-pass").await;
    let r = send(
        &app,
        "POST",
        "/student/attendance",
        Some(&ada),
        &[
            ("subject", "1"),
            ("start_date", "2024-10-01"),
            ("end_date", "2024-10-31"),
        ],
    )
    .await;
    assert_eq!(
        r.json(),
        serde_json::json!([
            { "date": "2024-10-01", "status": true },
            { "date": "2024-10-02", "status": false },
        ])
    );

    let r = send(
        &app,
        "POST",
        "/student/attendance",
        Some(&ada),
        &[
            ("subject", "1"),
            ("start_date", "2024-10-31"),
            ("end_date", "2024-10-01"),
        ],
    )
    .await;
    assert_eq!(r.status, StatusCode::BAD_REQUEST);

    let home = send(&app, "GET", "/student/home", Some(&ada), &[]).await.json();
    assert_eq!(home["total_attendance"], 3);
    assert_eq!(home["data_present"], serde_json::json!([2]));
    assert_eq!(home["data_absent"], serde_json::json!([1]));
    assert_eq!(home["percent_present"], 66.67);

    let picker = send(&app, "GET", "/student/attendance", Some(&ada), &[]).await.json();
    assert_eq!(picker["subjects"][0]["name"], "Algorithms");
}
