use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::web::gate::login_check;
use crate::web::handlers::{
    attendance, feedback, hod, leave, login, notifications, profile, results, staff, student,
};
use crate::web::types::AppState;

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/home", get(hod::home))
        .route("/profile", get(profile::view).post(profile::submit))
        .route(
            "/course/add",
            get(hod::add_course_page).post(hod::add_course_submit),
        )
        .route("/course/manage", get(hod::manage_course))
        .route(
            "/course/edit/:id",
            get(hod::edit_course_page).post(hod::edit_course_submit),
        )
        .route("/course/delete/:id", get(hod::delete_course_handler))
        .route(
            "/session/add",
            get(hod::add_session_page).post(hod::add_session_submit),
        )
        .route("/session/manage", get(hod::manage_session))
        .route(
            "/session/edit/:id",
            get(hod::edit_session_page).post(hod::edit_session_submit),
        )
        .route("/session/delete/:id", get(hod::delete_session_handler))
        .route(
            "/subject/add",
            get(hod::add_subject_page).post(hod::add_subject_submit),
        )
        .route("/subject/manage", get(hod::manage_subject))
        .route(
            "/subject/edit/:id",
            get(hod::edit_subject_page).post(hod::edit_subject_submit),
        )
        .route("/subject/delete/:id", get(hod::delete_subject_handler))
        .route(
            "/staff/add",
            get(hod::add_staff_page).post(hod::add_staff_submit),
        )
        .route("/staff/manage", get(hod::manage_staff))
        .route(
            "/staff/edit/:id",
            get(hod::edit_staff_page).post(hod::edit_staff_submit),
        )
        .route("/staff/delete/:id", get(hod::delete_staff_handler))
        .route(
            "/student/add",
            get(hod::add_student_page).post(hod::add_student_submit),
        )
        .route("/student/manage", get(hod::manage_student))
        .route(
            "/student/edit/:id",
            get(hod::edit_student_page).post(hod::edit_student_submit),
        )
        .route("/student/delete/:id", get(hod::delete_student_handler))
        .route(
            "/check_email_availability",
            post(hod::check_email_availability),
        )
        .route(
            "/feedback/student",
            get(feedback::admin_student_page).post(feedback::admin_student_reply),
        )
        .route(
            "/feedback/staff",
            get(feedback::admin_staff_page).post(feedback::admin_staff_reply),
        )
        .route(
            "/leave/student",
            get(leave::admin_student_page).post(leave::admin_student_decide),
        )
        .route(
            "/leave/staff",
            get(leave::admin_staff_page).post(leave::admin_staff_decide),
        )
        .route("/attendance/view", get(hod::view_attendance))
        .route("/attendance/get", post(attendance::admin_get))
        .route("/notify/staff", get(notifications::admin_staff_page))
        .route("/notify/student", get(notifications::admin_student_page))
        .route("/notify/staff/send", post(notifications::admin_send_staff))
        .route(
            "/notify/student/send",
            post(notifications::admin_send_student),
        )
}

fn staff_routes() -> Router<AppState> {
    Router::new()
        .route("/home", get(staff::home))
        .route("/attendance/take", get(staff::take_attendance))
        .route("/get_students", post(attendance::get_students))
        .route("/attendance/save", post(attendance::save))
        .route(
            "/attendance/update",
            get(staff::update_attendance).post(attendance::update),
        )
        .route("/attendance/dates", post(attendance::get_dates))
        .route("/attendance/students", post(attendance::get_reports))
        .route(
            "/leave",
            get(leave::staff_page).post(leave::staff_submit),
        )
        .route(
            "/feedback",
            get(feedback::staff_page).post(feedback::staff_submit),
        )
        .route("/profile", get(profile::view).post(profile::submit))
        .route("/fcmtoken", post(notifications::fcmtoken))
        .route("/notifications", get(notifications::staff_view))
        .route(
            "/result/add",
            get(results::add_page).post(results::add_submit),
        )
        .route("/result/fetch", post(results::fetch))
        .route(
            "/result/edit",
            get(results::edit_page).post(results::edit_submit),
        )
}

fn student_routes() -> Router<AppState> {
    Router::new()
        .route("/home", get(student::home))
        .route(
            "/attendance",
            get(student::attendance_page).post(attendance::student_range),
        )
        .route(
            "/leave",
            get(leave::student_page).post(leave::student_submit),
        )
        .route(
            "/feedback",
            get(feedback::student_page).post(feedback::student_submit),
        )
        .route("/profile", get(profile::view).post(profile::submit))
        .route("/fcmtoken", post(notifications::fcmtoken))
        .route("/notifications", get(notifications::student_view))
        .route("/results", get(results::student_view))
}

/// The whole service: public login routes, the three portals, and the gate
/// and request tracing wrapped around all of them.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(login::login_page))
        .route("/doLogin", get(login::do_login_get).post(login::do_login))
        .route("/logout_user", get(login::logout_user))
        .route("/health", get(login::health))
        .route("/attendance/fetch", post(attendance::get_dates))
        .nest("/admin", admin_routes())
        .nest("/staff", staff_routes())
        .nest("/student", student_routes())
        .layer(middleware::from_fn_with_state(state.clone(), login_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
