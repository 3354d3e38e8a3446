/*!
Typed form input.

Each form arrives as a struct of optional strings (so a missing or garbled
field never fails extraction) and is then validated into its typed
counterpart, or into the list of per-field problems the page re-renders with.
*/
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct FormErrors(Vec<FieldError>);

impl FormErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|e| e.field == field)
    }

    fn finish<T>(self, value: T) -> Result<T, FormErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

pub trait Validate {
    type Valid;
    fn validate(self) -> Result<Self::Valid, FormErrors>;
}

fn trimmed(v: Option<String>) -> String {
    v.map(|s| s.trim().to_string()).unwrap_or_default()
}

fn required(errs: &mut FormErrors, field: &'static str, v: Option<String>) -> String {
    let s = trimmed(v);
    if s.is_empty() {
        errs.add(field, "This field is required.");
    }
    s
}

fn required_id(errs: &mut FormErrors, field: &'static str, v: Option<String>) -> i64 {
    let s = trimmed(v);
    if s.is_empty() {
        errs.add(field, "This field is required.");
        return 0;
    }
    match s.parse::<i64>() {
        Ok(n) if n > 0 => n,
        _ => {
            errs.add(field, "Select a valid choice.");
            0
        }
    }
}

fn required_date(errs: &mut FormErrors, field: &'static str, v: Option<String>) -> NaiveDate {
    let s = trimmed(v);
    if s.is_empty() {
        errs.add(field, "This field is required.");
        return NaiveDate::default();
    }
    match parse_date(&s) {
        Some(d) => d,
        None => {
            errs.add(field, "Enter a valid date (YYYY-MM-DD).");
            NaiveDate::default()
        }
    }
}

fn required_score(errs: &mut FormErrors, field: &'static str, v: Option<String>) -> f64 {
    let s = trimmed(v);
    if s.is_empty() {
        errs.add(field, "This field is required.");
        return 0.0;
    }
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() && (0.0..=100.0).contains(&n) => n,
        _ => {
            errs.add(field, "Enter a score between 0 and 100.");
            0.0
        }
    }
}

fn email(errs: &mut FormErrors, field: &'static str, v: Option<String>) -> String {
    let s = required(errs, field, v);
    if !s.is_empty() {
        let valid = s
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.'))
            .unwrap_or(false);
        if !valid || s.chars().any(char::is_whitespace) {
            errs.add(field, "Enter a valid email address.");
        }
    }
    s.to_lowercase()
}

fn gender(errs: &mut FormErrors, field: &'static str, v: Option<String>) -> String {
    let s = required(errs, field, v);
    if !s.is_empty() && s != "M" && s != "F" {
        errs.add(field, "Select a valid choice. Gender must be M or F.");
    }
    s
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn parse_id(v: Option<&str>) -> Option<i64> {
    v.and_then(|s| s.trim().parse::<i64>().ok()).filter(|n| *n > 0)
}

#[derive(Debug, Deserialize, Default)]
pub struct CourseRaw {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseForm {
    pub name: String,
}

impl Validate for CourseRaw {
    type Valid = CourseForm;

    fn validate(self) -> Result<CourseForm, FormErrors> {
        let mut errs = FormErrors::default();
        let name = required(&mut errs, "name", self.name);
        errs.finish(CourseForm { name })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SessionRaw {
    pub start_year: Option<String>,
    pub end_year: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionForm {
    pub start_year: NaiveDate,
    pub end_year: NaiveDate,
}

impl Validate for SessionRaw {
    type Valid = SessionForm;

    fn validate(self) -> Result<SessionForm, FormErrors> {
        let mut errs = FormErrors::default();
        let start_year = required_date(&mut errs, "start_year", self.start_year);
        let end_year = required_date(&mut errs, "end_year", self.end_year);
        if errs.is_empty() && end_year < start_year {
            errs.add("end_year", "Session end cannot be before its start.");
        }
        errs.finish(SessionForm {
            start_year,
            end_year,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SubjectRaw {
    pub name: Option<String>,
    pub course: Option<String>,
    pub staff: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectForm {
    pub name: String,
    pub course_id: i64,
    pub staff_id: i64,
}

impl Validate for SubjectRaw {
    type Valid = SubjectForm;

    fn validate(self) -> Result<SubjectForm, FormErrors> {
        let mut errs = FormErrors::default();
        let name = required(&mut errs, "name", self.name);
        let course_id = required_id(&mut errs, "course", self.course);
        let staff_id = required_id(&mut errs, "staff", self.staff);
        errs.finish(SubjectForm {
            name,
            course_id,
            staff_id,
        })
    }
}

/// Shared by the add/edit forms for staff and students. Edits may leave the
/// password blank to keep the current one.
#[derive(Debug, Deserialize, Default)]
pub struct PersonRaw {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub course: Option<String>,
    pub session: Option<String>,
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip)]
    pub password: Option<String>,
    pub gender: String,
    pub address: String,
    pub course_id: i64,
    pub session_id: Option<i64>,
    pub profile_pic: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersonKind {
    NewStaff,
    EditStaff,
    NewStudent,
    EditStudent,
}

impl PersonRaw {
    pub fn validate_as(self, kind: PersonKind) -> Result<PersonForm, FormErrors> {
        let mut errs = FormErrors::default();
        let first_name = required(&mut errs, "first_name", self.first_name);
        let last_name = required(&mut errs, "last_name", self.last_name);
        let email = email(&mut errs, "email", self.email);
        let password = match kind {
            PersonKind::NewStaff | PersonKind::NewStudent => {
                Some(required(&mut errs, "password", self.password))
            }
            PersonKind::EditStaff | PersonKind::EditStudent => {
                self.password.filter(|p| !p.trim().is_empty())
            }
        };
        let gender = gender(&mut errs, "gender", self.gender);
        let address = required(&mut errs, "address", self.address);
        let course_id = required_id(&mut errs, "course", self.course);
        let session_id = match kind {
            PersonKind::NewStudent | PersonKind::EditStudent => {
                Some(required_id(&mut errs, "session", self.session))
            }
            PersonKind::NewStaff | PersonKind::EditStaff => None,
        };
        let profile_pic = trimmed(self.profile_pic);
        errs.finish(PersonForm {
            first_name,
            last_name,
            email,
            password,
            gender,
            address,
            course_id,
            session_id,
            profile_pic,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ProfileRaw {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProfileForm {
    pub first_name: String,
    pub last_name: String,
    pub password: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
    pub profile_pic: Option<String>,
}

impl ProfileRaw {
    /// The admin profile carries only names and password; staff and student
    /// profiles also require address and gender.
    pub fn validate_profile(self, with_contact: bool) -> Result<ProfileForm, FormErrors> {
        let mut errs = FormErrors::default();
        let first_name = required(&mut errs, "first_name", self.first_name);
        let last_name = required(&mut errs, "last_name", self.last_name);
        let password = self.password.filter(|p| !p.trim().is_empty());
        let (address, gender) = if with_contact {
            (
                Some(required(&mut errs, "address", self.address)),
                Some(gender(&mut errs, "gender", self.gender)),
            )
        } else {
            (None, None)
        };
        let profile_pic = self
            .profile_pic
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        errs.finish(ProfileForm {
            first_name,
            last_name,
            password,
            address,
            gender,
            profile_pic,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LeaveRaw {
    pub leave_date: Option<String>,
    pub leave_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LeaveForm {
    pub date: NaiveDate,
    pub message: String,
}

impl Validate for LeaveRaw {
    type Valid = LeaveForm;

    fn validate(self) -> Result<LeaveForm, FormErrors> {
        let mut errs = FormErrors::default();
        let date = required_date(&mut errs, "leave_date", self.leave_date);
        let message = required(&mut errs, "leave_message", self.leave_message);
        errs.finish(LeaveForm { date, message })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FeedbackRaw {
    pub feedback: Option<String>,
}

impl Validate for FeedbackRaw {
    type Valid = String;

    fn validate(self) -> Result<String, FormErrors> {
        let mut errs = FormErrors::default();
        let feedback = required(&mut errs, "feedback", self.feedback);
        errs.finish(feedback)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ResultRaw {
    pub subject: Option<String>,
    pub student_list: Option<String>,
    pub test: Option<String>,
    pub exam: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ResultForm {
    pub subject_id: i64,
    pub student_id: i64,
    pub test: f64,
    pub exam: f64,
}

impl Validate for ResultRaw {
    type Valid = ResultForm;

    fn validate(self) -> Result<ResultForm, FormErrors> {
        let mut errs = FormErrors::default();
        let subject_id = required_id(&mut errs, "subject", self.subject);
        let student_id = required_id(&mut errs, "student_list", self.student_list);
        let test = required_score(&mut errs, "test", self.test);
        let exam = required_score(&mut errs, "exam", self.exam);
        errs.finish(ResultForm {
            subject_id,
            student_id,
            test,
            exam,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[test]
    fn blank_course_name_is_required() {
        let errs = CourseRaw { name: s("   ") }.validate().unwrap_err();
        assert!(errs.has("name"));
    }

    #[test]
    fn session_end_before_start_is_rejected() {
        let errs = SessionRaw {
            start_year: s("2024-09-01"),
            end_year: s("2024-06-30"),
        }
        .validate()
        .unwrap_err();
        assert!(errs.has("end_year"));
        assert!(!errs.has("start_year"));
    }

    #[test]
    fn new_student_requires_password_and_session() {
        let raw = PersonRaw {
            first_name: s("Jane"),
            last_name: s("Doe"),
            email: s("Jane@Example.com"),
            gender: s("F"),
            address: s("456 St"),
            course: s("1"),
            ..Default::default()
        };
        let errs = raw.validate_as(PersonKind::NewStudent).unwrap_err();
        assert!(errs.has("password"));
        assert!(errs.has("session"));
        assert!(!errs.has("email"));
    }

    #[test]
    fn edit_staff_keeps_blank_password_and_lowercases_email() {
        let form = PersonRaw {
            first_name: s("John"),
            last_name: s("Doe"),
            email: s("John@Example.com"),
            password: s(""),
            gender: s("M"),
            address: s("123 St"),
            course: s("2"),
            ..Default::default()
        }
        .validate_as(PersonKind::EditStaff)
        .expect("valid");
        assert_eq!(form.password, None);
        assert_eq!(form.email, "john@example.com");
        assert_eq!(form.course_id, 2);
        assert_eq!(form.session_id, None);
    }

    #[test]
    fn bad_email_and_gender_are_reported() {
        let errs = PersonRaw {
            first_name: s("A"),
            last_name: s("B"),
            email: s("not-an-email"),
            password: s("p"),
            gender: s("X"),
            address: s("a"),
            course: s("abc"),
            ..Default::default()
        }
        .validate_as(PersonKind::NewStaff)
        .unwrap_err();
        assert!(errs.has("email"));
        assert!(errs.has("gender"));
        assert!(errs.has("course"));
    }

    #[test]
    fn scores_must_be_within_range() {
        let errs = ResultRaw {
            subject: s("1"),
            student_list: s("1"),
            test: s("101"),
            exam: s("-1"),
        }
        .validate()
        .unwrap_err();
        assert!(errs.has("test"));
        assert!(errs.has("exam"));

        let ok = ResultRaw {
            subject: s("1"),
            student_list: s("3"),
            test: s("10"),
            exam: s("90.5"),
        }
        .validate()
        .expect("valid");
        assert_eq!(ok.student_id, 3);
        assert_eq!(ok.exam, 90.5);
    }

    #[test]
    fn leave_needs_a_real_date() {
        let errs = LeaveRaw {
            leave_date: s("01/01/2023"),
            leave_message: s("Sick"),
        }
        .validate()
        .unwrap_err();
        assert!(errs.has("leave_date"));
    }
}
