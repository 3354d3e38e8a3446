pub mod attendance;
pub mod feedback;
pub mod hod;
pub mod leave;
pub mod login;
pub mod notifications;
pub mod profile;
pub mod results;
pub mod staff;
pub mod student;
