pub mod backup_exchange;
pub mod core;
pub mod curriculum;
pub mod grades;
pub mod practical_exams;
pub mod reports;
pub mod services;
pub mod setup;
pub mod students;
