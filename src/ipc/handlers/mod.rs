pub mod backup_exchange;
pub mod classes;
pub mod core;
pub mod drafts;
pub mod published;
pub mod students;
pub mod subjects;
pub mod teachers;
pub mod upload;
pub mod workflow;
