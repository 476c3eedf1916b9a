pub mod backup;
pub mod classes;
pub mod core;
pub mod grades;
pub mod mailbox;
pub mod managers;
pub mod students;
pub mod subjects;
pub mod teachers;

mod util;
